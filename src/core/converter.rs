use crate::core::cmdstan::{base_name, dict_to_dataset, unpack_chains, VarDraws};
use crate::domain::model::{ArrayValues, ChainDraws, ColumnBlock, Coord, Dataset, InferenceData};
use crate::domain::ports::{ParsedRun, PredictiveSource};
use crate::utils::error::{ConvertError, Result};
use std::collections::{BTreeMap, HashMap};

pub const LOG_LIKELIHOOD: &str = "log_likelihood";

/// Labelling and selection options for a conversion.
#[derive(Debug, Clone, Default)]
pub struct ConversionSettings {
    pub posterior_predictive: Option<PredictiveSource>,
    pub observed_data_var: Option<Vec<String>>,
    pub log_likelihood: Option<String>,
    pub coords: HashMap<String, Vec<Coord>>,
    pub dims: HashMap<String, Vec<String>>,
    pub save_warmup: bool,
}

/// Sampler statistic name as exposed in `sample_stats`.
pub fn stat_name(column_base: &str) -> String {
    let name = column_base.strip_suffix("__").unwrap_or(column_base);
    match name {
        "divergent" => "diverging".to_string(),
        other => other.to_string(),
    }
}

fn stat_values(name: &str, values: Vec<f64>) -> ArrayValues {
    match name {
        "diverging" => ArrayValues::Bool(values.into_iter().map(|v| v != 0.0).collect()),
        "n_leapfrog" | "treedepth" => ArrayValues::Int(values.into_iter().map(|v| v as i64).collect()),
        _ => ArrayValues::Float(values),
    }
}

fn float_vars(vars: BTreeMap<String, VarDraws>) -> Vec<(String, Vec<usize>, ArrayValues)> {
    vars.into_iter()
        .map(|(name, draws)| (name, draws.shape, ArrayValues::Float(draws.values)))
        .collect()
}

fn stat_vars(vars: BTreeMap<String, VarDraws>) -> Vec<(String, Vec<usize>, ArrayValues)> {
    vars.into_iter()
        .map(|(name, draws)| {
            let renamed = if name == LOG_LIKELIHOOD {
                name
            } else {
                stat_name(&name)
            };
            let values = stat_values(&renamed, draws.values);
            (renamed, draws.shape, values)
        })
        .collect()
}

fn stat_blocks(chains: &[ChainDraws]) -> Vec<ColumnBlock> {
    chains.iter().map(|c| c.split().1).collect()
}

/// Turns parsed CmdStan runs into the groups of an [`InferenceData`].
///
/// Every group method returns `Ok(None)` when the inputs it needs were not
/// supplied.
pub struct CmdStanConverter {
    run: ParsedRun,
    settings: ConversionSettings,
}

impl CmdStanConverter {
    pub fn new(run: ParsedRun, settings: ConversionSettings) -> Result<Self> {
        if run.output.is_empty() {
            return Err(ConvertError::MissingConfigError {
                field: "output".to_string(),
            });
        }
        Ok(Self { run, settings })
    }

    fn predictive_variables(&self) -> &[String] {
        match &self.settings.posterior_predictive {
            Some(PredictiveSource::Variables(vars)) => vars,
            _ => &[],
        }
    }

    fn is_log_likelihood(&self, column: &str) -> bool {
        self.settings
            .log_likelihood
            .as_deref()
            .is_some_and(|ll| base_name(column) == ll)
    }

    fn is_predictive(&self, column: &str) -> bool {
        let base = base_name(column);
        self.predictive_variables().iter().any(|v| v == base)
    }

    fn sample_blocks<F: Fn(&str) -> bool>(chains: &[ChainDraws], keep: F) -> Vec<ColumnBlock> {
        chains
            .iter()
            .map(|c| c.draws().select(|col| !ChainDraws::is_stat_column(col) && keep(col)))
            .collect()
    }

    fn sampled_dataset(
        &self,
        vars: Vec<(String, Vec<usize>, ArrayValues)>,
        coords: &HashMap<String, Vec<Coord>>,
        dims: &HashMap<String, Vec<String>>,
    ) -> Result<Dataset> {
        dict_to_dataset(vars, coords, dims, true)
    }

    pub fn posterior(&self) -> Result<Option<Dataset>> {
        let blocks = Self::sample_blocks(&self.run.output, |col| {
            !self.is_predictive(col) && !self.is_log_likelihood(col)
        });
        let vars = unpack_chains(&blocks)?;
        let dataset = self.sampled_dataset(float_vars(vars), &self.settings.coords, &self.settings.dims)?;
        Ok(Some(dataset))
    }

    /// Dims and coords with entries keyed by the log-likelihood variable
    /// moved to `log_likelihood`.
    fn log_likelihood_labels(
        &self,
    ) -> (HashMap<String, Vec<Coord>>, HashMap<String, Vec<String>>) {
        let mut coords = self.settings.coords.clone();
        let mut dims = self.settings.dims.clone();
        if let Some(ll) = self.settings.log_likelihood.as_deref() {
            if let Some(var_dims) = dims.remove(ll) {
                dims.insert(LOG_LIKELIHOOD.to_string(), var_dims);
            }
            if let Some(var_coords) = coords.remove(ll) {
                coords.insert(LOG_LIKELIHOOD.to_string(), var_coords);
            }
        }
        (coords, dims)
    }

    /// Appends the log-likelihood columns of each chain to its statistics
    /// block, renamed to `log_likelihood`.
    fn merge_log_likelihood(&self, stats: &mut [ColumnBlock], draws: &[ColumnBlock]) -> Result<()> {
        let Some(ll) = self.settings.log_likelihood.as_deref() else {
            return Ok(());
        };
        for ((block, chain_draws), chain) in stats.iter_mut().zip(draws).zip(&self.run.output) {
            let ll_block = chain_draws.select(|col| self.is_log_likelihood(col));
            if ll_block.columns.is_empty() {
                return Err(ConvertError::ProcessingError {
                    message: format!("log likelihood variable '{}' not found in {}", ll, chain.source),
                });
            }
            for column in &ll_block.columns {
                block
                    .columns
                    .push(format!("{}{}", LOG_LIKELIHOOD, &column[ll.len()..]));
            }
            for (row, ll_row) in block.rows.iter_mut().zip(ll_block.rows) {
                row.extend(ll_row);
            }
        }
        Ok(())
    }

    pub fn sample_stats(&self) -> Result<Option<Dataset>> {
        let mut blocks = stat_blocks(&self.run.output);
        let draws: Vec<ColumnBlock> = self.run.output.iter().map(ChainDraws::draws).collect();
        self.merge_log_likelihood(&mut blocks, &draws)?;

        let vars = unpack_chains(&blocks)?;
        let (coords, dims) = self.log_likelihood_labels();
        let dataset = self.sampled_dataset(stat_vars(vars), &coords, &dims)?;
        Ok(Some(dataset))
    }

    pub fn posterior_predictive(&self) -> Result<Option<Dataset>> {
        let blocks = match &self.settings.posterior_predictive {
            None => return Ok(None),
            Some(PredictiveSource::Files(_)) => {
                Self::sample_blocks(&self.run.posterior_predictive, |_| true)
            }
            Some(PredictiveSource::Variables(names)) => {
                let columns = &self.run.output[0].columns;
                for name in names {
                    if !columns.iter().any(|c| base_name(c) == name) {
                        return Err(ConvertError::ProcessingError {
                            message: format!(
                                "posterior predictive variable '{}' not found in output",
                                name
                            ),
                        });
                    }
                }
                Self::sample_blocks(&self.run.output, |col| self.is_predictive(col))
            }
        };
        let vars = unpack_chains(&blocks)?;
        let dataset = self.sampled_dataset(float_vars(vars), &self.settings.coords, &self.settings.dims)?;
        Ok(Some(dataset))
    }

    pub fn prior(&self) -> Result<Option<Dataset>> {
        if self.run.prior.is_empty() {
            return Ok(None);
        }
        let blocks = Self::sample_blocks(&self.run.prior, |_| true);
        let vars = unpack_chains(&blocks)?;
        let dataset = self.sampled_dataset(float_vars(vars), &self.settings.coords, &self.settings.dims)?;
        Ok(Some(dataset))
    }

    pub fn sample_stats_prior(&self) -> Result<Option<Dataset>> {
        if self.run.prior.is_empty() {
            return Ok(None);
        }
        let vars = unpack_chains(&stat_blocks(&self.run.prior))?;
        let dataset = self.sampled_dataset(stat_vars(vars), &self.settings.coords, &self.settings.dims)?;
        Ok(Some(dataset))
    }

    pub fn observed_data(&self) -> Result<Option<Dataset>> {
        let Some(raw) = &self.run.observed_data else {
            return Ok(None);
        };

        let wanted = self.settings.observed_data_var.as_deref();
        if let Some(wanted) = wanted {
            for name in wanted {
                if !raw.contains_key(name) {
                    tracing::warn!("Observed data variable '{}' not present in data file", name);
                }
            }
        }

        let vars = raw
            .iter()
            .filter(|(name, _)| wanted.map_or(true, |w| w.contains(*name)))
            .map(|(name, value)| {
                let shape = if value.shape.is_empty() {
                    vec![1]
                } else {
                    value.shape.clone()
                };
                (name.clone(), shape, ArrayValues::Float(value.values.clone()))
            })
            .collect();

        let dataset = dict_to_dataset(vars, &self.settings.coords, &self.settings.dims, false)?;
        Ok(Some(dataset))
    }

    fn has_warmup(&self) -> bool {
        self.settings.save_warmup && self.run.output.iter().any(|c| !c.warmup_rows.is_empty())
    }

    fn warmup_blocks(&self) -> Vec<ColumnBlock> {
        self.run.output.iter().map(ChainDraws::warmup).collect()
    }

    pub fn warmup_posterior(&self) -> Result<Option<Dataset>> {
        if !self.has_warmup() {
            return Ok(None);
        }
        let blocks: Vec<ColumnBlock> = self
            .warmup_blocks()
            .iter()
            .map(|b| {
                b.select(|col| {
                    !ChainDraws::is_stat_column(col)
                        && !self.is_predictive(col)
                        && !self.is_log_likelihood(col)
                })
            })
            .collect();
        let vars = unpack_chains(&blocks)?;
        let dataset = self.sampled_dataset(float_vars(vars), &self.settings.coords, &self.settings.dims)?;
        Ok(Some(dataset))
    }

    pub fn warmup_sample_stats(&self) -> Result<Option<Dataset>> {
        if !self.has_warmup() {
            return Ok(None);
        }
        let warmup = self.warmup_blocks();
        let mut blocks: Vec<ColumnBlock> = warmup
            .iter()
            .map(|b| b.select(ChainDraws::is_stat_column))
            .collect();
        self.merge_log_likelihood(&mut blocks, &warmup)?;
        let vars = unpack_chains(&blocks)?;
        let (coords, dims) = self.log_likelihood_labels();
        let dataset = self.sampled_dataset(stat_vars(vars), &coords, &dims)?;
        Ok(Some(dataset))
    }

    pub fn to_inference_data(&self) -> Result<InferenceData> {
        if self.settings.save_warmup && !self.has_warmup() {
            tracing::info!("Warmup requested but the output files contain no saved warmup draws");
        }
        Ok(InferenceData {
            posterior: self.posterior()?,
            sample_stats: self.sample_stats()?,
            posterior_predictive: self.posterior_predictive()?,
            prior: self.prior()?,
            sample_stats_prior: self.sample_stats_prior()?,
            observed_data: self.observed_data()?,
            warmup_posterior: self.warmup_posterior()?,
            warmup_sample_stats: self.warmup_sample_stats()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cmdstan::{read_output, read_rdump};
    use serde_json::json;

    const CHAIN_1: &str = "\
# num_samples = 2
lp__,divergent__,treedepth__,n_leapfrog__,mu,theta.1,theta.2,log_lik.1,log_lik.2,y_hat.1,y_hat.2
-7.1,0,2,3,1.5,0.1,0.2,-1.1,-1.2,10,20
-7.2,1,3,7,1.6,0.3,0.4,-1.3,-1.4,11,21
";

    const CHAIN_2: &str = "\
# num_samples = 2
lp__,divergent__,treedepth__,n_leapfrog__,mu,theta.1,theta.2,log_lik.1,log_lik.2,y_hat.1,y_hat.2
-6.1,0,2,3,2.5,1.1,1.2,-2.1,-2.2,12,22
-6.2,0,2,3,2.6,1.3,1.4,-2.3,-2.4,13,23
";

    fn run() -> ParsedRun {
        let mut output = read_output("chain_1.csv", CHAIN_1).unwrap();
        output.extend(read_output("chain_2.csv", CHAIN_2).unwrap());
        ParsedRun {
            output,
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_output() {
        assert!(matches!(
            CmdStanConverter::new(ParsedRun::default(), ConversionSettings::default()),
            Err(ConvertError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_posterior_excludes_predictive_and_log_lik() {
        let settings = ConversionSettings {
            posterior_predictive: Some(PredictiveSource::Variables(vec!["y_hat".to_string()])),
            log_likelihood: Some("log_lik".to_string()),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(run(), settings).unwrap();
        let posterior = converter.posterior().unwrap().unwrap();

        let names: Vec<&String> = posterior.data_vars.keys().collect();
        assert_eq!(names, vec!["mu", "theta"]);
        let theta = posterior.var("theta").unwrap();
        assert_eq!(theta.shape, vec![2, 2, 2]);
        assert_eq!(theta.dims, vec!["chain", "draw", "theta_dim_0"]);
        assert_eq!(theta.get(&[1, 0, 1]), Some(1.2));

        let pp = converter.posterior_predictive().unwrap().unwrap();
        assert_eq!(pp.data_vars.len(), 1);
        assert_eq!(pp.var("y_hat").unwrap().get(&[0, 1, 1]), Some(21.0));
    }

    #[test]
    fn test_posterior_predictive_from_files() {
        let pp_text = "\
# num_samples = 2
lp__,accept_stat__,y_rep.1,y_rep.2
0,0.9,5,6
0,0.8,7,8
";
        let mut parsed = run();
        parsed.posterior_predictive = read_output("pp_1.csv", pp_text).unwrap();
        parsed
            .posterior_predictive
            .extend(read_output("pp_2.csv", &pp_text.replace(",5,6", ",15,16")).unwrap());
        let settings = ConversionSettings {
            posterior_predictive: Some(PredictiveSource::Files(vec![
                "pp_1.csv".to_string(),
                "pp_2.csv".to_string(),
            ])),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(parsed, settings).unwrap();

        let pp = converter.posterior_predictive().unwrap().unwrap();
        let names: Vec<&String> = pp.data_vars.keys().collect();
        assert_eq!(names, vec!["y_rep"]);
        let y_rep = pp.var("y_rep").unwrap();
        assert_eq!(y_rep.shape, vec![2, 2, 2]);
        assert_eq!(y_rep.get(&[0, 1, 0]), Some(7.0));
        assert_eq!(y_rep.get(&[1, 0, 1]), Some(16.0));

        // predictive files leave the output variables in the posterior
        let posterior = converter.posterior().unwrap().unwrap();
        assert!(posterior.var("y_hat").is_some());
    }

    #[test]
    fn test_missing_posterior_predictive_variable() {
        let settings = ConversionSettings {
            posterior_predictive: Some(PredictiveSource::Variables(vec!["y_pred".to_string()])),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(run(), settings).unwrap();
        let err = converter.posterior_predictive().unwrap_err();
        assert!(matches!(err, ConvertError::ProcessingError { .. }));
        assert!(err.to_string().contains("y_pred"));
        assert!(converter.to_inference_data().is_err());
    }

    #[test]
    fn test_sample_stats_renames_and_types() {
        let converter = CmdStanConverter::new(run(), ConversionSettings::default()).unwrap();
        let stats = converter.sample_stats().unwrap().unwrap();

        let names: Vec<&String> = stats.data_vars.keys().collect();
        assert_eq!(names, vec!["diverging", "lp", "n_leapfrog", "treedepth"]);
        assert_eq!(
            stats.var("diverging").unwrap().values,
            ArrayValues::Bool(vec![false, true, false, false])
        );
        assert_eq!(
            stats.var("n_leapfrog").unwrap().values,
            ArrayValues::Int(vec![3, 7, 3, 3])
        );
        assert_eq!(stats.var("lp").unwrap().values.dtype(), "float64");
    }

    #[test]
    fn test_log_likelihood_moves_to_sample_stats_with_dims() {
        let settings = ConversionSettings {
            log_likelihood: Some("log_lik".to_string()),
            dims: HashMap::from([("log_lik".to_string(), vec!["obs".to_string()])]),
            coords: HashMap::from([("obs".to_string(), vec![json!("a"), json!("b")])]),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(run(), settings).unwrap();
        let stats = converter.sample_stats().unwrap().unwrap();

        let ll = stats.var(LOG_LIKELIHOOD).unwrap();
        assert_eq!(ll.dims, vec!["chain", "draw", "obs"]);
        assert_eq!(ll.get(&[1, 1, 0]), Some(-2.3));
        assert_eq!(stats.coords["obs"], vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_missing_log_likelihood_variable() {
        let settings = ConversionSettings {
            log_likelihood: Some("loglik".to_string()),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(run(), settings).unwrap();
        assert!(converter.sample_stats().is_err());
    }

    #[test]
    fn test_prior_groups() {
        let mut parsed = run();
        parsed.prior = read_output("prior.csv", CHAIN_1).unwrap();
        let converter = CmdStanConverter::new(parsed, ConversionSettings::default()).unwrap();

        let prior = converter.prior().unwrap().unwrap();
        assert_eq!(prior.var("mu").unwrap().shape, vec![1, 2]);
        let stats = converter.sample_stats_prior().unwrap().unwrap();
        assert!(stats.var("treedepth").is_some());
    }

    #[test]
    fn test_observed_data_filtering() {
        let mut parsed = run();
        parsed.observed_data = Some(read_rdump("J <- 2\ny <- c(28, 8)\nsigma <- c(15, 10)\n").unwrap());
        let settings = ConversionSettings {
            observed_data_var: Some(vec!["y".to_string(), "J".to_string()]),
            dims: HashMap::from([("y".to_string(), vec!["school".to_string()])]),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(parsed, settings).unwrap();
        let observed = converter.observed_data().unwrap().unwrap();

        assert!(observed.var("sigma").is_none());
        assert_eq!(observed.var("J").unwrap().shape, vec![1]);
        assert_eq!(observed.var("J").unwrap().dims, vec!["J_dim_0"]);
        assert_eq!(observed.var("y").unwrap().dims, vec!["school"]);
    }

    #[test]
    fn test_absent_groups_are_none() {
        let converter = CmdStanConverter::new(run(), ConversionSettings::default()).unwrap();
        let idata = converter.to_inference_data().unwrap();
        let names: Vec<&str> = idata.groups().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["posterior", "sample_stats"]);
    }

    #[test]
    fn test_warmup_groups() {
        let text = "\
# num_samples = 1
# num_warmup = 2
# save_warmup = 1
lp__,mu
-1,0.1
-2,0.2
-3,0.3
";
        let parsed = ParsedRun {
            output: read_output("warm.csv", text).unwrap(),
            ..Default::default()
        };
        let settings = ConversionSettings {
            save_warmup: true,
            ..Default::default()
        };
        let converter = CmdStanConverter::new(parsed, settings).unwrap();
        let idata = converter.to_inference_data().unwrap();

        let warmup = idata.warmup_posterior.unwrap();
        assert_eq!(warmup.var("mu").unwrap().shape, vec![1, 2]);
        assert_eq!(idata.posterior.unwrap().var("mu").unwrap().get(&[0, 0]), Some(0.3));
        assert!(idata.warmup_sample_stats.unwrap().var("lp").is_some());
    }

    #[test]
    fn test_warmup_log_likelihood_in_warmup_sample_stats() {
        let text = "\
# num_samples = 1
# num_warmup = 2
# save_warmup = 1
lp__,mu,log_lik.1,log_lik.2
-1,0.1,-0.5,-0.6
-2,0.2,-0.7,-0.8
-3,0.3,-0.9,-1.0
";
        let parsed = ParsedRun {
            output: read_output("warm.csv", text).unwrap(),
            ..Default::default()
        };
        let settings = ConversionSettings {
            save_warmup: true,
            log_likelihood: Some("log_lik".to_string()),
            ..Default::default()
        };
        let converter = CmdStanConverter::new(parsed, settings).unwrap();

        let warmup_posterior = converter.warmup_posterior().unwrap().unwrap();
        assert!(warmup_posterior.var("log_lik").is_none());

        let warmup_stats = converter.warmup_sample_stats().unwrap().unwrap();
        let ll = warmup_stats.var(LOG_LIKELIHOOD).unwrap();
        assert_eq!(ll.shape, vec![1, 2, 2]);
        assert_eq!(ll.get(&[0, 1, 1]), Some(-0.8));

        let stats = converter.sample_stats().unwrap().unwrap();
        assert_eq!(stats.var(LOG_LIKELIHOOD).unwrap().get(&[0, 0, 0]), Some(-0.9));
    }
}
