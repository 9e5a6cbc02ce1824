#[cfg(feature = "cli")]
pub mod cli;
pub mod job;
pub mod toml_config;

pub use job::ConversionJob;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::collections::HashMap;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "cmdstan-convert")]
#[command(about = "Convert CmdStan sampler output into labelled inference data")]
pub struct CliConfig {
    /// CmdStan output CSV files or glob patterns (one file per chain, or concatenated chains)
    #[arg(long, value_delimiter = ',', required = true)]
    pub output: Vec<String>,

    /// Prior sampling CSV files or glob patterns
    #[arg(long, value_delimiter = ',')]
    pub prior: Vec<String>,

    /// Posterior predictive variable names, or CSV files / glob patterns
    #[arg(long, value_delimiter = ',')]
    pub posterior_predictive: Vec<String>,

    /// Observed data in R dump format
    #[arg(long)]
    pub observed_data: Option<String>,

    /// Observed data variables to keep (all when omitted)
    #[arg(long, value_delimiter = ',')]
    pub observed_data_var: Vec<String>,

    /// Variable holding the pointwise log likelihood
    #[arg(long)]
    pub log_likelihood: Option<String>,

    /// Dimension names of a variable, e.g. --dim theta=school
    #[arg(long = "dim", value_name = "VAR=DIM[,DIM...]")]
    pub dims: Vec<String>,

    /// Coordinate labels of a dimension, e.g. --coord school=Choate,Deerfield
    #[arg(long = "coord", value_name = "DIM=LABEL[,LABEL...]")]
    pub coords: Vec<String>,

    /// Keep saved warmup draws as warmup groups
    #[arg(long)]
    pub save_warmup: bool,

    #[arg(long, default_value = "./inference_data")]
    pub output_path: String,

    /// Output formats: json, csv
    #[arg(long, value_delimiter = ',', default_value = "json")]
    pub formats: Vec<String>,

    /// Bundle all output files into one ZIP archive
    #[arg(long)]
    pub compress: bool,

    #[arg(long, default_value = job::DEFAULT_ARCHIVE)]
    pub archive_name: String,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub log_json: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// Expands patterns and parses labels into a runnable job.
    pub fn into_job(self) -> Result<ConversionJob> {
        let mut dims = HashMap::new();
        for raw in &self.dims {
            let (var, names) = job::parse_assignment("dim", raw)?;
            dims.insert(var, names);
        }
        let mut coords = HashMap::new();
        for raw in &self.coords {
            let (dim, labels) = job::parse_assignment("coord", raw)?;
            coords.insert(dim, labels.iter().map(|l| job::parse_coord_value(l)).collect());
        }

        Ok(ConversionJob {
            output: job::expand_patterns("output", &self.output)?,
            prior: job::expand_patterns("prior", &self.prior)?,
            posterior_predictive: job::resolve_predictive(&self.posterior_predictive)?,
            observed_data: self.observed_data,
            observed_data_var: if self.observed_data_var.is_empty() {
                None
            } else {
                Some(self.observed_data_var)
            },
            log_likelihood: self.log_likelihood,
            coords,
            dims,
            save_warmup: self.save_warmup,
            output_path: self.output_path,
            output_formats: self.formats,
            archive_name: self.compress.then_some(self.archive_name),
        })
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use crate::core::PredictiveSource;
    use serde_json::json;

    #[test]
    fn test_cli_into_job() {
        let cli = CliConfig::try_parse_from([
            "cmdstan-convert",
            "--output",
            "chain_1.csv,chain_2.csv",
            "--posterior-predictive",
            "y_hat",
            "--dim",
            "theta=school",
            "--coord",
            "school=Choate,Deerfield",
            "--formats",
            "json,csv",
            "--compress",
        ])
        .unwrap();

        let job = cli.into_job().unwrap();
        assert_eq!(job.output, vec!["chain_1.csv", "chain_2.csv"]);
        assert_eq!(
            job.posterior_predictive,
            Some(PredictiveSource::Variables(vec!["y_hat".to_string()]))
        );
        assert_eq!(job.dims["theta"], vec!["school"]);
        assert_eq!(job.coords["school"], vec![json!("Choate"), json!("Deerfield")]);
        assert_eq!(job.output_formats, vec!["json", "csv"]);
        assert_eq!(job.archive_name.as_deref(), Some(job::DEFAULT_ARCHIVE));
        assert_eq!(job.observed_data_var, None);
    }

    #[test]
    fn test_cli_requires_output() {
        assert!(CliConfig::try_parse_from(["cmdstan-convert"]).is_err());
    }
}
