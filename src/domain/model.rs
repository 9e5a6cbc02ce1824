use crate::utils::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A coordinate label. Numbers for default positional coords, strings or
/// numbers for user supplied ones.
pub type Coord = serde_json::Value;

/// JSON has no NaN or infinity. Finite floats are written as numbers, the
/// rest as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
mod float_data {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    struct Float(f64);

    impl Serialize for Float {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let v = self.0;
            if v.is_finite() {
                serializer.serialize_f64(v)
            } else if v.is_nan() {
                serializer.serialize_str("NaN")
            } else if v > 0.0 {
                serializer.serialize_str("Infinity")
            } else {
                serializer.serialize_str("-Infinity")
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(f64),
        Text(String),
        Null(()),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| Float(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Encoded>::deserialize(deserializer)?
            .into_iter()
            .map(|e| match e {
                Encoded::Number(v) => Ok(v),
                Encoded::Null(()) => Ok(f64::NAN),
                Encoded::Text(t) => match t.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "Infinity" => Ok(f64::INFINITY),
                    "-Infinity" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("invalid float '{}'", other))),
                },
            })
            .collect()
    }
}

/// Number of elements of an array with this shape, `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))
}

/// Flat row-major storage for a [`DataArray`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data")]
pub enum ArrayValues {
    #[serde(rename = "float64", with = "float_data")]
    Float(Vec<f64>),
    #[serde(rename = "int64")]
    Int(Vec<i64>),
    #[serde(rename = "bool")]
    Bool(Vec<bool>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Int(v) => v.len(),
            ArrayValues::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            ArrayValues::Float(_) => "float64",
            ArrayValues::Int(_) => "int64",
            ArrayValues::Bool(_) => "bool",
        }
    }

    /// Element as text, the way it is written to CSV.
    pub fn format_at(&self, index: usize) -> String {
        match self {
            ArrayValues::Float(v) => v[index].to_string(),
            ArrayValues::Int(v) => v[index].to_string(),
            ArrayValues::Bool(v) => (v[index] as u8).to_string(),
        }
    }

    pub fn as_f64(&self, index: usize) -> Option<f64> {
        match self {
            ArrayValues::Float(v) => v.get(index).copied(),
            ArrayValues::Int(v) => v.get(index).map(|x| *x as f64),
            ArrayValues::Bool(v) => v.get(index).map(|x| if *x { 1.0 } else { 0.0 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: ArrayValues,
}

impl DataArray {
    pub fn new(name: &str, dims: Vec<String>, shape: Vec<usize>, values: ArrayValues) -> Result<Self> {
        if dims.len() != shape.len() {
            return Err(ConvertError::shape(
                name,
                format!("{} dims given for {} axes", dims.len(), shape.len()),
            ));
        }
        let expected = element_count(&shape)
            .ok_or_else(|| ConvertError::shape(name, format!("shape {:?} is too large", shape)))?;
        if values.len() != expected {
            return Err(ConvertError::shape(
                name,
                format!("shape {:?} needs {} values, got {}", shape, expected, values.len()),
            ));
        }
        Ok(Self { dims, shape, values })
    }

    /// Row-major flat offset of a multi-index.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, len) in index.iter().zip(&self.shape) {
            if i >= len {
                return None;
            }
            offset = offset * len + i;
        }
        Some(offset)
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.offset(index).and_then(|o| self.values.as_f64(o))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub data_vars: BTreeMap<String, DataArray>,
    pub coords: BTreeMap<String, Vec<Coord>>,
    pub attrs: BTreeMap<String, String>,
}

impl Dataset {
    /// Adds a variable, checking its dims against coords already present.
    pub fn add_var(
        &mut self,
        name: &str,
        array: DataArray,
        coords: BTreeMap<String, Vec<Coord>>,
    ) -> Result<()> {
        for (dim, len) in array.dims.iter().zip(&array.shape) {
            let labels = coords
                .get(dim)
                .or_else(|| self.coords.get(dim))
                .ok_or_else(|| ConvertError::shape(name, format!("no coords for dim '{}'", dim)))?;
            if labels.len() != *len {
                return Err(ConvertError::shape(
                    name,
                    format!(
                        "dim '{}' has length {} but {} coords",
                        dim,
                        len,
                        labels.len()
                    ),
                ));
            }
            if let Some(existing) = self.coords.get(dim) {
                if existing != labels {
                    return Err(ConvertError::shape(
                        name,
                        format!("conflicting coords for dim '{}'", dim),
                    ));
                }
            }
        }
        for (dim, labels) in coords {
            if array.dims.contains(&dim) {
                self.coords.entry(dim).or_insert(labels);
            }
        }
        self.data_vars.insert(name.to_string(), array);
        Ok(())
    }

    pub fn var(&self, name: &str) -> Option<&DataArray> {
        self.data_vars.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.data_vars.is_empty()
    }
}

pub const GROUP_NAMES: [&str; 8] = [
    "posterior",
    "sample_stats",
    "posterior_predictive",
    "prior",
    "sample_stats_prior",
    "observed_data",
    "warmup_posterior",
    "warmup_sample_stats",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub posterior: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sample_stats: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub posterior_predictive: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prior: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sample_stats_prior: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub observed_data: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub warmup_posterior: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub warmup_sample_stats: Option<Dataset>,
}

impl InferenceData {
    pub fn group(&self, name: &str) -> Option<&Dataset> {
        match name {
            "posterior" => self.posterior.as_ref(),
            "sample_stats" => self.sample_stats.as_ref(),
            "posterior_predictive" => self.posterior_predictive.as_ref(),
            "prior" => self.prior.as_ref(),
            "sample_stats_prior" => self.sample_stats_prior.as_ref(),
            "observed_data" => self.observed_data.as_ref(),
            "warmup_posterior" => self.warmup_posterior.as_ref(),
            "warmup_sample_stats" => self.warmup_sample_stats.as_ref(),
            _ => None,
        }
    }

    /// Present groups in canonical order.
    pub fn groups(&self) -> Vec<(&'static str, &Dataset)> {
        GROUP_NAMES
            .iter()
            .filter_map(|name| self.group(name).map(|ds| (*name, ds)))
            .collect()
    }
}

/// Parsed `key = value` header of one CmdStan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub num_samples: usize,
    pub num_warmup: usize,
    pub save_warmup: bool,
    pub thin: usize,
    pub entries: Vec<(String, String)>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            num_warmup: 1000,
            save_warmup: false,
            thin: 1,
            entries: Vec::new(),
        }
    }
}

impl SamplerConfig {
    pub fn saved_draws(&self) -> usize {
        self.num_samples / self.thin
    }

    pub fn saved_warmup_draws(&self) -> usize {
        if self.save_warmup {
            self.num_warmup / self.thin
        } else {
            0
        }
    }

    pub fn entry(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerInfo {
    pub configuration: Vec<String>,
    pub adaptation: Vec<String>,
    pub timing: Vec<String>,
    pub config: SamplerConfig,
}

/// Column names plus the draws of one chain for those columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnBlock {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl ColumnBlock {
    /// Keeps only the columns accepted by `keep`, in their original order.
    pub fn select<F: Fn(&str) -> bool>(&self, keep: F) -> ColumnBlock {
        let picked: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| keep(c))
            .map(|(i, _)| i)
            .collect();
        ColumnBlock {
            columns: picked.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| picked.iter().map(|&i| row[i]).collect())
                .collect(),
        }
    }
}

/// One chain read from a CmdStan CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainDraws {
    pub source: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub warmup_rows: Vec<Vec<f64>>,
    pub info: SamplerInfo,
}

impl ChainDraws {
    pub fn is_stat_column(column: &str) -> bool {
        column.ends_with("__")
    }

    pub fn draws(&self) -> ColumnBlock {
        ColumnBlock {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        }
    }

    pub fn warmup(&self) -> ColumnBlock {
        ColumnBlock {
            columns: self.columns.clone(),
            rows: self.warmup_rows.clone(),
        }
    }

    /// Model quantities and sampler statistics, in that order.
    pub fn split(&self) -> (ColumnBlock, ColumnBlock) {
        let all = self.draws();
        (
            all.select(|c| !Self::is_stat_column(c)),
            all.select(Self::is_stat_column),
        )
    }
}

/// Values of one R dump variable, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RValue {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}
