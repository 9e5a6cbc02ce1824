use crate::config::job::{self, ConversionJob};
use crate::utils::error::{ConvertError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub job: JobInfo,
    pub inputs: InputsConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    pub load: LoadConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    pub output: Vec<String>,
    #[serde(default)]
    pub prior: Vec<String>,
    #[serde(default)]
    pub posterior_predictive: Vec<String>,
    pub observed_data: Option<String>,
    pub observed_data_var: Option<Vec<String>>,
    pub log_likelihood: Option<String>,
    pub save_warmup: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default)]
    pub dims: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub coords: HashMap<String, Vec<toml::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub output_path: String,
    pub output_formats: Vec<String>,
    pub compression: Option<CompressionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_format: Option<String>,
}

fn env_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"))
}

fn coord_from_toml(dim: &str, value: &toml::Value) -> Result<serde_json::Value> {
    match value {
        toml::Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        toml::Value::Integer(i) => Ok(serde_json::json!(i)),
        toml::Value::Float(f) => Ok(serde_json::json!(f)),
        toml::Value::Boolean(b) => Ok(serde_json::json!(b)),
        other => Err(ConvertError::InvalidConfigValueError {
            field: format!("labels.coords.{}", dim),
            value: other.to_string(),
            reason: "coordinate labels must be strings, numbers or booleans".to_string(),
        }),
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ConvertError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ConvertError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${RUN_DIR}); unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> String {
        env_var_re()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("job.name", &self.job.name)?;
        validation::validate_non_empty_list("inputs.output", &self.inputs.output)?;
        validation::validate_path("load.output_path", &self.load.output_path)?;
        validation::validate_output_formats("load.output_formats", &self.load.output_formats)?;
        if let Some(compression) = &self.load.compression {
            if let Some(filename) = &compression.filename {
                validation::validate_file_name("load.compression.filename", filename)?;
            }
        }
        if let Some(format) = self.monitoring.as_ref().and_then(|m| m.log_format.as_deref()) {
            if !["compact", "json"].contains(&format) {
                return Err(ConvertError::InvalidConfigValueError {
                    field: "monitoring.log_format".to_string(),
                    value: format.to_string(),
                    reason: "expected 'compact' or 'json'".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn output_path(&self) -> &str {
        &self.load.output_path
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_format.as_deref())
            .is_some_and(|f| f == "json")
    }

    pub fn archive_name(&self) -> Option<String> {
        self.load
            .compression
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| {
                c.filename
                    .clone()
                    .unwrap_or_else(|| job::DEFAULT_ARCHIVE.to_string())
            })
    }

    /// Expands input patterns and converts coordinate labels.
    pub fn to_job(&self) -> Result<ConversionJob> {
        let mut coords = HashMap::new();
        for (dim, labels) in &self.labels.coords {
            let converted = labels
                .iter()
                .map(|v| coord_from_toml(dim, v))
                .collect::<Result<Vec<_>>>()?;
            coords.insert(dim.clone(), converted);
        }

        Ok(ConversionJob {
            output: job::expand_patterns("inputs.output", &self.inputs.output)?,
            prior: job::expand_patterns("inputs.prior", &self.inputs.prior)?,
            posterior_predictive: job::resolve_predictive(&self.inputs.posterior_predictive)?,
            observed_data: self.inputs.observed_data.clone(),
            observed_data_var: self.inputs.observed_data_var.clone(),
            log_likelihood: self.inputs.log_likelihood.clone(),
            coords,
            dims: self.labels.dims.clone(),
            save_warmup: self.inputs.save_warmup.unwrap_or(false),
            output_path: self.load.output_path.clone(),
            output_formats: self.load.output_formats.clone(),
            archive_name: self.archive_name(),
        })
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
