use crate::core::{ConfigProvider, PredictiveSource};
use crate::domain::model::Coord;
use crate::utils::error::{ConvertError, Result};
use crate::utils::validation::{self, Validate};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_ARCHIVE: &str = "inference_data.zip";

/// A conversion with every input pattern expanded and every label parsed.
#[derive(Debug, Clone, Default)]
pub struct ConversionJob {
    pub output: Vec<String>,
    pub prior: Vec<String>,
    pub posterior_predictive: Option<PredictiveSource>,
    pub observed_data: Option<String>,
    pub observed_data_var: Option<Vec<String>>,
    pub log_likelihood: Option<String>,
    pub coords: HashMap<String, Vec<Coord>>,
    pub dims: HashMap<String, Vec<String>>,
    pub save_warmup: bool,
    pub output_path: String,
    pub output_formats: Vec<String>,
    pub archive_name: Option<String>,
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expands glob patterns into sorted file lists. Plain paths pass through
/// unchanged; a pattern without matches is an error.
pub fn expand_patterns(field: &str, patterns: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for pattern in patterns {
        if !has_glob_chars(pattern) {
            files.push(pattern.clone());
            continue;
        }

        let mut matched: Vec<String> = Vec::new();
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => matched.push(path.to_string_lossy().to_string()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable path while expanding '{}': {}", pattern, e),
            }
        }
        if matched.is_empty() {
            return Err(ConvertError::NoMatchingFiles {
                pattern: pattern.clone(),
            });
        }
        matched.sort();

        if matched.len() > 1 {
            let listing: Vec<String> = matched
                .iter()
                .enumerate()
                .map(|(i, path)| format!("{}: {}", i + 1, path))
                .collect();
            tracing::info!(
                "glob found {} files for '{}':\n{}",
                matched.len(),
                field,
                listing.join("\n")
            );
        }
        files.extend(matched);
    }
    Ok(files)
}

fn is_csv_path(value: &str) -> bool {
    Path::new(value)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Entries ending in `.csv` are files, anything else names variables in
/// the output files. Mixing both is rejected.
pub fn resolve_predictive(entries: &[String]) -> Result<Option<PredictiveSource>> {
    if entries.is_empty() {
        return Ok(None);
    }
    let files = entries.iter().filter(|e| is_csv_path(e)).count();
    if files == entries.len() {
        let paths = expand_patterns("posterior_predictive", entries)?;
        Ok(Some(PredictiveSource::Files(paths)))
    } else if files == 0 {
        Ok(Some(PredictiveSource::Variables(entries.to_vec())))
    } else {
        Err(ConvertError::InvalidConfigValueError {
            field: "posterior_predictive".to_string(),
            value: entries.join(","),
            reason: "use either CSV files or variable names, not both".to_string(),
        })
    }
}

/// Coordinate labels from text: integers and floats become numbers.
pub fn parse_coord_value(raw: &str) -> Coord {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return serde_json::json!(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return serde_json::json!(f);
        }
    }
    serde_json::Value::String(raw.to_string())
}

/// Parses `key=a,b,c` assignments.
pub fn parse_assignment(field: &str, raw: &str) -> Result<(String, Vec<String>)> {
    let (key, values) = raw
        .split_once('=')
        .ok_or_else(|| ConvertError::InvalidConfigValueError {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected NAME=VALUE[,VALUE...]".to_string(),
        })?;
    let key = key.trim();
    validation::validate_non_empty_string(field, key)?;
    let values = values
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Ok((key.to_string(), values))
}

impl ConfigProvider for ConversionJob {
    fn output_files(&self) -> &[String] {
        &self.output
    }

    fn prior_files(&self) -> &[String] {
        &self.prior
    }

    fn posterior_predictive(&self) -> Option<&PredictiveSource> {
        self.posterior_predictive.as_ref()
    }

    fn observed_data(&self) -> Option<&str> {
        self.observed_data.as_deref()
    }

    fn observed_data_var(&self) -> Option<&[String]> {
        self.observed_data_var.as_deref()
    }

    fn log_likelihood(&self) -> Option<&str> {
        self.log_likelihood.as_deref()
    }

    fn coords(&self) -> &HashMap<String, Vec<Coord>> {
        &self.coords
    }

    fn dims(&self) -> &HashMap<String, Vec<String>> {
        &self.dims
    }

    fn save_warmup(&self) -> bool {
        self.save_warmup
    }

    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn output_formats(&self) -> &[String] {
        &self.output_formats
    }

    fn archive_name(&self) -> Option<&str> {
        self.archive_name.as_deref()
    }
}

impl Validate for ConversionJob {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_list("output", &self.output)?;
        validation::validate_file_extensions("output", &self.output, &["csv"])?;
        validation::validate_file_extensions("prior", &self.prior, &["csv"])?;
        if let Some(PredictiveSource::Variables(vars)) = &self.posterior_predictive {
            for var in vars {
                validation::validate_non_empty_string("posterior_predictive", var)?;
            }
        }
        if let Some(path) = &self.observed_data {
            validation::validate_path("observed_data", path)?;
        }
        if let Some(ll) = &self.log_likelihood {
            validation::validate_non_empty_string("log_likelihood", ll)?;
        }
        validation::validate_path("output_path", &self.output_path)?;
        validation::validate_output_formats("output_formats", &self.output_formats)?;
        if let Some(archive) = &self.archive_name {
            validation::validate_file_name("archive_name", archive)?;
        }
        Ok(())
    }
}
