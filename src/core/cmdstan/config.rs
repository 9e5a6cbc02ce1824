use crate::domain::model::SamplerConfig;
use crate::utils::error::{ConvertError, Result};

const DEFAULT_MARKER: &str = "(Default)";

/// Splits a configuration comment into key and value, dropping the
/// `(Default)` marker CmdStan appends to unchanged settings.
fn split_entry(line: &str) -> Option<(String, String)> {
    let body = line.trim_start_matches('#').trim();
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    let value = value.trim();
    let value = value.strip_suffix(DEFAULT_MARKER).unwrap_or(value).trim();
    Some((key.to_string(), value.to_string()))
}

fn parse_count(source: &str, key: &str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| ConvertError::InvalidConfigValueError {
        field: format!("{} ({})", key, source),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_flag(source: &str, key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ConvertError::InvalidConfigValueError {
            field: format!("{} ({})", key, source),
            value: value.to_string(),
            reason: "expected 0, 1, true or false".to_string(),
        }),
    }
}

impl SamplerConfig {
    /// Reads the sampler settings from the comment block that precedes the
    /// CSV header. Unknown keys are kept in `entries` only.
    pub fn from_comments<S: AsRef<str>>(source: &str, lines: &[S]) -> Result<Self> {
        let mut config = SamplerConfig::default();
        let mut seen = Vec::new();

        for line in lines {
            let Some((key, value)) = split_entry(line.as_ref()) else {
                continue;
            };
            if !seen.contains(&key) {
                match key.as_str() {
                    "num_samples" => config.num_samples = parse_count(source, &key, &value)?,
                    "num_warmup" => config.num_warmup = parse_count(source, &key, &value)?,
                    "save_warmup" => config.save_warmup = parse_flag(source, &key, &value)?,
                    "thin" => config.thin = parse_count(source, &key, &value)?,
                    _ => {}
                }
                seen.push(key.clone());
            }
            config.entries.push((key, value));
        }

        if config.thin == 0 {
            return Err(ConvertError::InvalidConfigValueError {
                field: format!("thin ({})", source),
                value: "0".to_string(),
                reason: "thin must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}
