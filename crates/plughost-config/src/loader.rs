//! Configuration loading

use crate::{Config, ConfigFormat};
use plughost_core::{Error, Result};
use regex::{Captures, Regex};
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file without validating it
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration text
///
/// Supports `${VAR}` and `${VAR:-default}`. An unset variable without a
/// default is an error. In YAML and TOML, lines that are entirely a `#`
/// comment are left untouched; trailing comments are still expanded.
fn expand_env_vars(content: &str, format: ConfigFormat) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut missing = None;
    let mut expanded = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if format != ConfigFormat::Json && line.trim_start().starts_with('#') {
            expanded.push_str(line);
            continue;
        }

        let line = re.replace_all(line, |cap: &Captures<'_>| {
            let var_name = &cap[1];
            match (env::var(var_name), cap.get(3)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            }
        });
        expanded.push_str(&line);
    }

    match missing {
        Some(var_name) => Err(Error::Config(format!(
            "Environment variable '{var_name}' not set and no default provided"
        ))),
        None => Ok(expanded),
    }
}

/// Load configuration from a string without validating it
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded = expand_env_vars(content, format)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load and validate configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}
