use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::schema::{parse_utc_offset, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// `<config dir>/scoretally/scoretally.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scoretally").join("scoretally.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Loads an explicit path, else the default path if it exists, else defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = path {
        info!("Loading config from {}", path.display());
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.is_file() => {
            info!("Loading config from {}", path.display());
            load_config(path)
        }
        _ => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks on an already-deserialized config.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.concurrency_limit == 0 {
        return Err(ConfigError::Validation {
            message: "concurrency_limit must be at least 1".to_string(),
        });
    }

    if config.gateway.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "gateway.timeout_secs must be at least 1".to_string(),
        });
    }

    if parse_utc_offset(&config.export.utc_offset).is_none() {
        return Err(ConfigError::Validation {
            message: format!(
                "Invalid export.utc_offset '{}', expected e.g. \"+09:00\"",
                config.export.utc_offset
            ),
        });
    }

    Ok(())
}
