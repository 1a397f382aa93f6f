use std::path::Path;

use secrecy::SecretString;

use crate::config::schema::{Config, WorkerConfig};
use crate::error::ConfigError;
use crate::secrets::resolve_secret_optional;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Environment variable consulted for the worker base URL when no config
/// file is given.
pub const WORKER_URL_ENV_VAR: &str = "DOCWARDEN_WORKER_URL";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the given file, or built-in defaults (plus `DOCWARDEN_WORKER_URL`)
/// when no path is given.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = Config::default();
            if let Ok(url) = std::env::var(WORKER_URL_ENV_VAR) {
                if !url.trim().is_empty() {
                    config.worker.base_url = Some(url.trim().to_string());
                }
            }
            validate_config(&config)?;
            Ok(config)
        }
    }
}

/// Resolves the bearer token for the continuation worker, if any source is
/// configured.
pub fn resolve_worker_token(worker: &WorkerConfig) -> Result<Option<SecretString>, ConfigError> {
    Ok(resolve_secret_optional(
        worker.token.as_deref(),
        worker.token_file.as_deref(),
        worker.token_env_var.as_deref(),
    )?)
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

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.detector.stuck_threshold_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "detector.stuckThresholdMinutes must be at least 1".to_string(),
        });
    }

    if let Some(base_url) = &config.worker.base_url {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("worker.baseUrl must be an http(s) URL, got '{}'", base_url),
            });
        }
    }

    if !config.worker.path.starts_with('/') {
        return Err(ConfigError::Validation {
            message: format!("worker.path must start with '/', got '{}'", config.worker.path),
        });
    }

    Ok(())
}
