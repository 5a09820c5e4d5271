use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::config::schema::IntakeConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Smallest poll interval accepted; anything tighter hammers the status endpoint.
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Default config location: `<platform config dir>/intake/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("intake").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IntakeConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IntakeConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: IntakeConfig = serde_json::from_value(json_value)?;

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

fn validate_config(config: &IntakeConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    validate_url("api.baseUrl", &config.api.base_url)?;
    if let Some(events_url) = &config.api.events_url {
        validate_url("api.eventsUrl", events_url)?;
    }

    if config.queue.max_concurrent == 0 {
        return Err(ConfigError::Validation {
            message: "queue.maxConcurrent must be at least 1".to_string(),
        });
    }

    if config.queue.poll_interval_ms < MIN_POLL_INTERVAL_MS {
        return Err(ConfigError::Validation {
            message: format!(
                "queue.pollIntervalMs must be at least {} (got {})",
                MIN_POLL_INTERVAL_MS, config.queue.poll_interval_ms
            ),
        });
    }

    let token_sources = [
        &config.api.token,
        &config.api.token_file,
        &config.api.token_env_var,
    ]
    .iter()
    .filter(|s| s.as_deref().is_some_and(|v| !v.is_empty()))
    .count();
    if token_sources > 1 {
        tracing::warn!("Multiple token sources configured; the first in priority order wins");
    }

    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    Ok(())
}
