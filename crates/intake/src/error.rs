use std::path::PathBuf;
use thiserror::Error;

pub use crate::backend::BackendError;
pub use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Secret(#[from] SecretError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to read source file '{path}': {source}")]
    SourceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid URL for '{field}': {reason}")]
    InvalidUrl { field: String, reason: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Item '{0}' not found")]
    NotFound(String),

    #[error("Item '{id}' cannot be retried while {status}")]
    NotRetryable { id: String, status: String },

    #[error("Queue has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, IntakeError>;
