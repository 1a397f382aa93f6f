use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum DocwardenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
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

    #[error("Failed to resolve worker token: {0}")]
    Secret(#[from] SecretError),
}

/// Failure to hand a job to the continuation worker.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Continuation worker unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Continuation worker rejected job with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Continuation worker is not configured")]
    NotConfigured,
}

/// Fatal detector failure. Per-job failures never surface as this type.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Failed to query stuck tasks: {source}")]
    StoreRead {
        worker_id: String,
        #[source]
        source: DatabaseError,
    },
}

impl RecoveryError {
    /// Correlation id of the invocation that failed.
    pub fn worker_id(&self) -> &str {
        match self {
            RecoveryError::StoreRead { worker_id, .. } => worker_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to read job store: {0}")]
    Store(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, DocwardenError>;
