//! Error types for relaygate
//!
//! Engine operations return their own narrow errors (`FailoverError`,
//! `RotationError`, `ProviderError`). `AppError` is the top-level error for
//! configuration loading and the CLI.

use crate::failover::FailoverError;
use crate::rotation::RotationError;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Failover failed: {0}")]
    Failover(#[from] FailoverError),

    #[error("Credential rotation failed: {0}")]
    Rotation(#[from] RotationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
