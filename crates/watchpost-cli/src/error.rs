use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] watchpost_core::Error),
    #[error(transparent)]
    Remote(#[from] watchpost_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Operation ID cannot be empty")]
    EmptyOperationId,
    #[error("Operation not found for id/prefix: {0}")]
    OperationNotFound(String),
    #[error("{0}")]
    AmbiguousOperationId(String),
    #[error("Invalid field assignment '{0}', expected NAME=VALUE")]
    InvalidField(String),
    #[error("{0}")]
    InvalidTargets(String),
    #[error("Failed to read {path}: {message}")]
    InvalidDocument { path: String, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No API endpoint configured. Set apiBaseUrl in the config file or WATCHPOST_API_BASE_URL."
    )]
    ApiNotConfigured,
}
