//! Error types for the Shipyard daemon

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::RemoteError;

/// Main error type for the Shipyard daemon
#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy exposed to observers.
///
/// Serialized names are part of the wire contract of progress events and API
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    ConflictError,
    ConnectionError,
    ExecutionError,
    TimeoutError,
    HealthCheckError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::ConflictError => "ConflictError",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::HealthCheckError => "HealthCheckError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ShipyardError {
    /// Taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShipyardError::ValidationError(_) => ErrorKind::ValidationError,
            ShipyardError::NotFound(_) => ErrorKind::NotFoundError,
            ShipyardError::Conflict(_) => ErrorKind::ConflictError,
            ShipyardError::ConnectionError(_) => ErrorKind::ConnectionError,
            ShipyardError::ExecutionError(_) => ErrorKind::ExecutionError,
            ShipyardError::Timeout(_) => ErrorKind::TimeoutError,
            ShipyardError::HealthCheckError(_) => ErrorKind::HealthCheckError,
            // Server-side HTTP probes fail like an unreachable service
            ShipyardError::HttpError(_) => ErrorKind::ConnectionError,
            ShipyardError::IoError(_)
            | ShipyardError::JsonError(_)
            | ShipyardError::StorageError(_)
            | ShipyardError::ConfigError(_)
            | ShipyardError::ServerError(_)
            | ShipyardError::ShutdownError(_)
            | ShipyardError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<RemoteError> for ShipyardError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Auth(_) | RemoteError::Network(_) => {
                ShipyardError::ConnectionError(err.to_string())
            }
            RemoteError::Timeout(_) => ShipyardError::Timeout(err.to_string()),
            RemoteError::InvalidArgument(msg) => ShipyardError::ValidationError(msg),
            RemoteError::Command { .. } | RemoteError::Transfer(_) => {
                ShipyardError::ExecutionError(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ShipyardError {
    fn from(err: anyhow::Error) -> Self {
        ShipyardError::Internal(err.to_string())
    }
}
