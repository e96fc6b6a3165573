//! Error Handling Module
//!
//! Defines the error type for the BDA training core.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for BDA training operations
#[derive(Error, Debug)]
pub enum BdaError {
    /// A caller broke a contract of the training core (fatal, never retried)
    #[error("Precondition violation: {0}")]
    PreconditionViolation(String),

    /// Configuration values are out of range
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Checkpoint could not be written or a field could not be restored
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Burn recorder failure
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for BdaError {
    fn from(err: serde_json::Error) -> Self {
        BdaError::Serialization(err.to_string())
    }
}

impl From<burn::record::RecorderError> for BdaError {
    fn from(err: burn::record::RecorderError) -> Self {
        BdaError::Recorder(format!("{:?}", err))
    }
}

/// Convenience Result type for BDA operations
pub type Result<T> = std::result::Result<T, BdaError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| BdaError::Checkpoint(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| BdaError::Checkpoint(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BdaError::PreconditionViolation(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| BdaError::PreconditionViolation(f()))
    }
}
