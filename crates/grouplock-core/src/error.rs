//! Error types for the grouplock system
//!
//! This module defines the crate-wide error type. Remote-platform failures
//! have their own taxonomy ([`GatewayError`](crate::traits::GatewayError))
//! because the engine reacts to each kind differently; everything else is
//! collected here.

use thiserror::Error;

use crate::traits::GatewayError;

/// Result type alias for grouplock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the grouplock system
#[derive(Error, Debug)]
pub enum Error {
    /// Remote gateway errors
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Lock store errors
    #[error("lock store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine has stopped and can no longer accept commands
    #[error("engine stopped: {0}")]
    EngineStopped(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a lock store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
