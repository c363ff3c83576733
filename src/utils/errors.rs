// src/utils/errors.rs
//! Error taxonomy for the capture relay
//!
//! Every failure inside the relay degrades functionality rather than
//! propagating to the host: callers see these values in logs, flush reports
//! and construction-time results only.

use std::time::Duration;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Network error or non-2xx response from the collection endpoint
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// Request exceeded its time bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Unparsable payload received on the live link
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// External producer failed to start
    #[error("Producer failed to start: {0}")]
    ProducerInitFailed(String),

    /// Live link could not be established or was lost
    #[error("Live link failed: {0}")]
    LinkFailed(String),

    /// A registered flush callback reported failure or panicked
    #[error("Flush callback failed: {0}")]
    CallbackFailed(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
