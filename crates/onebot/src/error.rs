//! OneBot error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, OneBotError>;

/// Errors that can occur while building or decoding OneBot frames.
#[derive(Error, Debug)]
pub enum OneBotError {
    /// The target type or id cannot be addressed.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The endpoint URL is malformed or uses an unsupported scheme.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A frame did not match the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OneBotError {
    /// Create an invalid target error.
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Create an invalid endpoint error.
    pub fn invalid_endpoint(msg: impl Into<String>) -> Self {
        Self::InvalidEndpoint(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
