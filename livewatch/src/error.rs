//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;
use tracing::Level;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Screenshot timed out after {0:?}")]
    ScreenshotTimeout(Duration),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Severity the diagnostics sink records this error at.
    pub fn severity(&self) -> Level {
        match self {
            Self::TransientFetch(_) => Level::DEBUG,
            Self::ScreenshotTimeout(_) => Level::INFO,
            Self::Render(_) | Self::Delivery(_) | Self::Validation(_) | Self::NotFound { .. } => {
                Level::WARN
            }
            Self::PermanentFetch(_)
            | Self::Configuration(_)
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Other(_) => Level::ERROR,
        }
    }
}

impl From<onebot::OneBotError> for Error {
    fn from(err: onebot::OneBotError) -> Self {
        match err {
            onebot::OneBotError::InvalidTarget(_) | onebot::OneBotError::InvalidEndpoint(_) => {
                Self::Configuration(err.to_string())
            }
            onebot::OneBotError::Protocol(_) | onebot::OneBotError::Serialization(_) => {
                Self::Delivery(err.to_string())
            }
        }
    }
}
