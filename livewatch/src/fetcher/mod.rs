//! Fetcher: wraps the platform client behind a bounded wait.

mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Creator, Snapshot};

pub use http::{CREDENTIAL_HEADER, HttpPlatformClient};

/// Error type at the platform client seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    /// Error message.
    pub message: String,
    /// Whether the next tick may succeed (network, rate limit).
    pub transient: bool,
}

impl FetchError {
    /// Create a transient error (retried at the next tick).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a permanent error (deleted account and the like).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FetchError {}

impl From<FetchError> for crate::Error {
    fn from(err: FetchError) -> Self {
        if err.transient {
            crate::Error::TransientFetch(err.message)
        } else {
            crate::Error::PermanentFetch(err.message)
        }
    }
}

/// External platform API client.
///
/// Implementations return the observed fields of a [`Snapshot`]; the
/// session fields are derived by the change detector.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync + 'static {
    async fn fetch(&self, creator: &Creator) -> Result<Snapshot, FetchError>;
}

/// Platform client with a configurable timeout.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn PlatformClient>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: Arc<dyn PlatformClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a fresh snapshot. A timeout counts as a transient failure.
    pub async fn fetch(&self, creator: &Creator) -> Result<Snapshot, FetchError> {
        debug!(creator_id = %creator.id, "Fetching snapshot");
        match tokio::time::timeout(self.timeout, self.client.fetch(creator)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::transient(format!(
                "fetch timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}
