//! HTTP bridge to a platform adapter that serves normalized snapshots.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, trace};
use url::Url;

use super::{FetchError, PlatformClient};
use crate::domain::{Creator, Snapshot};
use crate::utils::http_client::build_client;

/// Header carrying the creator's opaque credential.
pub const CREDENTIAL_HEADER: &str = "X-Livewatch-Credential";

/// Fetches `{base}/creators/{id}/snapshot`.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPlatformClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            client: build_client(request_timeout)?,
            base_url,
        })
    }

    fn snapshot_url(&self, creator_id: &str) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::permanent(format!("invalid platform url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["creators", creator_id, "snapshot"]);
        Ok(url)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn fetch(&self, creator: &Creator) -> Result<Snapshot, FetchError> {
        let url = self.snapshot_url(&creator.id)?;
        trace!(creator_id = %creator.id, %url, "GET snapshot");

        let mut request = self.client.get(url);
        if let Some(credential) = creator.credential.as_deref() {
            request = request.header(CREDENTIAL_HEADER, credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Err(FetchError::permanent(format!(
                "creator {} not available ({})",
                creator.id, status
            )));
        }
        if !status.is_success() {
            return Err(FetchError::transient(format!(
                "platform returned {}",
                status
            )));
        }

        let snapshot = response
            .json::<Snapshot>()
            .await
            .map_err(|e| FetchError::transient(format!("invalid snapshot document: {}", e)))?;
        debug!(
            creator_id = %creator.id,
            live = snapshot.is_live(),
            post = ?snapshot.latest_post_id(),
            "Fetched snapshot"
        );
        Ok(snapshot)
    }
}
