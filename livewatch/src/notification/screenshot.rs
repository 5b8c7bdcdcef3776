//! Screenshot renderer seam.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::domain::SubjectRef;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Produces an image of a post or live room.
#[async_trait]
pub trait ScreenshotRenderer: Send + Sync + 'static {
    async fn render(&self, subject: &SubjectRef) -> Result<Vec<u8>>;
}

/// Render `subject`, giving up after `timeout`.
pub async fn capture(
    renderer: &dyn ScreenshotRenderer,
    subject: &SubjectRef,
    timeout: Duration,
) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, renderer.render(subject)).await {
        Ok(Ok(bytes)) if bytes.is_empty() => Err(Error::render("renderer returned no image")),
        Ok(result) => result,
        Err(_) => Err(Error::ScreenshotTimeout(timeout)),
    }
}

/// Renderer service reached over HTTP: the subject is POSTed as JSON and
/// the response body is the image.
#[derive(Debug, Clone)]
pub struct HttpScreenshotRenderer {
    client: reqwest::Client,
    url: Url,
}

impl HttpScreenshotRenderer {
    pub fn new(url: Url) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::ZERO)?,
            url,
        })
    }
}

#[async_trait]
impl ScreenshotRenderer for HttpScreenshotRenderer {
    async fn render(&self, subject: &SubjectRef) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.url.clone())
            .json(subject)
            .send()
            .await
            .map_err(|e| Error::render(format!("screenshot request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::render(format!("screenshot service returned {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::render(format!("screenshot body: {}", e)))?;
        debug!(subject = %subject.id, size = bytes.len(), "Screenshot rendered");
        Ok(bytes.to_vec())
    }
}
