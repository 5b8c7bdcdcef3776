//! Forward WebSocket endpoint addressing.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use url::Url;

use crate::error::{OneBotError, Result};

/// Query parameter carrying the access token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// A OneBot forward WebSocket endpoint with its optional access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    access_token: Option<String>,
}

impl Endpoint {
    /// Parse and validate an endpoint. Only `ws` and `wss` are accepted.
    pub fn parse(raw: &str, access_token: Option<&str>) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OneBotError::invalid_endpoint("endpoint URL is empty"));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| OneBotError::invalid_endpoint(format!("{}: {}", trimmed, e)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(OneBotError::invalid_endpoint(format!(
                    "unsupported scheme '{}'",
                    other
                )));
            }
        }

        if url.host_str().is_none() {
            return Err(OneBotError::invalid_endpoint(format!(
                "{}: missing host",
                trimmed
            )));
        }

        Ok(Self {
            url,
            access_token: access_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// URL to connect to, with the access token appended unless the
    /// configured URL already carries one.
    pub fn connect_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(token) = &self.access_token {
            let present = url.query_pairs().any(|(k, _)| k == ACCESS_TOKEN_PARAM);
            if !present {
                url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
            }
        }
        url
    }

    /// Client handshake request, carrying `Authorization: Bearer <token>`
    /// when a token is configured.
    pub fn handshake_request(&self) -> Result<Request> {
        let mut request = self
            .connect_url()
            .as_str()
            .into_client_request()
            .map_err(|e| OneBotError::invalid_endpoint(e.to_string()))?;

        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| OneBotError::invalid_endpoint(format!("access token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(request)
    }

    /// The endpoint with any access token masked, for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                if k == ACCESS_TOKEN_PARAM {
                    (k.into_owned(), "***".to_string())
                } else {
                    (k.into_owned(), v.into_owned())
                }
            })
            .collect();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url.to_string()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}
