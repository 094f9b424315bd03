//! Token sources used to obtain a fresh token during refresh

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::RefreshError;

/// Anything that can hand out a fresh bearer token.
///
/// `Ok(None)` means the source answered but had no token to give, which
/// the refresh queue treats as a failed refresh.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn request_token(&self) -> Result<Option<String>, RefreshError>;
}

/// Source for hosts that cannot refresh. Every refresh fails, which logs
/// the caller out.
#[derive(Debug, Default)]
pub struct NoRefresh;

#[async_trait]
impl TokenSource for NoRefresh {
    async fn request_token(&self) -> Result<Option<String>, RefreshError> {
        Ok(None)
    }
}

/// Response body from a refresh endpoint
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl RefreshResponse {
    fn into_token(self) -> Option<String> {
        self.token
            .or(self.id_token)
            .or(self.access_token)
            .filter(|t| !t.is_empty())
    }
}

/// Obtains tokens by POSTing to a refresh endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn request_token(&self) -> Result<Option<String>, RefreshError> {
        debug!(url = %self.url, "Requesting fresh token");

        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| RefreshError::Source(e.to_string()))?;

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "Refresh endpoint rejected request");
            return Err(RefreshError::Source(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Source(e.to_string()))?;

        Ok(body.into_token())
    }
}
