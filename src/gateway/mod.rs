//! Authenticated request gateway
//!
//! The only entry point application code uses. It wires the token store,
//! the single-flight refresh queue and the executor together so callers
//! never deal with token refresh themselves.

mod executor;
pub mod request;
mod response;

pub use request::{encode_component, LoadingFn, Method, RequestSpec, EMAIL_PLACEHOLDER};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::refresh::RefreshQueue;
use crate::tokens::{IdentityClaims, LogoutFn, RefreshError, Token, TokenSource, TokenStore};
use executor::Executor;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request cancelled")]
    Cancelled,
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("URL needs the caller's email but the token carries none")]
    MissingIdentity,
    #[error("No credentials")]
    NoCredentials,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Token refresh failed: {0}")]
    Refresh(RefreshError),
    #[error("Request failed with status {status}: {message}")]
    Status { message: String, status: u16 },
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<RefreshError> for RequestError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NoCredentials => RequestError::NoCredentials,
            other => RequestError::Refresh(other),
        }
    }
}

impl RequestError {
    /// HTTP status of a failed response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::NotFound(_) => Some(404),
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Cancelled calls are neither successes nor failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }
}

pub struct Gateway {
    config: Config,
    executor: Executor,
    queue: Arc<RefreshQueue>,
    store: Arc<TokenStore>,
}

impl Gateway {
    /// Build a gateway with its own HTTP client. Must be called inside a
    /// tokio runtime, since it spawns the refresh queue worker.
    pub fn new(config: Config, store: Arc<TokenStore>) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .timeout(config.timeouts.request_timeout())
            .build()?;
        Ok(Self::with_client(config, store, client))
    }

    pub fn with_client(config: Config, store: Arc<TokenStore>, client: reqwest::Client) -> Self {
        let queue = Arc::new(RefreshQueue::spawn(
            Arc::clone(&store),
            config.timeouts.refresh_timeout(),
        ));
        let executor = Executor::new(
            config.api.base_url.clone(),
            client,
            Arc::clone(&queue),
            config.retry.clone(),
            Arc::clone(&store),
        );

        Self {
            config,
            executor,
            queue,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Install credentials after the host application signs in.
    pub async fn sign_in(&self, token: Token, source: Arc<dyn TokenSource>, logout: LogoutFn) {
        self.store.set_credentials(token, source, logout).await;
        info!("Signed in");
    }

    pub async fn sign_out(&self) {
        self.store.clear().await;
        info!("Signed out");
    }

    /// Claims of the current identity token, if it decodes.
    pub async fn identity(&self) -> Option<IdentityClaims> {
        let token = self.store.token().await?;
        IdentityClaims::decode(token.as_str()).ok()
    }

    pub async fn request(&self, spec: RequestSpec) -> Result<Value, RequestError> {
        self.executor.execute(&spec).await
    }

    /// Like [`Gateway::request`], deserializing the success body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        spec: RequestSpec,
    ) -> Result<T, RequestError> {
        let body = self.request(spec).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn get(&self, url: &str) -> Result<Value, RequestError> {
        self.request(RequestSpec::get(url)).await
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.request(RequestSpec::post(url, body)).await
    }

    pub async fn put(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.request(RequestSpec::new(Method::Put, url).json(body))
            .await
    }

    pub async fn patch(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.request(RequestSpec::new(Method::Patch, url).json(body))
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<Value, RequestError> {
        self.request(RequestSpec::new(Method::Delete, url)).await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.config.api.base_url)
            .field("queue", &self.queue)
            .finish()
    }
}
