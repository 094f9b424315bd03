//! Request execution with bounded retries
//!
//! One `execute` call owns every attempt of a request. Authorization
//! failures go through the single-flight refresh queue before retrying;
//! other failures back off and retry until `max_tries` is reached. 404 is
//! never retried.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use super::request::{resolve_url, LoadingFn, RequestSpec};
use super::response::{error_message, parse_body, Reply};
use super::RequestError;
use crate::config::RetryConfig;
use crate::refresh::RefreshQueue;
use crate::tokens::{IdentityClaims, Token, TokenStore};

/// What to do after one attempt.
#[derive(Debug)]
pub(crate) enum Verdict {
    Success(Value),
    /// Token rejected: refresh through the queue, then retry
    Unauthorized,
    /// Transient failure: back off, then retry
    Retry,
    Fail(RequestError),
}

/// Classify one response given how many attempts have been made.
pub(crate) fn classify(reply: Reply, attempt: u32, max_tries: u32) -> Verdict {
    let Reply { body, status } = reply;

    if status.is_success() {
        return Verdict::Success(body);
    }

    let can_retry = attempt < max_tries;
    if status == StatusCode::UNAUTHORIZED && can_retry {
        return Verdict::Unauthorized;
    }
    if status == StatusCode::NOT_FOUND {
        return Verdict::Fail(RequestError::NotFound(error_message(status, &body)));
    }
    if can_retry {
        return Verdict::Retry;
    }

    Verdict::Fail(RequestError::Status {
        message: error_message(status, &body),
        status: status.as_u16(),
    })
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

/// Reports `true` on creation and `false` exactly once when dropped, so the
/// loading state settles on every exit path including cancellation.
struct LoadingGuard(Option<LoadingFn>);

impl LoadingGuard {
    fn start(loading: Option<LoadingFn>) -> Self {
        if let Some(loading) = &loading {
            loading(true);
        }
        Self(loading)
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if let Some(loading) = self.0.take() {
            loading(false);
        }
    }
}

/// Performs HTTP calls with the current token.
pub(crate) struct Executor {
    base_url: String,
    client: reqwest::Client,
    queue: Arc<RefreshQueue>,
    retry: RetryConfig,
    store: Arc<TokenStore>,
}

impl Executor {
    pub(crate) fn new(
        base_url: String,
        client: reqwest::Client,
        queue: Arc<RefreshQueue>,
        retry: RetryConfig,
        store: Arc<TokenStore>,
    ) -> Self {
        Self {
            base_url,
            client,
            queue,
            retry,
            store,
        }
    }

    /// Run a request to a terminal outcome.
    pub(crate) async fn execute(&self, spec: &RequestSpec) -> Result<Value, RequestError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            %request_id,
            method = %spec.method,
            url = %spec.url
        );

        async {
            if !self.store.has_credentials().await {
                warn!("No credentials, refusing request");
                return Err(RequestError::NoCredentials);
            }

            let _loading = LoadingGuard::start(spec.loading.clone());

            let result = match &spec.cancel {
                Some(cancel) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(RequestError::Cancelled),
                        result = self.run_attempts(spec) => result,
                    }
                }
                None => self.run_attempts(spec).await,
            };

            match &result {
                Ok(_) => debug!("Request succeeded"),
                Err(RequestError::Cancelled) => debug!("Request cancelled"),
                Err(e) => warn!(error = %e, "Request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_attempts(&self, spec: &RequestSpec) -> Result<Value, RequestError> {
        let max_tries = self.retry.max_tries;
        let mut token = self.first_token().await?;
        let mut attempt = 1;

        loop {
            let url = self.resolve(spec, &token)?;
            debug!(attempt, "Sending request");

            match self.send(spec, url, &token).await {
                Ok(reply) => {
                    let status = reply.status;
                    match classify(reply, attempt, max_tries) {
                        Verdict::Success(body) => return Ok(body),
                        Verdict::Unauthorized => {
                            warn!(attempt, "Token rejected, waiting for refresh");
                            token = self.queue.refresh_after(token).await?;
                        }
                        Verdict::Retry => {
                            let delay = self.retry.backoff(attempt);
                            warn!(attempt, status = status.as_u16(), ?delay, "Request failed, retrying");
                            tokio::time::sleep(delay).await;
                            token = self.current_token().await?;
                        }
                        Verdict::Fail(e) => return Err(e),
                    }
                }
                Err(e) if is_transient(&e) && attempt < max_tries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(attempt, error = %e, ?delay, "Transient network error, retrying");
                    tokio::time::sleep(delay).await;
                    token = self.current_token().await?;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Network error");
                    return Err(RequestError::Transport(e));
                }
            }

            attempt += 1;
        }
    }

    /// Token for the first attempt.
    ///
    /// Waits behind any in-flight refresh; with `queue_all_requests` every
    /// first attempt is queued even when nothing is refreshing. A token whose
    /// claims show it has already expired is refreshed up front.
    async fn first_token(&self) -> Result<Token, RequestError> {
        let token = if self.retry.queue_all_requests || self.queue.is_refreshing() {
            self.queue.acquire().await?
        } else {
            self.current_token().await?
        };

        let expired = IdentityClaims::decode(token.as_str())
            .map(|claims| claims.is_expired_at(Utc::now()))
            .unwrap_or(false);
        if expired {
            debug!("Token expired before sending, refreshing");
            return Ok(self.queue.refresh_after(token).await?);
        }

        Ok(token)
    }

    async fn current_token(&self) -> Result<Token, RequestError> {
        self.store.token().await.ok_or(RequestError::NoCredentials)
    }

    fn resolve(&self, spec: &RequestSpec, token: &Token) -> Result<reqwest::Url, RequestError> {
        let claims = if spec.needs_identity() {
            IdentityClaims::decode(token.as_str()).ok()
        } else {
            None
        };
        resolve_url(
            &self.base_url,
            &spec.url,
            claims.as_ref().and_then(|c| c.email()),
        )
    }

    async fn send(
        &self,
        spec: &RequestSpec,
        url: reqwest::Url,
        token: &Token,
    ) -> Result<Reply, reqwest::Error> {
        let mut builder = self
            .client
            .request(spec.method.into(), url)
            .headers(build_headers(spec, token));

        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        Ok(Reply {
            body: parse_body(status, &bytes),
            status,
        })
    }
}

/// Default JSON + bearer headers with the caller's headers merged over them.
fn build_headers(spec: &RequestSpec, token: &Token) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    match HeaderValue::from_str(&format!("Bearer {}", token.as_str())) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => warn!("Token contains characters not allowed in a header"),
    }

    for (name, value) in &spec.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid header"),
        }
    }

    headers
}
