//! Shared test helpers available to all `#[cfg(test)]` modules in the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::tokens::{LogoutFn, RefreshError, TokenSource, TokenStore};

/// Build an unsigned compact token around the given claims.
pub fn encode_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// A `Config` pointed at `base_url` with millisecond backoffs.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::with_base_url(base_url);
    config.retry.backoff_ms = 1;
    config.retry.backoff_max_ms = 5;
    config.timeouts.request_timeout_ms = 5_000;
    config.timeouts.refresh_timeout_ms = 2_000;
    config
}

/// A gateway for `config` whose client ignores proxy settings from the
/// environment, so requests always reach the in-process mock server.
pub fn test_gateway(config: Config) -> Gateway {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(config.timeouts.request_timeout())
        .build()
        .unwrap();
    Gateway::with_client(config, TokenStore::new(), client)
}

/// A logout callback plus the number of times it ran.
pub fn logout_counter() -> (LogoutFn, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let logout: LogoutFn = {
        let count = Arc::clone(&count);
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    (logout, count)
}

// ============================================================================
// Token source
// ============================================================================

/// Token source that hands out a fixed sequence of tokens.
///
/// A gated source blocks inside `request_token` until [`release`] is called,
/// which lets tests pile callers up behind an in-flight refresh.
///
/// [`release`]: ScriptedSource::release
pub struct ScriptedSource {
    calls: AtomicUsize,
    entered: Notify,
    fail: bool,
    gate: Option<Semaphore>,
    tokens: Mutex<VecDeque<String>>,
}

impl ScriptedSource {
    fn build<I, S>(tokens: I, gated: bool, fail: bool) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            fail,
            gate: gated.then(|| Semaphore::new(0)),
            tokens: Mutex::new(tokens.into_iter().map(Into::into).collect()),
        })
    }

    pub fn new<I, S>(tokens: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(tokens, false, false)
    }

    pub fn empty() -> Arc<Self> {
        Self::build(Vec::<String>::new(), false, false)
    }

    pub fn gated<I, S>(tokens: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(tokens, true, false)
    }

    pub fn gated_failing() -> Arc<Self> {
        Self::build(Vec::<String>::new(), true, true)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until a refresh has entered the source.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one blocked refresh complete.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn request_token(&self) -> Result<Option<String>, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| RefreshError::Source("gate closed".to_string()))?
                .forget();
        }

        if self.fail {
            return Err(RefreshError::Source("scripted failure".to_string()));
        }
        Ok(self.tokens.lock().unwrap().pop_front())
    }
}

// ============================================================================
// Mock HTTP server
// ============================================================================

/// Directory served by the mock search endpoint: (email, name)
pub const DIRECTORY: &[(&str, &str)] = &[
    ("albert@x.com", "Albert Jones"),
    ("alice@x.com", "Alice Smith"),
    ("bob@x.com", "Bob Alvarez"),
    ("carol@x.com", "Carol King"),
];

#[derive(Default)]
struct MockState {
    held_query: Mutex<Option<String>>,
    hits: Mutex<HashMap<String, usize>>,
    last_authorization: Mutex<Option<String>>,
}

/// In-process axum server standing in for the REST services.
///
/// Routes:
/// - `GET /ok` → `{"id": 1}`
/// - `GET /protected` → `{"id": 1}` for `Bearer t2`, 401 otherwise
/// - `GET /always-500`, `GET /always-404`
/// - `GET /slow` → answers after 10 seconds
/// - `GET /echo/*rest` → `{"path": <raw path>}`
/// - `POST /echo-body` → the request body
/// - `POST /auth/refresh` → `{"token": "t2"}`
/// - `GET /employees/search?q=&limit=` → matches from [`DIRECTORY`]; a
///   query set with [`MockServer::hold_search`] answers after 10 seconds
pub struct MockServer {
    addr: std::net::SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/ok", get(|| async { Json(json!({"id": 1})) }))
            .route("/protected", get(protected))
            .route(
                "/always-500",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "boom"}))) }),
            )
            .route(
                "/always-404",
                get(|| async { (StatusCode::NOT_FOUND, Json(json!({"error": "missing"}))) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Json(json!({"id": 1}))
                }),
            )
            .route("/echo/*rest", get(echo_path))
            .route("/echo-body", post(|Json(body): Json<Value>| async move { Json(body) }))
            .route("/auth/refresh", post(|| async { Json(json!({"token": "t2"})) }))
            .route("/employees/search", get(search))
            .layer(middleware::from_fn_with_state(Arc::clone(&state), record))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }

    /// Make searches for exactly `query` hang.
    pub fn hold_search(&self, query: &str) {
        *self.state.held_query.lock().unwrap() = Some(query.to_string());
    }
}

async fn record(State(state): State<Arc<MockState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    *state.hits.lock().unwrap().entry(path).or_default() += 1;
    *state.last_authorization.lock().unwrap() = authorization;

    next.run(request).await
}

async fn protected(request: Request) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .is_some_and(|v| v == "Bearer t2");
    if authorized {
        Json(json!({"id": 1})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "token expired"}))).into_response()
    }
}

async fn echo_path(request: Request) -> Json<Value> {
    Json(json!({"path": request.uri().path()}))
}

#[derive(Deserialize)]
struct SearchParams {
    limit: usize,
    q: String,
}

async fn search(
    State(state): State<Arc<MockState>>,
    Query(params): Query<SearchParams>,
) -> Json<Value> {
    let q = params.q.to_lowercase();
    let held = state.held_query.lock().unwrap().as_deref() == Some(q.as_str());
    if held {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    let matches: Vec<Value> = DIRECTORY
        .iter()
        .filter(|(email, name)| {
            let name = name.to_lowercase();
            email.starts_with(&q)
                || name.starts_with(&q)
                || name.split_whitespace().any(|w| w.starts_with(&q))
        })
        .map(|(email, name)| json!({"email": email, "name": name}))
        .collect();

    let has_more = matches.len() > params.limit;
    let results: Vec<Value> = matches.into_iter().take(params.limit).collect();
    Json(json!({"results": results, "hasMore": has_more}))
}
