use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::bridge::TokenSource;
use super::RefreshError;

/// Called once when a refresh fails and the caller must sign in again
pub type LogoutFn = Arc<dyn Fn() + Send + Sync>;

/// An opaque bearer credential
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "Token({visible}…)")
    }
}

struct Credentials {
    logout: LogoutFn,
    source: Arc<dyn TokenSource>,
    token: Token,
}

/// Holds the current token and the callbacks needed to refresh it or
/// log the caller out.
///
/// Every mutation replaces the whole credential set under one write lock,
/// so readers never observe a token paired with a stale callback.
#[derive(Default)]
pub struct TokenStore {
    credentials: RwLock<Option<Credentials>>,
}

impl TokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the token, refresh source and logout callback together.
    pub async fn set_credentials(
        &self,
        token: Token,
        source: Arc<dyn TokenSource>,
        logout: LogoutFn,
    ) {
        *self.credentials.write().await = Some(Credentials {
            logout,
            source,
            token,
        });
        debug!("Credentials replaced");
    }

    pub async fn token(&self) -> Option<Token> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(|c| c.token.clone())
    }

    pub async fn has_credentials(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// Store a refreshed token, keeping the registered callbacks.
    pub async fn set_token(&self, token: Token) {
        match self.credentials.write().await.as_mut() {
            Some(credentials) => credentials.token = token,
            None => warn!("Discarding refreshed token: no credentials are set"),
        }
    }

    /// Ask the registered source for a fresh token.
    ///
    /// Does not store the result; the refresh queue does that once it
    /// decides the refresh succeeded.
    pub async fn refresh(&self) -> Result<Token, RefreshError> {
        let source = self
            .credentials
            .read()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.source))
            .ok_or(RefreshError::NoCredentials)?;

        source
            .request_token()
            .await?
            .filter(|t| !t.is_empty())
            .map(Token::from)
            .ok_or(RefreshError::NoToken)
    }

    /// Drop the credentials and run the logout callback.
    pub async fn logout(&self) {
        let credentials = self.credentials.write().await.take();
        if let Some(credentials) = credentials {
            (credentials.logout)();
        }
    }

    /// Drop the credentials without notifying anyone.
    pub async fn clear(&self) {
        self.credentials.write().await.take();
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}
