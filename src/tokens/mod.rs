pub mod bridge;
pub mod identity;
pub mod store;

pub use bridge::{HttpTokenSource, NoRefresh, TokenSource};
pub use identity::{IdentityClaims, IdentityError};
pub use store::{LogoutFn, Token, TokenStore};

use thiserror::Error;

/// Why a token refresh did not produce a new token.
///
/// Cloneable so one failed refresh can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("No credentials are set")]
    NoCredentials,
    #[error("Token source returned no token")]
    NoToken,
    #[error("Refresh queue is not running")]
    QueueClosed,
    #[error("Token source failed: {0}")]
    Source(String),
    #[error("Token refresh timed out")]
    Timeout,
}
