//! auth-gateway - Bearer-authenticated JSON request gateway for intranet apps
//!
//! This crate lets client applications call REST services without handling
//! token refresh themselves:
//! - Token store holding the current token plus refresh/logout callbacks
//! - Single-flight refresh queue (one refresh per wave of rejected requests)
//! - Request executor with bounded, backed-off retries
//! - `[email]` URL templating from the identity token
//! - Employee directory search with a TTL prefix cache

pub mod config;
pub mod gateway;
pub mod refresh;
pub mod search;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

pub use config::Config;
pub use gateway::{Gateway, Method, RequestError, RequestSpec};
pub use tokens::{Token, TokenStore};
