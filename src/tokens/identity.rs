//! Identity token claims
//!
//! The identity token is a compact `header.payload.signature` string. The
//! client only reads the payload to learn who the caller is; signature
//! verification is the server's job.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Token is not a three-segment compact token")]
    Malformed,
    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("Token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Claims carried in the identity token payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry as seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    /// Group memberships used for authorization checks
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl IdentityClaims {
    /// Decode the payload segment of a compact token.
    pub fn decode(token: &str) -> Result<Self, IdentityError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => return Err(IdentityError::Malformed),
        };

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The caller's email, falling back to `sub` when no email claim exists.
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .or(self.sub.as_deref())
            .filter(|e| !e.is_empty())
    }

    pub fn display_name(&self) -> Option<String> {
        match (self.given_name.as_deref(), self.family_name.as_deref()) {
            (Some(given), Some(family)) => Some(format!("{given} {family}")),
            (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Tokens without an `exp` claim never expire on the client side.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::encode_token;

    #[test]
    fn test_decode_claims() {
        let token = encode_token(&serde_json::json!({
            "given_name": "Ada",
            "family_name": "Lovelace",
            "email": "ada@example.com",
            "groups": ["hr-admins", "staff"],
        }));

        let claims = IdentityClaims::decode(&token).unwrap();
        assert_eq!(claims.email(), Some("ada@example.com"));
        assert_eq!(claims.display_name().as_deref(), Some("Ada Lovelace"));
        assert!(claims.has_group("hr-admins"));
        assert!(!claims.has_group("finance"));
    }

    #[test]
    fn test_email_falls_back_to_sub() {
        let token = encode_token(&serde_json::json!({ "sub": "svc-account@example.com" }));

        let claims = IdentityClaims::decode(&token).unwrap();
        assert_eq!(claims.email(), Some("svc-account@example.com"));
        assert!(claims.display_name().is_none());
        assert!(claims.groups.is_empty());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let token = encode_token(&serde_json::json!({
            "email": "a@example.com",
            "exp": now.timestamp() - 10,
        }));
        assert!(IdentityClaims::decode(&token).unwrap().is_expired_at(now));

        let token = encode_token(&serde_json::json!({
            "email": "a@example.com",
            "exp": now.timestamp() + 600,
        }));
        assert!(!IdentityClaims::decode(&token).unwrap().is_expired_at(now));

        let token = encode_token(&serde_json::json!({ "email": "a@example.com" }));
        assert!(!IdentityClaims::decode(&token).unwrap().is_expired_at(now));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(
            IdentityClaims::decode("opaque-token"),
            Err(IdentityError::Malformed)
        ));
        assert!(matches!(
            IdentityClaims::decode("a..c"),
            Err(IdentityError::Malformed)
        ));
        assert!(matches!(
            IdentityClaims::decode("a.b.c.d"),
            Err(IdentityError::Malformed)
        ));
        assert!(matches!(
            IdentityClaims::decode("a.!!!.c"),
            Err(IdentityError::Encoding(_))
        ));
    }
}
