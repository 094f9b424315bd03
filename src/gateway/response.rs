//! Response body handling
//!
//! Services answer with arbitrary JSON. Errors carry their reason either
//! flat (`{"error": ..}` / `{"message": ..}`) or in a JSend fail envelope
//! (`{"status": "fail", "data": {"message": ..}}`).

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// A received response: status plus the parsed body.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub body: Value,
    pub status: StatusCode,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    data: Option<FailData>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailData {
    #[serde(default)]
    message: Option<String>,
}

/// Parse a body as JSON; empty or malformed bodies become `{}`.
pub(crate) fn parse_body(status: StatusCode, bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }

    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!(status = %status, error = %e, "Response body is not JSON, substituting empty body");
            Value::Object(Map::new())
        }
    }
}

/// Best human-readable reason for a failed response.
pub(crate) fn error_message(status: StatusCode, body: &Value) -> String {
    let parsed = ErrorBody::deserialize(body).unwrap_or_default();

    let from_error = parsed.error.and_then(|e| match e {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    });

    from_error
        .or(parsed.message)
        .or(parsed.data.and_then(|d| d.message))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(StatusCode::OK, br#"{"id":1}"#), json!({"id": 1}));
        assert_eq!(parse_body(StatusCode::OK, b""), json!({}));
        assert_eq!(parse_body(StatusCode::OK, b"  \n"), json!({}));
        assert_eq!(parse_body(StatusCode::BAD_GATEWAY, b"<html>oops</html>"), json!({}));
        assert_eq!(parse_body(StatusCode::OK, b"[1,2]"), json!([1, 2]));
    }

    #[test]
    fn test_error_message_sources() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(status, &json!({"error": "bad date"})), "bad date");
        assert_eq!(error_message(status, &json!({"message": "too long"})), "too long");
        assert_eq!(
            error_message(status, &json!({"status": "fail", "data": {"message": "no seats"}})),
            "no seats"
        );
        assert_eq!(
            error_message(status, &json!({"error": {"code": 7}})),
            r#"{"code":7}"#
        );
    }

    #[test]
    fn test_error_message_prefers_error_over_message() {
        let body = json!({"error": "first", "message": "second"});
        assert_eq!(error_message(StatusCode::CONFLICT, &body), "first");
    }

    #[test]
    fn test_error_message_falls_back_to_reason() {
        assert_eq!(error_message(StatusCode::NOT_FOUND, &json!({})), "Not Found");
        assert_eq!(error_message(StatusCode::NOT_FOUND, &json!([1])), "Not Found");
        assert_eq!(
            error_message(StatusCode::from_u16(599).unwrap(), &json!({"message": ""})),
            "HTTP 599"
        );
    }
}
