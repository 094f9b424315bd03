//! Request descriptions and URL resolution

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::RequestError;

/// Placeholder in request URLs replaced by the caller's email
pub const EMAIL_PLACEHOLDER: &str = "[email]";

/// Characters left alone by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Observes the loading transition of a request: `true` when it starts,
/// `false` once it has settled.
pub type LoadingFn = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Delete => reqwest::Method::DELETE,
            Method::Get => reqwest::Method::GET,
            Method::Patch => reqwest::Method::PATCH,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DELETE" => Ok(Method::Delete),
            "GET" => Ok(Method::Get),
            "PATCH" => Ok(Method::Patch),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            other => Err(format!("unsupported method '{other}'")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call through the gateway.
#[derive(Clone)]
pub struct RequestSpec {
    pub body: Option<Value>,
    /// Cancelling this token abandons the call without an outcome
    pub cancel: Option<CancellationToken>,
    /// Merged over the default content-type and authorization headers
    pub headers: Vec<(String, String)>,
    pub loading: Option<LoadingFn>,
    pub method: Method,
    /// Absolute URL, or a path relative to the configured base URL
    pub url: String,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            body: None,
            cancel: None,
            headers: Vec::new(),
            loading: None,
            method,
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url).json(body)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn on_loading(mut self, loading: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.loading = Some(Arc::new(loading));
        self
    }

    pub fn cancel_on(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn needs_identity(&self) -> bool {
        self.url.contains(EMAIL_PLACEHOLDER)
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("has_body", &self.body.is_some())
            .field("headers", &self.headers.len())
            .finish()
    }
}

/// Percent-encode a single URL component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Substitute the email placeholder and join relative paths to `base_url`.
pub(crate) fn resolve_url(
    base_url: &str,
    url: &str,
    email: Option<&str>,
) -> Result<reqwest::Url, RequestError> {
    let url = if url.contains(EMAIL_PLACEHOLDER) {
        let email = email.ok_or(RequestError::MissingIdentity)?;
        url.replace(EMAIL_PLACEHOLDER, &encode_component(email))
    } else {
        url.to_string()
    };

    let full = if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    };

    reqwest::Url::parse(&full).map_err(|e| RequestError::InvalidUrl(format!("{full}: {e}")))
}
