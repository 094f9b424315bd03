use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL that relative request paths are joined to
    pub base_url: String,
    pub environment: Environment,
    /// Endpoint that hands out fresh tokens (optional)
    pub refresh_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Environment::Production,
            "stage" | "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Environment::Development => "http://localhost:8080/api",
            Environment::Staging => "https://staging.intranet.internal/api",
            Environment::Production => "https://intranet.internal/api",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First backoff delay, doubled on every further attempt
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
    /// Attempts per request, including the first
    pub max_tries: u32,
    /// Route first attempts through the refresh queue even when idle
    pub queue_all_requests: bool,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub cache_ttl_seconds: u64,
    pub page_limit: usize,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub refresh_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Environment::Development.default_base_url().to_string(),
            environment: Environment::Development,
            refresh_url: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 200,
            backoff_max_ms: 5_000,
            max_tries: 4,
            queue_all_requests: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300, // 5 minutes
            page_limit: 20,
            path: "/employees/search".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_ms: 15_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.backoff_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

impl SearchConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("GATEWAY_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or_default();

        let base_url = std::env::var("API_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| environment.default_base_url().to_string());

        let refresh_url = std::env::var("REFRESH_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let retry_defaults = RetryConfig::default();
        let search_defaults = SearchConfig::default();
        let timeout_defaults = TimeoutConfig::default();

        let queue_all_requests = std::env::var("QUEUE_ALL_REQUESTS")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(retry_defaults.queue_all_requests);

        let config = Config {
            api: ApiConfig {
                base_url,
                environment,
                refresh_url,
            },
            retry: RetryConfig {
                backoff_ms: env_parse("RETRY_BACKOFF_MS").unwrap_or(retry_defaults.backoff_ms),
                backoff_max_ms: env_parse("RETRY_BACKOFF_MAX_MS")
                    .unwrap_or(retry_defaults.backoff_max_ms),
                max_tries: env_parse("MAX_TRIES").unwrap_or(retry_defaults.max_tries),
                queue_all_requests,
            },
            search: SearchConfig {
                cache_ttl_seconds: env_parse("SEARCH_CACHE_TTL_SECONDS")
                    .unwrap_or(search_defaults.cache_ttl_seconds),
                page_limit: env_parse("SEARCH_PAGE_LIMIT").unwrap_or(search_defaults.page_limit),
                path: std::env::var("SEARCH_PATH").unwrap_or(search_defaults.path),
            },
            timeouts: TimeoutConfig {
                refresh_timeout_ms: env_parse("REFRESH_TIMEOUT_MS")
                    .unwrap_or(timeout_defaults.refresh_timeout_ms),
                request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS")
                    .unwrap_or(timeout_defaults.request_timeout_ms),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults for the given base URL, without reading the environment.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Config {
            api: ApiConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            retry: RetryConfig::default(),
            search: SearchConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_tries == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_TRIES must be at least 1".to_string(),
            ));
        }

        match reqwest::Url::parse(&self.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "API base URL '{}' is not an absolute http(s) URL",
                    self.api.base_url
                )))
            }
        }

        if self.search.page_limit == 0 {
            return Err(ConfigError::ValidationError(
                "SEARCH_PAGE_LIMIT must be greater than zero".to_string(),
            ));
        }

        if self.retry.backoff_ms > self.retry.backoff_max_ms {
            tracing::warn!(
                backoff_ms = self.retry.backoff_ms,
                backoff_max_ms = self.retry.backoff_max_ms,
                "Retry backoff exceeds its cap; every retry will wait the cap"
            );
        }

        if self.api.environment == Environment::Production
            && self.api.base_url.starts_with("http://")
        {
            tracing::warn!(
                base_url = %self.api.base_url,
                "Production base URL is not HTTPS; bearer tokens will travel in clear text"
            );
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
