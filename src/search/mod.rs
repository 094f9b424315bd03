//! Employee directory search with a prefix cache
//!
//! Each keystroke issues a search for the current prefix. Answers come from
//! the cache when possible; otherwise the directory service is queried and
//! any older search still in flight is cancelled, since its answer would be
//! for a prefix the user has already typed past.

pub mod cache;

pub use cache::{normalize, EmployeeHit, PrefixCache, SearchPage};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::gateway::{encode_component, Gateway, RequestError, RequestSpec};

pub struct EmployeeSearch {
    cache: Mutex<PrefixCache>,
    gateway: Arc<Gateway>,
    in_flight: Mutex<Option<CancellationToken>>,
    page_limit: usize,
    path: String,
}

impl EmployeeSearch {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let ttl = gateway.config().search.cache_ttl();
        Self::with_cache_ttl(gateway, ttl)
    }

    pub fn with_cache_ttl(gateway: Arc<Gateway>, ttl: Duration) -> Self {
        let search = &gateway.config().search;
        let page_limit = search.page_limit;
        let path = search.path.clone();

        Self {
            cache: Mutex::new(PrefixCache::new(ttl)),
            gateway,
            in_flight: Mutex::new(None),
            page_limit,
            path,
        }
    }

    /// Search the directory for `query`.
    ///
    /// Returns `RequestError::Cancelled` when a newer search superseded this
    /// one before it completed.
    pub async fn search(&self, query: &str) -> Result<SearchPage, RequestError> {
        let prefix = normalize(query);
        if prefix.is_empty() {
            return Ok(SearchPage::default());
        }

        if let Some(page) = self.cache.lock().await.get(&prefix, Instant::now()) {
            debug!(prefix = %prefix, results = page.results.len(), "Search served from cache");
            return Ok(page);
        }

        let cancel = CancellationToken::new();
        if let Some(previous) = self.in_flight.lock().await.replace(cancel.clone()) {
            previous.cancel();
        }

        let url = format!(
            "{}?q={}&limit={}",
            self.path,
            encode_component(&prefix),
            self.page_limit
        );
        let page: SearchPage = self
            .gateway
            .request_json(RequestSpec::get(url).cancel_on(cancel))
            .await?;

        debug!(prefix = %prefix, results = page.results.len(), has_more = page.has_more, "Search fetched");
        self.cache
            .lock()
            .await
            .insert(prefix, page.clone(), Instant::now());
        Ok(page)
    }

    /// Forget every cached result, e.g. after the directory changed.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.lock().await.purge_expired(Instant::now())
    }
}
