//! Prefix cache for employee search results
//!
//! Entries are keyed by normalized search prefix. A longer query can be
//! answered from a shorter prefix's entry by filtering locally, but only
//! when that entry holds the complete result set (it was not cut off by
//! the page limit).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One employee in a search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeHit {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl EmployeeHit {
    /// True when the email, the full name, or any word of the name starts
    /// with `prefix`.
    ///
    /// `prefix` must already be normalized.
    pub fn matches(&self, prefix: &str) -> bool {
        self.email.to_lowercase().starts_with(prefix)
            || self.name.as_deref().is_some_and(|name| {
                let name = name.to_lowercase();
                name.starts_with(prefix)
                    || name.split_whitespace().any(|word| word.starts_with(prefix))
            })
    }
}

/// One page of search results as returned by the directory service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    /// More matches exist beyond the page limit
    #[serde(default, rename = "hasMore", alias = "has_more")]
    pub has_more: bool,
    #[serde(default)]
    pub results: Vec<EmployeeHit>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    page: SearchPage,
}

/// Lowercase and trim a raw query into a cache key.
pub fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

#[derive(Debug)]
pub struct PrefixCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl PrefixCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.fetched_at) < self.ttl
    }

    /// Look up `prefix` (normalized) as of `now`.
    ///
    /// An exact fresh entry is returned as is. Otherwise the longest fresh,
    /// complete entry for a shorter prefix is filtered down to `prefix`.
    pub fn get(&self, prefix: &str, now: Instant) -> Option<SearchPage> {
        if let Some(entry) = self.entries.get(prefix) {
            if self.is_fresh(entry, now) {
                return Some(entry.page.clone());
            }
        }

        let shorter = (1..prefix.len())
            .rev()
            .filter(|&i| prefix.is_char_boundary(i))
            .map(|i| &prefix[..i]);

        for candidate in shorter {
            let Some(entry) = self.entries.get(candidate) else {
                continue;
            };
            if entry.page.has_more || !self.is_fresh(entry, now) {
                continue;
            }

            let results = entry
                .page
                .results
                .iter()
                .filter(|hit| hit.matches(prefix))
                .cloned()
                .collect();
            return Some(SearchPage {
                has_more: false,
                results,
            });
        }

        None
    }

    pub fn insert(&mut self, prefix: impl Into<String>, page: SearchPage, now: Instant) {
        self.entries.insert(
            prefix.into(),
            CacheEntry {
                fetched_at: now,
                page,
            },
        );
    }

    pub fn invalidate(&mut self, prefix: &str) -> bool {
        self.entries.remove(prefix).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop stale entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.fetched_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
