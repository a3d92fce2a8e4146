//! Session-scoped result cache keyed by normalized query.
//!
//! Entries expire after a fixed TTL. Expiry is lazy: a stale entry is
//! dropped when a lookup trips over it, and [`ResultCache::sweep`] exists
//! for callers that want to reclaim memory proactively. There is no
//! persistence; the cache dies with the engine.
//!
//! Concurrent misses for the same key are NOT coalesced: both callers
//! fetch, and the later insert replaces the earlier one. Searches are
//! idempotent reads, so the only cost is a duplicate upstream query, and
//! the cache stays free of cross-task bookkeeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::record::{SearchQuery, SearchResult};

struct CacheEntry {
    result: Arc<SearchResult>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// Concurrent TTL cache for search results.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fresh entry for the key, or `None`. Trips lazy expiry on stale hits.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<SearchResult>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now, self.ttl) {
                return Some(Arc::clone(&entry.result));
            }
        }
        // Re-checks expiry, so a concurrent fresh replacement survives.
        let evicted = self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now, self.ttl));
        if evicted.is_some() {
            debug!(key, "evicted expired cache entry");
        }
        None
    }

    pub fn insert(&self, key: String, result: Arc<SearchResult>) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
            },
        );
    }

    /// Cached result for the query, or the result of `fetch`, which is
    /// stored before being returned. Two tasks missing simultaneously both
    /// run their fetch; see the module docs for why that stands.
    ///
    /// # Errors
    ///
    /// Propagates whatever `fetch` fails with. Nothing is cached on error.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        query: &SearchQuery,
        fetch: F,
    ) -> Result<Arc<SearchResult>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchResult, E>>,
    {
        let key = query.cache_key();
        if let Some(hit) = self.get(&key) {
            debug!(key = %key, "cache hit");
            return Ok(hit);
        }
        let result = Arc::new(fetch().await?);
        self.insert(key, Arc::clone(&result));
        Ok(result)
    }

    /// Drops every expired entry, returning how many went.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            debug!(swept, remaining = self.entries.len(), "cache sweep");
        }
        swept
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
