//! The engine: one façade over search, resolution, and retrieval.
//!
//! An [`Engine`] owns the shared HTTP transport, the mirror registry, the
//! result cache, and the performance tracker, and wires them into the
//! per-operation components. Construction validates the configuration and
//! builds the HTTP client once; everything after that is cheap to clone
//! out of the engine's `Arc`-shared internals.
//!
//! # Example
//!
//! ```no_run
//! use bookfetch_core::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let result = engine.search("dune herbert", 10).await?;
//! for record in &result.records {
//!     println!("{record}");
//! }
//! if let Some(id) = result.records.first().and_then(|r| r.identifier.clone()) {
//!     let candidates = engine.resolve_download_links(&id).await?;
//!     let blob = engine.retrieve_file(&candidates).await?;
//!     println!("got {} ({} bytes)", blob.filename, blob.observed_size());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::{ConfigError, EngineConfig};
use crate::http::{HttpError, HttpTransport};
use crate::mirror::profile::ProfileSet;
use crate::mirror::{MirrorReport, MirrorRegistry, MirrorRole};
use crate::record::{SearchQuery, SearchResult};
use crate::resolve::{DownloadCandidateSet, LinkResolver, ResolveError};
use crate::retrieve::{
    FileBlob, FileRetriever, ProgressSender, RetrievalConstraints, RetrieveError,
};
use crate::search::{QueryExecutor, ResultCache, SearchError};
use crate::stats::{PerformanceSnapshot, PerformanceTracker};

/// Error building an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration failed validation.
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed.
    #[error("transport setup failed: {0}")]
    Transport(#[from] HttpError),
}

/// Records a search outcome exactly once. A future dropped mid-flight
/// counts as a failed attempt; stats never miss an attempt that started.
struct SearchOutcomeGuard {
    tracker: Arc<PerformanceTracker>,
    started: Instant,
    armed: bool,
}

impl SearchOutcomeGuard {
    fn new(tracker: Arc<PerformanceTracker>) -> Self {
        Self {
            tracker,
            started: Instant::now(),
            armed: true,
        }
    }

    fn finish(mut self, success: bool) {
        self.armed = false;
        self.tracker.record_search(self.started.elapsed(), success);
    }
}

impl Drop for SearchOutcomeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.record_search(self.started.elapsed(), false);
        }
    }
}

/// Coordinates search, link resolution, and file retrieval against a set
/// of configured mirrors.
///
/// All state is internally synchronized; share one engine across tasks via
/// `Arc` rather than constructing several (each engine owns its own
/// connection pool and cache).
pub struct Engine {
    config: EngineConfig,
    http: HttpTransport,
    registry: Arc<MirrorRegistry>,
    cache: ResultCache,
    executor: QueryExecutor,
    resolver: LinkResolver,
    retriever: FileRetriever,
    tracker: Arc<PerformanceTracker>,
}

impl Engine {
    /// Validates the configuration and builds the engine.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] when a field is out of range;
    /// [`EngineError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let http = HttpTransport::new(&config)?;
        let registry = Arc::new(MirrorRegistry::new(
            config.search_mirrors.clone(),
            config.download_mirrors.clone(),
        ));
        let profiles = Arc::new(ProfileSet::with_default_profiles());
        let tracker = Arc::new(PerformanceTracker::new());

        let executor = QueryExecutor::new(
            http.clone(),
            Arc::clone(&registry),
            Arc::clone(&profiles),
            &config,
        );
        let resolver = LinkResolver::new(
            http.clone(),
            Arc::clone(&registry),
            Arc::clone(&profiles),
            config.per_attempt_timeout,
        );
        let retriever = FileRetriever::new(http.clone(), Arc::clone(&tracker), &config);

        debug!(
            search_mirrors = config.search_mirrors.len(),
            download_mirrors = config.download_mirrors.len(),
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "engine ready"
        );
        Ok(Self {
            cache: ResultCache::new(config.cache_ttl),
            config,
            http,
            registry,
            executor,
            resolver,
            retriever,
            tracker,
        })
    }

    /// The validated configuration this engine runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Searches the configured mirrors for `query`, returning at most
    /// `max_results` records.
    ///
    /// Results are cached by normalized query text and result bound; a
    /// fresh cache entry is returned without touching the network and
    /// without counting toward search statistics.
    ///
    /// # Errors
    ///
    /// [`SearchError::InvalidQuery`] when the query is blank or
    /// `max_results` is zero; [`SearchError::Exhausted`] when every mirror
    /// failed, carrying one diagnostic per mirror.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Arc<SearchResult>, SearchError> {
        let query = SearchQuery::new(query, max_results);
        if query.is_empty() {
            return Err(SearchError::invalid_query(
                "query is empty after trimming whitespace",
            ));
        }
        if query.max_results == 0 {
            return Err(SearchError::invalid_query("max_results must be at least 1"));
        }

        self.cache
            .get_or_fetch(&query, || async {
                let guard = SearchOutcomeGuard::new(Arc::clone(&self.tracker));
                let outcome = self.executor.execute(&query).await;
                guard.finish(outcome.is_ok());
                outcome
            })
            .await
    }

    /// Resolves download candidates for a 32-hex-character identifier by
    /// querying every download mirror concurrently.
    ///
    /// # Errors
    ///
    /// [`ResolveError::InvalidIdentifier`] for malformed input;
    /// [`ResolveError::NoCandidates`] when no mirror produced a link,
    /// with one diagnostic per mirror tried.
    pub async fn resolve_download_links(
        &self,
        identifier: &str,
    ) -> Result<DownloadCandidateSet, ResolveError> {
        self.resolver.resolve(identifier).await
    }

    /// Downloads and validates a file from the candidate set, using the
    /// size and type bounds from the engine configuration.
    ///
    /// # Errors
    ///
    /// See [`FileRetriever::retrieve`].
    pub async fn retrieve_file(
        &self,
        candidates: &DownloadCandidateSet,
    ) -> Result<FileBlob, RetrieveError> {
        let constraints = RetrievalConstraints::from_config(&self.config);
        self.retriever.retrieve(candidates, &constraints, None).await
    }

    /// [`Engine::retrieve_file`] with explicit constraints and an optional
    /// progress feed for interactive consumers.
    ///
    /// # Errors
    ///
    /// See [`FileRetriever::retrieve`].
    pub async fn retrieve_file_with(
        &self,
        candidates: &DownloadCandidateSet,
        constraints: &RetrievalConstraints,
        progress: Option<&ProgressSender>,
    ) -> Result<FileBlob, RetrieveError> {
        self.retriever.retrieve(candidates, constraints, progress).await
    }

    /// Probes every configured mirror's base URL and returns the updated
    /// per-mirror reports. Outcomes feed the same health stats that order
    /// mirrors for search and resolution.
    #[instrument(skip(self))]
    pub async fn check_mirrors(&self) -> Vec<MirrorReport> {
        let mut mirrors = self.registry.ordered_mirrors(MirrorRole::Search);
        mirrors.extend(self.registry.ordered_mirrors(MirrorRole::Download));

        let probes = mirrors.iter().map(|mirror| async {
            let started = Instant::now();
            let outcome = self.http.probe(&mirror.base_url, self.config.probe_timeout).await;
            let latency = started.elapsed();
            match &outcome {
                Ok(_) => debug!(mirror = %mirror.name, latency_ms = latency.as_millis(), "mirror reachable"),
                Err(e) => debug!(mirror = %mirror.name, error = %e, "mirror unreachable"),
            }
            self.registry
                .record_outcome(mirror.role, &mirror.name, outcome.is_ok(), latency);
        });
        futures_util::future::join_all(probes).await;

        let reports = self.registry.reports();
        info!(mirrors = reports.len(), "mirror check complete");
        reports
    }

    /// Per-mirror health reports without touching the network.
    #[must_use]
    pub fn mirror_reports(&self) -> Vec<MirrorReport> {
        self.registry.reports()
    }

    /// Current aggregated performance counters and averages.
    #[must_use]
    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        self.tracker.snapshot()
    }

    /// Drops every expired cache entry, returning how many were removed.
    /// Expiry is otherwise lazy, checked when an entry is read.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_blank_query_rejected_before_any_network_use() {
        let engine = engine();
        let err = engine.search("   ", 10).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery { .. }));
        assert_eq!(engine.performance_snapshot().searches_total, 0);
    }

    #[tokio::test]
    async fn test_zero_max_results_rejected() {
        let engine = engine();
        let err = engine.search("dune", 0).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = EngineConfig {
            search_mirrors: Vec::new(),
            ..EngineConfig::default()
        };
        let err = Engine::new(config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_reports_cover_both_roles_before_any_traffic() {
        let engine = engine();
        let reports = engine.mirror_reports();
        let config = engine.config();
        assert_eq!(
            reports.len(),
            config.search_mirrors.len() + config.download_mirrors.len()
        );
        assert!(reports.iter().all(|r| r.successes == 0 && r.failures == 0));
    }

    #[test]
    fn test_dropped_search_guard_counts_as_failure() {
        let tracker = Arc::new(PerformanceTracker::new());
        drop(SearchOutcomeGuard::new(Arc::clone(&tracker)));

        let snap = tracker.snapshot();
        assert_eq!(snap.searches_total, 1);
        assert_eq!(snap.searches_failed, 1);
    }

    #[test]
    fn test_finished_search_guard_records_once() {
        let tracker = Arc::new(PerformanceTracker::new());
        let guard = SearchOutcomeGuard::new(Arc::clone(&tracker));
        std::thread::sleep(Duration::from_millis(2));
        guard.finish(true);

        let snap = tracker.snapshot();
        assert_eq!(snap.searches_total, 1);
        assert_eq!(snap.searches_ok, 1);
        assert!(snap.avg_search_time >= Duration::from_millis(1));
    }
}
