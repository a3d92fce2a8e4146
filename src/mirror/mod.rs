//! Mirror catalogue and per-mirror health statistics.
//!
//! The registry owns the ordered lists of search and download mirrors plus
//! a [`MirrorStat`] per mirror. It never performs I/O itself; callers feed
//! attempt outcomes back via [`MirrorRegistry::record_outcome`] and the
//! accumulated stats feed the iteration order for subsequent operations.

pub mod profile;

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::stats::AvgCell;

/// Protocol role a mirror plays. Search mirrors serve result tables;
/// download mirrors serve identifier lookup pages and file bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirrorRole {
    Search,
    Download,
}

impl fmt::Display for MirrorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// One configured mirror endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    /// Short name: the URL host, plus the port when the URL carries an
    /// explicit one (e.g. "libgen.rs", "192.168.0.9:8080"). Two mirrors on
    /// the same host but different ports stay distinguishable.
    pub name: String,
    /// Base URL all mirror-relative paths are joined against.
    pub base_url: Url,
    pub role: MirrorRole,
    /// Configured priority band; lower sorts first. Mirrors sharing a band
    /// are reordered by observed health.
    pub priority: u32,
    /// Position in the configured list, the final ordering tiebreak.
    pub config_index: usize,
}

impl Mirror {
    #[must_use]
    pub fn new(base_url: Url, role: MirrorRole, priority: u32, config_index: usize) -> Self {
        let host = base_url.host_str().unwrap_or("unknown");
        let name = match base_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Self {
            name,
            base_url,
            role,
            priority,
            config_index,
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.role)
    }
}

/// Rolling health numbers for one mirror. All updates are atomic; the
/// latency average uses the same incremental rule as the global tracker.
#[derive(Debug, Default)]
pub struct MirrorStat {
    successes: AtomicU64,
    failures: AtomicU64,
    latency: Mutex<AvgCell>,
}

impl MirrorStat {
    fn record(&self, success: bool, latency: Duration) {
        if success {
            self.successes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        self.latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .update(latency.as_secs_f64());
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.successes() + self.failures()
    }

    /// Mean attempt latency; zero until an outcome has been recorded.
    #[must_use]
    pub fn avg_latency(&self) -> Duration {
        let cell = self
            .latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if cell.count() == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(cell.average().max(0.0))
        }
    }

    /// Failure rate bucketed into quarters. Mirrors in the same band count
    /// as having comparable failure rates for ordering purposes.
    fn failure_band(&self) -> u64 {
        let attempts = self.attempts();
        if attempts == 0 {
            return 0;
        }
        (self.failures() * 4) / attempts
    }
}

/// Read-only per-mirror report for diagnostics and CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorReport {
    pub name: String,
    pub url: String,
    pub role: MirrorRole,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency: Duration,
}

#[derive(Debug)]
struct MirrorEntry {
    mirror: Mirror,
    stat: MirrorStat,
}

/// Ordered catalogue of mirrors with health bookkeeping.
///
/// The mirror list is fixed at construction; only the stats mutate, and
/// those through atomics, so the registry is shared freely across tasks.
pub struct MirrorRegistry {
    entries: Vec<MirrorEntry>,
}

impl MirrorRegistry {
    /// Builds the registry from already-validated mirror URL lists. Each
    /// list's order becomes the configured order within its role.
    #[must_use]
    pub fn new(search_mirrors: Vec<Url>, download_mirrors: Vec<Url>) -> Self {
        let mut entries = Vec::with_capacity(search_mirrors.len() + download_mirrors.len());
        for (index, url) in search_mirrors.into_iter().enumerate() {
            entries.push(MirrorEntry {
                mirror: Mirror::new(url, MirrorRole::Search, 0, index),
                stat: MirrorStat::default(),
            });
        }
        for (index, url) in download_mirrors.into_iter().enumerate() {
            entries.push(MirrorEntry {
                mirror: Mirror::new(url, MirrorRole::Download, 0, index),
                stat: MirrorStat::default(),
            });
        }
        Self { entries }
    }

    /// Returns the mirrors for a role in attempt order.
    ///
    /// Ordering rule: configured priority band first, then failure band,
    /// then average observed latency ascending, then configured position.
    /// A mirror nobody has tried yet reports zero latency, so it keeps its
    /// configured position at the head of its band.
    #[must_use]
    pub fn ordered_mirrors(&self, role: MirrorRole) -> Vec<Mirror> {
        let mut candidates: Vec<&MirrorEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.mirror.role == role)
            .collect();
        candidates.sort_by_key(|entry| {
            (
                entry.mirror.priority,
                entry.stat.failure_band(),
                entry.stat.avg_latency(),
                entry.mirror.config_index,
            )
        });
        candidates.into_iter().map(|entry| entry.mirror.clone()).collect()
    }

    /// Feeds one attempt outcome back into the mirror's stats.
    ///
    /// Keyed by role and name: a host configured as both a search and a
    /// download mirror keeps separate health books per role. Unknown
    /// mirrors are ignored (logged); stats never go half-updated.
    pub fn record_outcome(&self, role: MirrorRole, mirror_name: &str, success: bool, latency: Duration) {
        let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.mirror.role == role && entry.mirror.name == mirror_name)
        else {
            debug!(mirror = mirror_name, %role, "outcome for unknown mirror dropped");
            return;
        };
        entry.stat.record(success, latency);
        debug!(
            mirror = mirror_name,
            %role,
            success,
            latency_ms = latency.as_millis(),
            "mirror outcome recorded"
        );
    }

    /// Stats for one mirror by role and name.
    #[must_use]
    pub fn stat(&self, role: MirrorRole, mirror_name: &str) -> Option<&MirrorStat> {
        self.entries
            .iter()
            .find(|entry| entry.mirror.role == role && entry.mirror.name == mirror_name)
            .map(|entry| &entry.stat)
    }

    /// Per-mirror reports for every configured mirror, in configured order.
    #[must_use]
    pub fn reports(&self) -> Vec<MirrorReport> {
        self.entries
            .iter()
            .map(|entry| MirrorReport {
                name: entry.mirror.name.clone(),
                url: entry.mirror.base_url.to_string(),
                role: entry.mirror.role,
                successes: entry.stat.successes(),
                failures: entry.stat.failures(),
                avg_latency: entry.stat.avg_latency(),
            })
            .collect()
    }
}

impl fmt::Debug for MirrorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorRegistry")
            .field("mirrors", &self.entries.len())
            .finish_non_exhaustive()
    }
}
