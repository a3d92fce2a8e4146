//! Rolling performance statistics shared by every engine operation.
//!
//! Counters are atomic; the rolling averages live behind short-critical-
//! section mutexes and are updated incrementally, never by replaying
//! history. Snapshot reads are consistent per field but deliberately not
//! linearizable with concurrent writers.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Which way bytes moved, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Bytes pulled from a mirror.
    Download,
    /// Bytes pushed onward to a consumer (e.g. re-serving a retrieved file).
    Upload,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Incrementally maintained mean: `avg += (x - avg) / count`.
#[derive(Debug, Default)]
pub(crate) struct AvgCell {
    count: u64,
    avg: f64,
}

impl AvgCell {
    pub(crate) fn update(&mut self, value: f64) {
        self.count += 1;
        self.avg += (value - self.avg) / self.count as f64;
    }

    pub(crate) fn average(&self) -> f64 {
        self.avg
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Aggregated, read-only view of the tracker at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub searches_total: u64,
    pub searches_ok: u64,
    pub searches_failed: u64,
    /// Mean wall-clock time of completed searches.
    pub avg_search_time: Duration,
    pub downloads_total: u64,
    pub uploads_total: u64,
    /// Mean observed download throughput in bytes/sec.
    pub avg_download_speed: f64,
    /// Mean observed upload throughput in bytes/sec.
    pub avg_upload_speed: f64,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
}

/// Cross-cutting statistics sink. One instance lives on the engine and is
/// shared (via `Arc`) with components that record outcomes.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    searches_total: AtomicU64,
    searches_ok: AtomicU64,
    searches_failed: AtomicU64,
    downloads_total: AtomicU64,
    uploads_total: AtomicU64,
    bytes_downloaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    avg_search_time: Mutex<AvgCell>,
    avg_download_speed: Mutex<AvgCell>,
    avg_upload_speed: Mutex<AvgCell>,
}

impl PerformanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed search attempt (successful or not) and folds
    /// its duration into the rolling average.
    pub fn record_search(&self, duration: Duration, success: bool) {
        self.searches_total.fetch_add(1, Ordering::SeqCst);
        if success {
            self.searches_ok.fetch_add(1, Ordering::SeqCst);
        } else {
            self.searches_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.avg_search_time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .update(duration.as_secs_f64());
    }

    /// Records one completed transfer. Throughput only contributes to the
    /// average when the duration is measurable.
    pub fn record_transfer(&self, direction: TransferDirection, bytes: u64, duration: Duration) {
        let (total, byte_total, avg) = match direction {
            TransferDirection::Download => (
                &self.downloads_total,
                &self.bytes_downloaded,
                &self.avg_download_speed,
            ),
            TransferDirection::Upload => (
                &self.uploads_total,
                &self.bytes_uploaded,
                &self.avg_upload_speed,
            ),
        };
        total.fetch_add(1, Ordering::SeqCst);
        byte_total.fetch_add(bytes, Ordering::SeqCst);

        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            avg.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .update(bytes as f64 / secs);
        }
    }

    /// Returns the current aggregated view. Counts are monotonically
    /// non-decreasing across successive snapshots within one process.
    #[must_use]
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let avg_search = self
            .avg_search_time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .average();
        let avg_down = self
            .avg_download_speed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .average();
        let avg_up = self
            .avg_upload_speed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .average();

        PerformanceSnapshot {
            searches_total: self.searches_total.load(Ordering::SeqCst),
            searches_ok: self.searches_ok.load(Ordering::SeqCst),
            searches_failed: self.searches_failed.load(Ordering::SeqCst),
            avg_search_time: Duration::from_secs_f64(avg_search.max(0.0)),
            downloads_total: self.downloads_total.load(Ordering::SeqCst),
            uploads_total: self.uploads_total.load(Ordering::SeqCst),
            avg_download_speed: avg_down,
            avg_upload_speed: avg_up,
            bytes_downloaded: self.bytes_downloaded.load(Ordering::SeqCst),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_record_search_counts_success_and_failure_separately() {
        let tracker = PerformanceTracker::new();
        tracker.record_search(Duration::from_millis(100), true);
        tracker.record_search(Duration::from_millis(200), true);
        tracker.record_search(Duration::from_millis(300), false);

        let snap = tracker.snapshot();
        assert_eq!(snap.searches_total, 3);
        assert_eq!(snap.searches_ok, 2);
        assert_eq!(snap.searches_failed, 1);
    }

    #[test]
    fn test_incremental_average_matches_arithmetic_mean() {
        let tracker = PerformanceTracker::new();
        tracker.record_search(Duration::from_secs(1), true);
        tracker.record_search(Duration::from_secs(2), true);
        tracker.record_search(Duration::from_secs(6), true);

        let snap = tracker.snapshot();
        let avg = snap.avg_search_time.as_secs_f64();
        assert!((avg - 3.0).abs() < 1e-9, "avg was {avg}");
    }

    #[test]
    fn test_record_transfer_separates_directions() {
        let tracker = PerformanceTracker::new();
        tracker.record_transfer(TransferDirection::Download, 2048, Duration::from_secs(1));
        tracker.record_transfer(TransferDirection::Upload, 512, Duration::from_secs(1));

        let snap = tracker.snapshot();
        assert_eq!(snap.downloads_total, 1);
        assert_eq!(snap.uploads_total, 1);
        assert_eq!(snap.bytes_downloaded, 2048);
        assert_eq!(snap.bytes_uploaded, 512);
        assert!((snap.avg_download_speed - 2048.0).abs() < 1e-9);
        assert!((snap.avg_upload_speed - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_transfer_counts_bytes_but_skips_average() {
        let tracker = PerformanceTracker::new();
        tracker.record_transfer(TransferDirection::Download, 1024, Duration::ZERO);

        let snap = tracker.snapshot();
        assert_eq!(snap.downloads_total, 1);
        assert_eq!(snap.bytes_downloaded, 1024);
        assert!((snap.avg_download_speed - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counts_are_monotone_under_concurrent_updates() {
        let tracker = Arc::new(PerformanceTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    tracker.record_search(Duration::from_millis(10), true);
                    tracker.record_transfer(
                        TransferDirection::Download,
                        100,
                        Duration::from_millis(10),
                    );
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = tracker.snapshot();
        assert_eq!(snap.searches_total, 2000);
        assert_eq!(snap.downloads_total, 2000);
        assert_eq!(snap.bytes_downloaded, 200_000);
    }
}
