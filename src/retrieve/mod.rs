//! Validated file retrieval: candidates in, one verified blob out.
//!
//! Candidates are tried strictly in priority order. Each one walks the same
//! path: a HEAD probe gates on declared size before any body byte moves,
//! then the body streams in bounded chunks with a running size check, and
//! the finished bytes face a content sniff against the allowed extensions.
//! Any rejection advances to the next candidate and leaves a reason behind;
//! only when every candidate is spent does the caller see an error, with
//! the full reason trail.
//!
//! Every opened stream is wrapped in a guard that folds its byte count into
//! the performance tracker even when the future is dropped mid-transfer, so
//! cancellation never loses an outcome.

pub mod progress;
pub mod sniff;

pub use progress::{ProgressSender, TransferProgress, progress_channel};
pub use sniff::{SniffedKind, sniff};

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::http::{HttpError, HttpTransport};
use crate::parse::format_bytes;
use crate::resolve::{DownloadCandidateSet, DownloadLink};
use crate::stats::{PerformanceTracker, TransferDirection};

/// Size and type bounds a retrieved file must satisfy.
#[derive(Debug, Clone)]
pub struct RetrievalConstraints {
    /// Smallest acceptable file size in bytes.
    pub min_size: u64,
    /// Largest acceptable file size in bytes.
    pub max_size: u64,
    /// Extensions the sniffed content may legitimately carry.
    pub allowed_extensions: Vec<String>,
}

impl RetrievalConstraints {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            min_size: config.min_file_size,
            max_size: config.max_file_size,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }
}

/// A fully downloaded, validated file with its provenance.
///
/// Ownership moves to the caller; the engine keeps nothing.
#[derive(Debug, Clone)]
pub struct FileBlob {
    /// The file body.
    pub bytes: Vec<u8>,
    /// Best-effort filename: server header, then URL, then synthesized.
    pub filename: String,
    /// Content-Length the server declared, when it declared one.
    pub declared_size: Option<u64>,
    /// What the bytes actually look like.
    pub sniffed: SniffedKind,
    /// The candidate that served the file.
    pub source: DownloadLink,
    /// Wall-clock duration of the body transfer.
    pub elapsed: Duration,
}

impl FileBlob {
    /// Bytes actually received.
    #[must_use]
    pub fn observed_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Transfer rate in bytes per second; zero for degenerate durations.
    #[must_use]
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.observed_size() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Why one candidate was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Probe declared a size above the cap; no body bytes were fetched.
    DeclaredTooLarge { declared: u64, limit: u64 },
    /// Probe declared a size below the floor; no body bytes were fetched.
    DeclaredTooSmall { declared: u64, limit: u64 },
    /// The running byte count crossed the cap mid-stream.
    ObservedTooLarge { received: u64, limit: u64 },
    /// The finished body came in under the floor.
    ObservedTooSmall { observed: u64, limit: u64 },
    /// Sniffed content fits none of the allowed extensions.
    WrongContentType { sniffed: SniffedKind },
    /// Connection-level failure during probe or transfer.
    Transport(String),
    /// Non-success HTTP status during probe or transfer.
    Status(u16),
    /// Probe or transfer exceeded its time bound.
    Timeout(Duration),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeclaredTooLarge { declared, limit } => write!(
                f,
                "declared size {} exceeds limit {}",
                format_bytes(*declared),
                format_bytes(*limit)
            ),
            Self::DeclaredTooSmall { declared, limit } => write!(
                f,
                "declared size {} below minimum {}",
                format_bytes(*declared),
                format_bytes(*limit)
            ),
            Self::ObservedTooLarge { received, limit } => write!(
                f,
                "aborted after {} with limit {}",
                format_bytes(*received),
                format_bytes(*limit)
            ),
            Self::ObservedTooSmall { observed, limit } => write!(
                f,
                "body was {} but minimum is {}",
                format_bytes(*observed),
                format_bytes(*limit)
            ),
            Self::WrongContentType { sniffed } => write!(f, "content looks like {sniffed}"),
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Status(status) => write!(f, "HTTP status {status}"),
            Self::Timeout(timeout) => write!(f, "timed out after {timeout:?}"),
        }
    }
}

/// One entry in the retrieval diagnostic trail.
#[derive(Debug, Clone)]
pub struct CandidateFailure {
    pub url: String,
    pub reason: RejectReason,
}

impl std::fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.url, self.reason)
    }
}

/// Whole-retrieval failure.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The candidate set was empty; nothing was attempted.
    #[error("no download candidates to try")]
    NoCandidates,

    /// Every candidate was rejected. One [`CandidateFailure`] per
    /// candidate, in the order they were attempted.
    #[error("all {} download candidate(s) failed", attempts.len())]
    Exhausted { attempts: Vec<CandidateFailure> },
}

/// Folds stream outcomes into the tracker exactly once per opened stream,
/// even when the owning future is dropped mid-transfer.
struct TransferGuard {
    tracker: Arc<PerformanceTracker>,
    started: Instant,
    bytes: u64,
    armed: bool,
}

impl TransferGuard {
    fn new(tracker: Arc<PerformanceTracker>) -> Self {
        Self {
            tracker,
            started: Instant::now(),
            bytes: 0,
            armed: true,
        }
    }

    fn add_bytes(&mut self, count: u64) {
        self.bytes += count;
    }

    fn received(&self) -> u64 {
        self.bytes
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records the finished transfer and returns its duration.
    fn finish(mut self) -> Duration {
        self.armed = false;
        let elapsed = self.started.elapsed();
        self.tracker
            .record_transfer(TransferDirection::Download, self.bytes, elapsed);
        elapsed
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if self.armed && self.bytes > 0 {
            self.tracker.record_transfer(
                TransferDirection::Download,
                self.bytes,
                self.started.elapsed(),
            );
        }
    }
}

/// Walks a candidate set until one file survives validation.
#[derive(Debug, Clone)]
pub struct FileRetriever {
    http: HttpTransport,
    tracker: Arc<PerformanceTracker>,
    probe_timeout: Duration,
    transfer_timeout: Duration,
}

impl FileRetriever {
    #[must_use]
    pub fn new(
        http: HttpTransport,
        tracker: Arc<PerformanceTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            http,
            tracker,
            probe_timeout: config.probe_timeout,
            transfer_timeout: config.transfer_timeout,
        }
    }

    /// Tries candidates in order until one yields a valid file.
    ///
    /// # Errors
    ///
    /// [`RetrieveError::NoCandidates`] for an empty set;
    /// [`RetrieveError::Exhausted`] when every candidate was rejected,
    /// carrying the per-candidate reasons in attempt order.
    #[tracing::instrument(skip_all, fields(identifier = %candidates.identifier, count = candidates.len()))]
    pub async fn retrieve(
        &self,
        candidates: &DownloadCandidateSet,
        constraints: &RetrievalConstraints,
        progress: Option<&ProgressSender>,
    ) -> Result<FileBlob, RetrieveError> {
        if candidates.is_empty() {
            return Err(RetrieveError::NoCandidates);
        }

        let mut attempts = Vec::with_capacity(candidates.len());
        for link in candidates.iter() {
            debug!(url = %link.url, kind = %link.link_type, "trying candidate");
            match self
                .attempt_candidate(&candidates.identifier, link, constraints, progress)
                .await
            {
                Ok(blob) => {
                    info!(
                        url = %link.url,
                        size = blob.observed_size(),
                        kind = %blob.sniffed,
                        elapsed_ms = blob.elapsed.as_millis(),
                        "file retrieved"
                    );
                    return Ok(blob);
                }
                Err(reason) => {
                    warn!(url = %link.url, reason = %reason, "candidate rejected");
                    attempts.push(CandidateFailure {
                        url: link.url.to_string(),
                        reason,
                    });
                }
            }
        }
        Err(RetrieveError::Exhausted { attempts })
    }

    /// One candidate through the full probe, stream, validate sequence.
    async fn attempt_candidate(
        &self,
        identifier: &str,
        link: &DownloadLink,
        constraints: &RetrievalConstraints,
        progress: Option<&ProgressSender>,
    ) -> Result<FileBlob, RejectReason> {
        // Probe first: a declared size outside the bounds means the body is
        // never requested at all.
        let probe = self
            .http
            .probe(&link.url, self.probe_timeout)
            .await
            .map_err(reject_from_http)?;
        if let Some(declared) = probe.content_length {
            if declared > constraints.max_size {
                return Err(RejectReason::DeclaredTooLarge {
                    declared,
                    limit: constraints.max_size,
                });
            }
            if declared < constraints.min_size {
                return Err(RejectReason::DeclaredTooSmall {
                    declared,
                    limit: constraints.min_size,
                });
            }
        }

        let mut stream = self
            .http
            .open_stream(&link.url, self.transfer_timeout)
            .await
            .map_err(reject_from_http)?;
        let declared_size = stream.content_length().or(probe.content_length);

        let mut guard = TransferGuard::new(Arc::clone(&self.tracker));
        let mut buffer: Vec<u8> = match declared_size {
            Some(size) => Vec::with_capacity(usize::try_from(size).unwrap_or(0)),
            None => Vec::new(),
        };
        let deadline = Instant::now() + self.transfer_timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(RejectReason::Timeout(self.transfer_timeout))?;
            let chunk = tokio::time::timeout(remaining, stream.next_chunk())
                .await
                .map_err(|_| RejectReason::Timeout(self.transfer_timeout))?
                .map_err(reject_from_http)?;
            let Some(chunk) = chunk else { break };

            guard.add_bytes(chunk.len() as u64);
            buffer.extend_from_slice(&chunk);

            // A lying (or absent) Content-Length is caught here: the moment
            // the running count crosses the cap the transfer is abandoned.
            if buffer.len() as u64 > constraints.max_size {
                return Err(RejectReason::ObservedTooLarge {
                    received: guard.received(),
                    limit: constraints.max_size,
                });
            }
            if let Some(sender) = progress {
                sender.emit(TransferProgress {
                    url: link.url.to_string(),
                    bytes_received: guard.received(),
                    total_bytes: declared_size,
                });
            }
        }

        let observed = buffer.len() as u64;
        if observed < constraints.min_size {
            return Err(RejectReason::ObservedTooSmall {
                observed,
                limit: constraints.min_size,
            });
        }

        let sniffed = sniff(&buffer);
        if !sniffed.matches_any(&constraints.allowed_extensions) {
            debug!(url = %link.url, sniffed = %sniffed, "content type mismatch");
            return Err(RejectReason::WrongContentType { sniffed });
        }

        let filename = derive_filename(
            identifier,
            sniffed,
            stream.content_disposition(),
            stream.final_url(),
        );
        let elapsed = guard.finish();
        Ok(FileBlob {
            bytes: buffer,
            filename,
            declared_size,
            sniffed,
            source: link.clone(),
            elapsed,
        })
    }
}

fn reject_from_http(error: HttpError) -> RejectReason {
    match error {
        HttpError::Timeout { timeout, .. } => RejectReason::Timeout(timeout),
        HttpError::Status { status, .. } => RejectReason::Status(status),
        HttpError::Network { source, .. } => RejectReason::Transport(source.to_string()),
        HttpError::Build { source } => RejectReason::Transport(source.to_string()),
        HttpError::PoolClosed => RejectReason::Transport("connection pool closed".to_string()),
    }
}

/// Picks a filename: server's Content-Disposition, then the final URL's
/// last path segment (when it looks like a filename), then a synthesized
/// `identifier.ext` from the sniffed kind.
fn derive_filename(
    identifier: &str,
    sniffed: SniffedKind,
    content_disposition: Option<&str>,
    final_url: &Url,
) -> String {
    if let Some(header) = content_disposition
        && let Some(name) = parse_content_disposition(header)
    {
        let clean = sanitize_filename(&name);
        if !clean.is_empty() {
            return clean;
        }
    }

    if let Some(mut segments) = final_url.path_segments()
        && let Some(last) = segments.next_back()
        && last.contains('.')
    {
        let decoded = urlencoding::decode(last)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| last.to_string());
        let clean = sanitize_filename(&decoded);
        if !clean.is_empty() {
            return clean;
        }
    }

    format!("{identifier}.{}", sniffed.preferred_extension())
}

/// Extracts a filename from a Content-Disposition value, handling the
/// RFC 5987 `filename*=` form as well as quoted and bare `filename=`.
fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(position) = header.find("filename*=") {
        let value = header[position + 10..].trim();
        // charset'language'percent-encoded-name
        if let Some(sep) = value.find("''") {
            let encoded = &value[sep + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let position = header.find("filename=")?;
    let value = header[position + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Replaces filesystem-hostile characters so the name is safe to join
/// under a download directory.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    trimmed.to_string()
}
