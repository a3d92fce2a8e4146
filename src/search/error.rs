//! Search failure taxonomy.
//!
//! Individual mirror problems are absorbed into per-mirror diagnostics and
//! never escape on their own; a caller sees an error only when the whole
//! pass comes up empty-handed. An empty result list is not an error.

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;
use crate::parse::ParseError;

/// Why one mirror failed to produce results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Connection-level failure (DNS, refused, reset, TLS).
    Transport(String),
    /// Non-success HTTP status.
    Status(u16),
    /// Page fetched but its structure was unrecognizable.
    Parse(String),
    /// The per-attempt timeout elapsed.
    Timeout(Duration),
    /// The overall search budget ran out before this mirror got a turn.
    BudgetExhausted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Status(status) => write!(f, "HTTP status {status}"),
            Self::Parse(message) => write!(f, "unparseable response: {message}"),
            Self::Timeout(timeout) => write!(f, "timed out after {timeout:?}"),
            Self::BudgetExhausted => write!(f, "search budget exhausted"),
        }
    }
}

/// One mirror's final story for a search pass. A mirror that was retried
/// reports only its last failure; the retry count is in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    /// Mirror host name.
    pub mirror: String,
    pub reason: FailureReason,
}

impl MirrorFailure {
    #[must_use]
    pub fn new(mirror: &str, reason: FailureReason) -> Self {
        Self {
            mirror: mirror.to_string(),
            reason,
        }
    }

    /// Maps a transport-level error onto a diagnostic reason.
    #[must_use]
    pub fn from_http(mirror: &str, error: &HttpError) -> Self {
        let reason = match error {
            HttpError::Timeout { timeout, .. } => FailureReason::Timeout(*timeout),
            HttpError::Status { status, .. } => FailureReason::Status(*status),
            HttpError::Network { source, .. } => FailureReason::Transport(source.to_string()),
            HttpError::Build { source } => FailureReason::Transport(source.to_string()),
            HttpError::PoolClosed => FailureReason::Transport("connection pool closed".to_string()),
        };
        Self::new(mirror, reason)
    }

    #[must_use]
    pub fn from_parse(mirror: &str, error: &ParseError) -> Self {
        Self::new(mirror, FailureReason::Parse(error.to_string()))
    }
}

impl std::fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.mirror, self.reason)
    }
}

/// Whole-search failure.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Every mirror was tried (or the budget ran out) without one parseable
    /// response. One [`MirrorFailure`] per mirror, in attempt order.
    #[error("search for {query:?} failed on all {} mirror(s)", attempts.len())]
    Exhausted {
        query: String,
        attempts: Vec<MirrorFailure>,
    },

    /// The query was empty after normalization, or asked for zero results.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

impl SearchError {
    #[must_use]
    pub fn exhausted(query: &str, attempts: Vec<MirrorFailure>) -> Self {
        Self::Exhausted {
            query: query.to_string(),
            attempts,
        }
    }

    #[must_use]
    pub fn invalid_query(reason: &str) -> Self {
        Self::InvalidQuery {
            reason: reason.to_string(),
        }
    }
}
