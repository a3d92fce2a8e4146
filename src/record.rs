//! Core data types produced by a search: queries, book records, result sets.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// One book as described by a mirror's result table.
///
/// Immutable once created. Fields the mirror did not provide are `None`
/// (or `0` for `size_bytes`); only the title is required for a record to
/// exist at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookRecord {
    /// Book title as shown by the mirror, whitespace-normalized.
    pub title: String,
    /// Author name(s), if the mirror listed any.
    pub author: Option<String>,
    /// Publisher, if listed.
    pub publisher: Option<String>,
    /// Publication year, normalized to a 4-digit string when recognizable.
    pub year: Option<String>,
    /// Page count as listed (kept as text; mirrors mix formats like "320[336]").
    pub pages: Option<String>,
    /// Language, if listed.
    pub language: Option<String>,
    /// File size in bytes derived from the mirror's human-readable size;
    /// 0 when the size column was missing or unparsable.
    pub size_bytes: u64,
    /// File extension, lowercased (e.g. "pdf", "epub").
    pub format: String,
    /// Content hash identifying the file (32 hex chars); absent when the
    /// mirror row carried no recognizable hash link.
    pub identifier: Option<String>,
    /// Host name of the mirror this record came from.
    pub source_mirror: String,
}

impl BookRecord {
    /// Returns the identifier lowercased, if present and non-empty.
    #[must_use]
    pub fn identifier_key(&self) -> Option<String> {
        self.identifier
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(str::to_lowercase)
    }
}

impl fmt::Display for BookRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)?;
        if let Some(author) = &self.author {
            write!(f, " by {author}")?;
        }
        if !self.format.is_empty() {
            write!(f, " [{}]", self.format)?;
        }
        Ok(())
    }
}

/// A normalized search request.
///
/// `normalized` is the cache-key form of the text: trimmed, case-folded,
/// internal whitespace collapsed. The original text is kept for building
/// mirror query URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    /// Query text as entered, trimmed.
    pub text: String,
    /// Case-folded, whitespace-collapsed form used for cache keying.
    pub normalized: String,
    /// Upper bound on records in the final result.
    pub max_results: usize,
}

impl SearchQuery {
    #[must_use]
    pub fn new(text: &str, max_results: usize) -> Self {
        let text = text.trim().to_string();
        let normalized = text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            text,
            normalized,
            max_results,
        }
    }

    /// Cache key combining the normalized text and the result bound.
    /// Identical queries with different bounds are distinct entries.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}::{}", self.normalized, self.max_results)
    }

    /// True when nothing searchable remains after trimming.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (max {})", self.text, self.max_results)
    }
}

/// The outcome of one successful query: deduplicated records in the order
/// the serving mirror returned them.
///
/// Immutable; the cache hands out shared references to a single instance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// The query that produced this result.
    pub query: SearchQuery,
    /// Records in mirror order, deduplicated, truncated to `max_results`.
    pub records: Vec<BookRecord>,
    /// Distinct records the mirror returned before the `max_results` cut.
    pub total_count: usize,
    /// Wall-clock time the winning attempt took.
    pub elapsed: Duration,
    /// Mirror that served the result page.
    pub mirror: String,
}

impl SearchResult {
    /// An empty result: valid "no matches" outcome, not an error.
    #[must_use]
    pub fn empty(query: SearchQuery, mirror: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            query,
            records: Vec::new(),
            total_count: 0,
            elapsed,
            mirror: mirror.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}
