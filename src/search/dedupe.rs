//! Duplicate collapse for merged result lists.
//!
//! Mirrors serve overlapping catalogs, so one logical book shows up many
//! times. Deduplication is stable: the first occurrence survives and order
//! is otherwise untouched. The identifier is the primary key; title plus
//! author is the fallback key, consulted only for records that carry no
//! identifier at all. A record with neither key is always kept, since there
//! is nothing safe to collapse it against.

use std::collections::HashSet;

use tracing::debug;

use crate::record::BookRecord;

/// Removes duplicate records in place of order, first occurrence wins.
#[must_use]
pub fn dedupe_records(records: Vec<BookRecord>) -> Vec<BookRecord> {
    let total = records.len();
    let mut seen_identifiers = HashSet::new();
    let mut seen_title_author = HashSet::new();

    let kept: Vec<BookRecord> = records
        .into_iter()
        .filter(|record| {
            if let Some(key) = record.identifier_key() {
                seen_identifiers.insert(key)
            } else if let Some(key) = composite_key(record) {
                seen_title_author.insert(key)
            } else {
                true
            }
        })
        .collect();

    if kept.len() < total {
        debug!(total, kept = kept.len(), "collapsed duplicate records");
    }
    kept
}

/// Title+author fallback key, formable only when both fields have content.
fn composite_key(record: &BookRecord) -> Option<(String, String)> {
    let author = record.author.as_deref()?;
    if record.title.trim().is_empty() || author.trim().is_empty() {
        return None;
    }
    Some((normalize(&record.title), normalize(author)))
}

/// Case-folds and collapses interior whitespace for key comparison.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
