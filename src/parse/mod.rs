//! Tolerant parsing of mirror result pages into [`BookRecord`]s.
//!
//! Mirrors serve near-identical but not identical HTML; the column layout
//! for a mirror family comes in as a [`ResultTableLayout`] so new families
//! plug in without touching the row-walking code. Individual malformed rows
//! are skipped, never fatal; only a missing results table is a parse error,
//! which signals the caller to fail over.

pub mod size;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

use crate::mirror::Mirror;
use crate::record::BookRecord;

pub use size::{format_bytes, parse_size_to_bytes};

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Compiles a CSS selector at static init; panics on invalid selector.
pub(crate) fn compile_static_selector(selector: &str) -> Selector {
    Selector::parse(selector)
        .unwrap_or_else(|e| panic!("invalid static selector '{selector}': {e}"))
}

/// 32-hex-char content hash carried in mirror links as `md5=<hash>`.
pub(crate) static MD5_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)md5=([a-f0-9]{32})"));

/// Four-digit year somewhere in a noisy cell ("c2003", "2019 (reprint)").
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\b(19|20)\d{2}\b"));

/// Leading English article mirrors prepend inconsistently.
static TITLE_ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)^(a|an|the)\s+"));

static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tr"));
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("td"));
static HEADER_CELL_SEL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("th"));
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));

/// Where each record field sits in a mirror family's results table.
#[derive(Debug, Clone)]
pub struct ResultTableLayout {
    /// Selector that finds the results table itself. Its absence from a
    /// page is what distinguishes "malformed page" from "no results".
    pub table_selector: &'static str,
    /// Rows with fewer cells than this are noise (ads, separators).
    pub min_cells: usize,
    pub author_col: usize,
    pub title_col: usize,
    pub publisher_col: usize,
    pub year_col: usize,
    pub pages_col: usize,
    pub language_col: usize,
    pub size_col: usize,
    pub format_col: usize,
}

/// Column layout of the classic desktop-style search results table shared
/// by the main mirror family.
pub const LIBGEN_TABLE_LAYOUT: ResultTableLayout = ResultTableLayout {
    table_selector: r#"table[rules="cols"]"#,
    min_cells: 10,
    author_col: 1,
    title_col: 2,
    publisher_col: 3,
    year_col: 4,
    pages_col: 5,
    language_col: 6,
    size_col: 7,
    format_col: 8,
};

/// Page structure was unrecognizable. Distinct from an empty result: a
/// present-but-empty table parses to zero records successfully.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no results table found on page from {mirror}")]
    MissingResultsTable { mirror: String },
}

impl ParseError {
    #[must_use]
    pub fn missing_table(mirror: &Mirror) -> Self {
        Self::MissingResultsTable {
            mirror: mirror.name.clone(),
        }
    }
}

/// Parses one results page into records, in page order.
///
/// Rows that do not fit the layout (too few cells, no title) are skipped
/// with a debug log. A page whose table exists but yields no usable rows
/// returns an empty vector, the valid "no results" outcome.
///
/// # Errors
///
/// [`ParseError::MissingResultsTable`] when the layout's table selector
/// matches nothing, meaning the mirror's page structure changed or an
/// error page came back with status 200.
pub fn parse_results_page(
    html: &str,
    layout: &ResultTableLayout,
    mirror: &Mirror,
) -> Result<Vec<BookRecord>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = compile_static_selector(layout.table_selector);

    let Some(table) = document.select(&table_sel).next() else {
        return Err(ParseError::missing_table(mirror));
    };

    let mut records = Vec::new();
    for row in table.select(&ROW_SEL) {
        // Header rows use <th>, data rows <td>.
        if row.select(&HEADER_CELL_SEL).next().is_some() {
            continue;
        }
        let cells: Vec<ElementRef<'_>> = row.select(&CELL_SEL).collect();
        if cells.len() < layout.min_cells {
            if !cells.is_empty() {
                debug!(
                    mirror = %mirror.name,
                    cells = cells.len(),
                    "skipping short result row"
                );
            }
            continue;
        }

        let title = clean_title(&cell_text(&cells[layout.title_col]));
        if title.is_empty() {
            debug!(mirror = %mirror.name, "skipping row without title");
            continue;
        }

        let format = cell_text(&cells[layout.format_col])
            .trim_start_matches('.')
            .to_lowercase();
        let size_bytes = parse_size_to_bytes(&cell_text(&cells[layout.size_col]));

        records.push(BookRecord {
            title,
            author: optional_text(&cells[layout.author_col]),
            publisher: optional_text(&cells[layout.publisher_col]),
            year: normalize_year(&cell_text(&cells[layout.year_col])),
            pages: optional_text(&cells[layout.pages_col]).filter(|p| p != "0"),
            language: optional_text(&cells[layout.language_col]),
            size_bytes,
            format,
            identifier: extract_identifier(row),
            source_mirror: mirror.name.clone(),
        });
    }

    debug!(
        mirror = %mirror.name,
        records = records.len(),
        "parsed results page"
    );
    Ok(records)
}

/// Collapses an element's text nodes into one whitespace-normalized string.
/// Entity decoding already happened during HTML parsing.
fn cell_text(cell: &ElementRef<'_>) -> String {
    let raw: String = cell.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn optional_text(cell: &ElementRef<'_>) -> Option<String> {
    let text = cell_text(cell);
    if text.is_empty() { None } else { Some(text) }
}

/// Strips the leading article mirrors prepend inconsistently, so "The C
/// Programming Language" and "C Programming Language" read as one title.
fn clean_title(raw: &str) -> String {
    TITLE_ARTICLE_RE.replace(raw.trim(), "").trim().to_string()
}

/// Pulls a 4-digit year out of a noisy cell; falls back to the raw text
/// when nothing matches, `None` when the cell was empty.
fn normalize_year(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    YEAR_RE
        .find(raw)
        .map_or_else(|| Some(raw.to_string()), |m| Some(m.as_str().to_string()))
}

/// Finds the first `md5=`-style hash in any link of the row, lowercased.
fn extract_identifier(row: ElementRef<'_>) -> Option<String> {
    for anchor in row.select(&ANCHOR_SEL) {
        if let Some(href) = anchor.value().attr("href") {
            if let Some(caps) = MD5_PARAM_RE.captures(href) {
                return Some(caps[1].to_lowercase());
            }
        }
    }
    None
}
