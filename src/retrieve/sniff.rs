//! Content-type detection from leading bytes.
//!
//! Mirrors routinely answer a download URL with an HTML error page and a
//! 200 status, so the URL and its extension prove nothing. The sniffer
//! looks at what actually arrived: magic numbers for the structured book
//! formats, an HTML check for masquerading error pages, and a printability
//! heuristic as the last resort. Plain text is deliberately the weakest
//! verdict; it never satisfies a structured format like PDF or EPUB.

use serde::Serialize;

/// How many leading bytes the textual heuristics examine.
const SNIFF_WINDOW: usize = 512;

/// What the downloaded bytes actually look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SniffedKind {
    Pdf,
    /// ZIP container carrying the EPUB mimetype entry.
    Epub,
    /// ZIP container without an EPUB marker (DOCX and friends).
    Zip,
    /// PalmDB with the BOOKMOBI type (MOBI, AZW3, PRC).
    Mobi,
    Djvu,
    Chm,
    Lit,
    Rtf,
    Fb2,
    /// OLE compound document (legacy DOC).
    Ole,
    /// An HTML page; almost always a mirror error page in this context.
    Html,
    /// Printable text with no recognizable structure.
    Text,
    Unknown,
}

impl SniffedKind {
    /// Whether content of this kind can legitimately carry the extension.
    ///
    /// Containers are permissive (a ZIP may be an EPUB whose mimetype entry
    /// is misplaced); `Text` satisfies only `txt`-like extensions; `Html`
    /// and `Unknown` satisfy nothing.
    #[must_use]
    pub fn matches_extension(self, extension: &str) -> bool {
        let extension = extension.trim().trim_start_matches('.').to_lowercase();
        match self {
            Self::Pdf => extension == "pdf",
            Self::Epub => extension == "epub",
            Self::Zip => matches!(extension.as_str(), "epub" | "docx" | "zip"),
            Self::Mobi => matches!(extension.as_str(), "mobi" | "azw3" | "pdb"),
            Self::Djvu => matches!(extension.as_str(), "djvu" | "djv"),
            Self::Chm => extension == "chm",
            Self::Lit => extension == "lit",
            Self::Rtf => extension == "rtf",
            Self::Fb2 => extension == "fb2",
            Self::Ole => extension == "doc",
            Self::Text => matches!(extension.as_str(), "txt" | "text"),
            Self::Html | Self::Unknown => false,
        }
    }

    /// Whether any of the allowed extensions accepts this kind.
    #[must_use]
    pub fn matches_any(self, allowed: &[String]) -> bool {
        allowed.iter().any(|ext| self.matches_extension(ext))
    }

    /// Canonical extension for synthesized filenames.
    #[must_use]
    pub fn preferred_extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Zip => "zip",
            Self::Mobi => "mobi",
            Self::Djvu => "djvu",
            Self::Chm => "chm",
            Self::Lit => "lit",
            Self::Rtf => "rtf",
            Self::Fb2 => "fb2",
            Self::Ole => "doc",
            Self::Html => "html",
            Self::Text => "txt",
            Self::Unknown => "bin",
        }
    }
}

impl std::fmt::Display for SniffedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Zip => "zip archive",
            Self::Mobi => "mobi",
            Self::Djvu => "djvu",
            Self::Chm => "chm",
            Self::Lit => "lit",
            Self::Rtf => "rtf",
            Self::Fb2 => "fb2",
            Self::Ole => "ole document",
            Self::Html => "html page",
            Self::Text => "plain text",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Classifies content by its leading bytes.
#[must_use]
pub fn sniff(bytes: &[u8]) -> SniffedKind {
    if bytes.len() < 4 {
        return SniffedKind::Unknown;
    }

    if bytes.starts_with(b"%PDF") {
        return SniffedKind::Pdf;
    }
    if bytes.starts_with(b"PK\x03\x04") {
        // The EPUB spec wants "mimetype" as the first, uncompressed entry,
        // which puts this marker at a fixed position right after the local
        // file header.
        let window = &bytes[..bytes.len().min(128)];
        if find_subsequence(window, b"mimetypeapplication/epub+zip").is_some() {
            return SniffedKind::Epub;
        }
        return SniffedKind::Zip;
    }
    if bytes.len() >= 68 && &bytes[60..68] == b"BOOKMOBI" {
        return SniffedKind::Mobi;
    }
    if bytes.starts_with(b"AT&TFORM") {
        return SniffedKind::Djvu;
    }
    if bytes.starts_with(b"ITSF") {
        return SniffedKind::Chm;
    }
    if bytes.starts_with(b"ITOLITLS") {
        return SniffedKind::Lit;
    }
    if bytes.starts_with(b"{\\rtf") {
        return SniffedKind::Rtf;
    }
    if bytes.starts_with(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1") {
        return SniffedKind::Ole;
    }

    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if looks_like_html(window) {
        return SniffedKind::Html;
    }
    if find_subsequence(window, b"<FictionBook").is_some() {
        return SniffedKind::Fb2;
    }
    if looks_textual(window) {
        return SniffedKind::Text;
    }
    SniffedKind::Unknown
}

fn looks_like_html(window: &[u8]) -> bool {
    let trimmed = window.trim_ascii_start();
    starts_with_ignore_case(trimmed, b"<!doctype html")
        || starts_with_ignore_case(trimmed, b"<html")
        || find_subsequence_ignore_case(window, b"<html").is_some()
}

/// Printability heuristic: no NUL bytes and at least 95% of the window is
/// whitespace, printable ASCII, or high bytes (multi-byte UTF-8).
fn looks_textual(window: &[u8]) -> bool {
    if window.is_empty() || window.contains(&0) {
        return false;
    }
    let plausible = window
        .iter()
        .filter(|&&b| matches!(b, b'\t' | b'\n' | b'\r' | 0x20..=0x7E) || b >= 0x80)
        .count();
    plausible * 100 / window.len() >= 95
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len()
        && haystack
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_subsequence_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| {
        window
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}
