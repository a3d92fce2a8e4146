//! Conversion of mirror-reported human-readable sizes into bytes.

use std::sync::LazyLock;

use regex::Regex;

use super::compile_static_regex;

/// Matches `<number><optional whitespace><unit>`, where the unit is a
/// byte multiple in short ("MB") or long ("Megabytes") form, any case.
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|bytes?|kb|kilobytes?|mb|megabytes?|gb|gigabytes?)\s*$")
});

/// Parses a human-readable size string into bytes using 1024-based
/// multipliers. Returns 0 for anything unrecognizable; mirrors routinely
/// emit garbage in the size column and that must never fail a row.
#[must_use]
pub fn parse_size_to_bytes(raw: &str) -> u64 {
    let Some(caps) = SIZE_RE.captures(raw) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier = match caps[2].to_lowercase().as_str() {
        "b" | "byte" | "bytes" => 1.0,
        "kb" | "kilobyte" | "kilobytes" => 1024.0,
        "mb" | "megabyte" | "megabytes" => 1024.0 * 1024.0,
        "gb" | "gigabyte" | "gigabytes" => 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    let bytes = value * multiplier;
    if bytes.is_finite() && bytes >= 0.0 {
        bytes.round() as u64
    } else {
        0
    }
}

/// Formats a byte count back into a short human-readable string for
/// logs and CLI output.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{bytes:.0} B")
    }
}
