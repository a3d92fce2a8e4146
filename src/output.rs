//! CLI output formatting and display helpers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bookfetch_core::parse::format_bytes;
use bookfetch_core::{BookRecord, FileBlob, MirrorReport, PerformanceSnapshot, TransferProgress};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// Prints search records as a numbered list, one line per record.
pub fn print_record_list(records: &[BookRecord]) {
    let width = terminal_width();
    for (index, record) in records.iter().enumerate() {
        let year = record.year.as_deref().unwrap_or("-");
        let size = if record.size_bytes > 0 {
            format_bytes(record.size_bytes)
        } else {
            "-".to_string()
        };
        let identifier = record.identifier.as_deref().unwrap_or("no identifier");
        let line = format!("{:>2}. {record} | {year} | {size} | {identifier}", index + 1);
        println!("{}", truncate_to_width(&line, width));
    }
}

/// Prints per-mirror health reports as an aligned table.
pub fn print_mirror_table(reports: &[MirrorReport]) {
    println!(
        "{:<24} {:<9} {:>6} {:>6} {:>12}",
        "MIRROR", "ROLE", "OK", "FAIL", "AVG LATENCY"
    );
    for report in reports {
        println!(
            "{:<24} {:<9} {:>6} {:>6} {:>9} ms",
            truncate_to_width(&report.name, 24),
            report.role.to_string(),
            report.successes,
            report.failures,
            report.avg_latency.as_millis()
        );
    }
}

/// Prints the engine's aggregated performance counters.
pub fn print_performance(snapshot: &PerformanceSnapshot) {
    println!(
        "Searches: {} total ({} ok, {} failed), avg {} ms",
        snapshot.searches_total,
        snapshot.searches_ok,
        snapshot.searches_failed,
        snapshot.avg_search_time.as_millis()
    );
    println!(
        "Downloads: {} total, {} moved, avg {}/s",
        snapshot.downloads_total,
        format_bytes(snapshot.bytes_downloaded),
        format_bytes(snapshot.avg_download_speed as u64)
    );
}

/// Prints the one-line completion summary for a saved file.
pub fn print_fetch_summary(blob: &FileBlob, path: &Path) {
    println!(
        "Saved {} ({}, {}) in {:.1}s at {}/s",
        path.display(),
        format_bytes(blob.observed_size()),
        blob.sniffed,
        blob.elapsed.as_secs_f64(),
        format_bytes(blob.throughput_bytes_per_sec() as u64)
    );
}

/// Drives a progress bar on stderr from transfer events until the sending
/// side closes the channel. Starts as a spinner; switches to a bounded bar
/// once an event carries the total size.
pub fn spawn_progress_bar(
    mut events: mpsc::Receiver<TransferProgress>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {bytes} downloaded")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        let mut sized = false;

        while let Some(update) = events.recv().await {
            if !sized
                && let Some(total) = update.total_bytes
            {
                sized = true;
                bar.set_style(
                    ProgressStyle::with_template("{bar:30.cyan/blue} {bytes}/{total_bytes} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_length(total);
            }
            bar.set_position(update.bytes_received);
        }
        bar.finish_and_clear();
    })
}

/// Picks where a retrieved file lands: `dir/filename`, with a numeric
/// suffix when the name is taken and overwrite is off.
///
/// Names arriving here are already sanitized by the retrieval layer; a
/// name that still looks unsafe falls back to `download.bin`.
pub fn resolve_target_path(dir: &Path, filename: &str, overwrite: bool) -> PathBuf {
    let name = if filename.contains('/')
        || filename.contains('\\')
        || filename.trim_matches(['_', '.']).is_empty()
    {
        "download.bin"
    } else {
        filename
    };

    let base = dir.join(name);
    if overwrite || !base.exists() {
        return base;
    }

    let (stem, ext) = match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos..]),
        None => (name, ""),
    };
    for counter in 1..1000 {
        let numbered = dir.join(format!("{stem}_{counter}{ext}"));
        if !numbered.exists() {
            return numbered;
        }
    }

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{stamp}{ext}"))
}
