//! CLI entry point for the bookfetch tool.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use bookfetch_core::retrieve::RetrievalConstraints;
use bookfetch_core::{Engine, EngineConfig, PerformanceSnapshot, SniffedKind, progress_channel};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

mod cli;
mod output;

use cli::{Cli, Command, FetchArgs, LinksArgs, SearchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries only results so --json stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let config = EngineConfig::from_env().context("loading configuration")?;
    let engine = Engine::new(config)?;

    match &cli.command {
        Command::Search(args) => run_search(&engine, args, cli.json).await,
        Command::Links(args) => run_links(&engine, args, cli.json).await,
        Command::Fetch(args) => run_fetch(&engine, args, cli.json, cli.quiet).await,
        Command::Mirrors => run_mirrors(&engine, cli.json).await,
    }
}

async fn run_search(engine: &Engine, args: &SearchArgs, json: bool) -> Result<()> {
    let query = args.query_text();
    let result = engine.search(&query, usize::from(args.limit)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(result.as_ref())?);
        return Ok(());
    }

    if result.is_empty() {
        println!("No matches for {:?} on {}.", result.query.text, result.mirror);
        return Ok(());
    }

    output::print_record_list(&result.records);
    println!(
        "{} of {} record(s) from {} in {} ms",
        result.len(),
        result.total_count,
        result.mirror,
        result.elapsed.as_millis()
    );
    Ok(())
}

async fn run_links(engine: &Engine, args: &LinksArgs, json: bool) -> Result<()> {
    let candidates = engine.resolve_download_links(&args.identifier).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    for (index, link) in candidates.iter().enumerate() {
        println!("{:>2}. {link}", index + 1);
    }
    println!(
        "{} candidate(s) for {}",
        candidates.len(),
        candidates.identifier
    );
    Ok(())
}

/// Machine-readable summary of a completed fetch.
#[derive(Debug, Serialize)]
struct FetchSummary<'a> {
    path: String,
    filename: &'a str,
    size_bytes: u64,
    declared_size: Option<u64>,
    content_kind: SniffedKind,
    source_url: String,
    elapsed_ms: u128,
    throughput_bytes_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<PerformanceSnapshot>,
}

async fn run_fetch(engine: &Engine, args: &FetchArgs, json: bool, quiet: bool) -> Result<()> {
    let candidates = engine.resolve_download_links(&args.identifier).await?;
    info!(candidates = candidates.len(), "download candidates resolved");

    let constraints = RetrievalConstraints::from_config(engine.config());
    let show_bar = !quiet && !json && std::io::stderr().is_terminal();

    let blob = if show_bar {
        let (sender, receiver) = progress_channel(64);
        let bar = output::spawn_progress_bar(receiver);
        let outcome = engine
            .retrieve_file_with(&candidates, &constraints, Some(&sender))
            .await;
        // Closing the channel lets the bar task drain and exit.
        drop(sender);
        let _ = bar.await;
        outcome?
    } else {
        engine
            .retrieve_file_with(&candidates, &constraints, None)
            .await?
    };

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let path = output::resolve_target_path(&args.output_dir, &blob.filename, args.overwrite);
    tokio::fs::write(&path, &blob.bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), bytes = blob.observed_size(), "file saved");

    if json {
        let summary = FetchSummary {
            path: path.display().to_string(),
            filename: &blob.filename,
            size_bytes: blob.observed_size(),
            declared_size: blob.declared_size,
            content_kind: blob.sniffed,
            source_url: blob.source.url.to_string(),
            elapsed_ms: blob.elapsed.as_millis(),
            throughput_bytes_per_sec: blob.throughput_bytes_per_sec(),
            stats: args.stats.then(|| engine.performance_snapshot()),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    output::print_fetch_summary(&blob, &path);
    if args.stats {
        output::print_performance(&engine.performance_snapshot());
    }
    Ok(())
}

async fn run_mirrors(engine: &Engine, json: bool) -> Result<()> {
    let reports = engine.check_mirrors().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    output::print_mirror_table(&reports);
    Ok(())
}
