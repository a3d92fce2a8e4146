//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Search book mirrors, resolve download links, and fetch verified files.
///
/// Bookfetch queries a pool of library mirror sites, fails over between
/// them as they degrade, and validates every downloaded file against size
/// and content-type bounds before it reaches disk.
#[derive(Parser, Debug)]
#[command(name = "bookfetch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit machine-readable JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the configured mirrors for book records
    Search(SearchArgs),
    /// Resolve ranked download candidates for an identifier
    Links(LinksArgs),
    /// Download one file by identifier, validating size and content
    Fetch(FetchArgs),
    /// Probe every configured mirror and report health
    Mirrors,
}

/// Arguments for the `search` command.
#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Query text; multiple words are joined with spaces
    #[arg(required = true)]
    pub query: Vec<String>,

    /// Maximum number of records to return (1-100)
    #[arg(short = 'n', long, default_value_t = 25, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub limit: u16,
}

impl SearchArgs {
    /// The query words joined back into a single string.
    #[must_use]
    pub fn query_text(&self) -> String {
        self.query.join(" ")
    }
}

/// Arguments for the `links` command.
#[derive(clap::Args, Debug)]
pub struct LinksArgs {
    /// 32-character hex identifier from a search result
    pub identifier: String,
}

/// Arguments for the `fetch` command.
#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// 32-character hex identifier from a search result
    pub identifier: String,

    /// Directory the file is written into
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Replace an existing file instead of writing a numbered copy
    #[arg(long)]
    pub overwrite: bool,

    /// Print engine performance counters after the download
    #[arg(long)]
    pub stats: bool,
}
