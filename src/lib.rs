//! Bookfetch Core Library
//!
//! This library searches a pool of book-mirror sites, resolves download
//! links for a chosen record, and retrieves the file with size and
//! content-type validation, failing over between mirrors as they degrade.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Engine configuration and validation
//! - [`engine`] - The façade wiring everything together
//! - [`http`] - Shared HTTP transport with connection limiting
//! - [`mirror`] - Mirror catalogue, health stats, and site profiles
//! - [`parse`] - Result-table HTML parsing
//! - [`record`] - Queries, book records, and result sets
//! - [`resolve`] - Download-link resolution across mirrors
//! - [`retrieve`] - Streaming retrieval with validation
//! - [`search`] - Query execution, retry, dedup, and caching
//! - [`stats`] - Rolling performance statistics

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod http;
pub mod mirror;
pub mod parse;
pub mod record;
pub mod resolve;
pub mod retrieve;
pub mod search;
pub mod stats;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError};
pub use mirror::{MirrorReport, MirrorRegistry, MirrorRole};
pub use record::{BookRecord, SearchQuery, SearchResult};
pub use resolve::{DownloadCandidateSet, DownloadLink, LinkType, ResolveError};
pub use retrieve::{
    FileBlob, ProgressSender, RetrievalConstraints, RetrieveError, SniffedKind, TransferProgress,
    progress_channel,
};
pub use search::{SearchError, dedupe_records};
pub use stats::{PerformanceSnapshot, PerformanceTracker};
