//! Search pipeline: mirror failover, retry scheduling, duplicate collapse,
//! and the session result cache.
//!
//! [`QueryExecutor`] runs the failover loop; [`ResultCache`] fronts it so
//! repeated queries within the TTL cost nothing. Both are orchestrated by
//! the engine, which owns the only instances.

pub mod cache;
pub mod dedupe;
pub mod error;
pub mod executor;
pub mod retry;

pub use cache::ResultCache;
pub use dedupe::dedupe_records;
pub use error::{FailureReason, MirrorFailure, SearchError};
pub use executor::QueryExecutor;
pub use retry::{RetryDecision, RetrySchedule};
