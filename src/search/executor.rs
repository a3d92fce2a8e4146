//! Sequential mirror failover for search queries.
//!
//! Mirrors are attempted one at a time in registry health order, each with
//! its own bounded [`RetrySchedule`]. The first mirror whose page parses
//! wins outright, even when it parses to zero records; structural parse
//! failures skip straight to the next mirror because the same page will not
//! parse better a second time. The whole pass runs under one shrinking time
//! budget, and a mirror late in the sequence only gets what is left of it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::http::{HttpError, HttpTransport};
use crate::mirror::profile::{MirrorProfile, ProfileSet};
use crate::mirror::{Mirror, MirrorRegistry, MirrorRole};
use crate::parse::{ParseError, parse_results_page};
use crate::record::{BookRecord, SearchQuery, SearchResult};
use crate::search::dedupe::dedupe_records;
use crate::search::error::{FailureReason, MirrorFailure, SearchError};
use crate::search::retry::{RetryDecision, RetrySchedule};

/// Drives one search query across the search mirrors.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    http: HttpTransport,
    registry: Arc<MirrorRegistry>,
    profiles: Arc<ProfileSet>,
    per_attempt_timeout: Duration,
    search_budget: Duration,
    retries_per_mirror: u32,
}

/// What a single attempt against a single mirror produced.
enum AttemptError {
    Http(HttpError),
    Parse(ParseError),
    BadUrl(url::ParseError),
}

impl QueryExecutor {
    #[must_use]
    pub fn new(
        http: HttpTransport,
        registry: Arc<MirrorRegistry>,
        profiles: Arc<ProfileSet>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            http,
            registry,
            profiles,
            per_attempt_timeout: config.per_attempt_timeout,
            search_budget: config.search_budget,
            retries_per_mirror: config.retries_per_mirror,
        }
    }

    /// Runs the failover loop for one query.
    ///
    /// # Errors
    ///
    /// [`SearchError::Exhausted`] when no mirror produced a parseable page
    /// within the budget, carrying one [`MirrorFailure`] per mirror in
    /// attempt order. Mirrors the budget never reached are reported as
    /// budget-exhausted.
    #[tracing::instrument(skip(self, query), fields(query = %query.text, max = query.max_results))]
    pub async fn execute(&self, query: &SearchQuery) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let deadline = started + self.search_budget;
        let mirrors = self.registry.ordered_mirrors(MirrorRole::Search);
        let mut attempts: Vec<MirrorFailure> = Vec::with_capacity(mirrors.len());

        for mirror in &mirrors {
            let Some(remaining) = remaining_budget(deadline) else {
                attempts.push(MirrorFailure::new(&mirror.name, FailureReason::BudgetExhausted));
                continue;
            };
            let profile = self.profiles.select(mirror);
            debug!(
                mirror = %mirror.name,
                profile = profile.name(),
                remaining_ms = remaining.as_millis(),
                "trying mirror"
            );

            match self.try_mirror(profile.as_ref(), mirror, query, deadline).await {
                Ok((records, latency)) => {
                    return Ok(self.build_result(query, mirror, records, latency));
                }
                Err(failure) => {
                    warn!(mirror = %mirror.name, reason = %failure.reason, "mirror failed");
                    attempts.push(failure);
                }
            }
        }

        Err(SearchError::exhausted(&query.text, attempts))
    }

    /// Attempts one mirror until it succeeds, its retry schedule stops, or
    /// the budget runs dry. Every attempt's outcome lands in mirror stats.
    async fn try_mirror(
        &self,
        profile: &dyn MirrorProfile,
        mirror: &Mirror,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<(Vec<BookRecord>, Duration), MirrorFailure> {
        let mut schedule = RetrySchedule::new(self.retries_per_mirror);

        loop {
            let Some(remaining) = remaining_budget(deadline) else {
                return Err(MirrorFailure::new(
                    &mirror.name,
                    FailureReason::BudgetExhausted,
                ));
            };
            let attempt_timeout = self.per_attempt_timeout.min(remaining);

            let attempt_started = Instant::now();
            let outcome = self.attempt(profile, mirror, query, attempt_timeout).await;
            let latency = attempt_started.elapsed();
            self.registry
                .record_outcome(MirrorRole::Search, &mirror.name, outcome.is_ok(), latency);

            let error = match outcome {
                Ok(records) => return Ok((records, latency)),
                Err(error) => error,
            };

            match error {
                // A loaded page with the wrong shape will not improve on
                // retry; fail over to the next mirror.
                AttemptError::Parse(e) => {
                    return Err(MirrorFailure::from_parse(&mirror.name, &e));
                }
                AttemptError::BadUrl(e) => {
                    return Err(MirrorFailure::new(
                        &mirror.name,
                        FailureReason::Transport(format!("cannot build search URL: {e}")),
                    ));
                }
                AttemptError::Http(e) => match schedule.record_failure(&e) {
                    RetryDecision::Retry { delay, attempt } => {
                        if Instant::now() + delay >= deadline {
                            debug!(mirror = %mirror.name, "no budget left for another attempt");
                            return Err(MirrorFailure::from_http(&mirror.name, &e));
                        }
                        debug!(
                            mirror = %mirror.name,
                            attempt,
                            delay_ms = delay.as_millis(),
                            "backing off before retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Stop { reason } => {
                        debug!(mirror = %mirror.name, reason, "giving up on mirror");
                        return Err(MirrorFailure::from_http(&mirror.name, &e));
                    }
                },
            }
        }
    }

    /// One fetch-and-parse round trip.
    async fn attempt(
        &self,
        profile: &dyn MirrorProfile,
        mirror: &Mirror,
        query: &SearchQuery,
        timeout: Duration,
    ) -> Result<Vec<BookRecord>, AttemptError> {
        let url = profile
            .search_url(mirror, query)
            .map_err(AttemptError::BadUrl)?;
        let html = self
            .http
            .get_text(&url, timeout)
            .await
            .map_err(AttemptError::Http)?;
        parse_results_page(&html, profile.result_layout(), mirror).map_err(AttemptError::Parse)
    }

    fn build_result(
        &self,
        query: &SearchQuery,
        mirror: &Mirror,
        records: Vec<BookRecord>,
        latency: Duration,
    ) -> SearchResult {
        let mut records = dedupe_records(records);
        let total_count = records.len();
        records.truncate(query.max_results);

        info!(
            mirror = %mirror.name,
            returned = records.len(),
            total = total_count,
            latency_ms = latency.as_millis(),
            "search served"
        );
        SearchResult {
            query: query.clone(),
            records,
            total_count,
            elapsed: latency,
            mirror: mirror.name.clone(),
        }
    }
}

/// Time left until the deadline, `None` once it has passed.
fn remaining_budget(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() { None } else { Some(remaining) }
}
