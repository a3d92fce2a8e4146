//! Bounded retry schedule with exponential backoff.
//!
//! Each mirror attempt sequence gets its own [`RetrySchedule`]: a small
//! state machine that counts failures, classifies them through
//! [`HttpError::is_transient`], and either hands back a delay or stops.
//! The attempt counter lives inside the schedule, so a caller cannot retry
//! past the bound by miscounting.
//!
//! Delay formula: `min(base * multiplier^(failures-1), max) + jitter`.
//! A server-supplied Retry-After overrides the computed delay, capped at
//! the same maximum.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::http::HttpError;

/// Base delay for the first retry (1 second).
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Delay cap (32 seconds).
const MAX_DELAY: Duration = Duration::from_secs(32);

/// Multiplier applied per failure (doubles each time).
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Maximum jitter added to each delay (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run attempt number `attempt` (1-indexed).
    Retry { delay: Duration, attempt: u32 },

    /// Stop trying this endpoint.
    Stop {
        /// Human-readable reason, for per-mirror diagnostics.
        reason: String,
    },
}

/// Failure-counting retry state for one endpoint.
///
/// `max_attempts` includes the initial attempt, so a schedule built from a
/// "2 retries" configuration allows 3 attempts total.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    failures: u32,
}

impl RetrySchedule {
    /// Schedule allowing `retries` retries after the initial attempt.
    #[must_use]
    pub fn new(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
            multiplier: BACKOFF_MULTIPLIER,
            failures: 0,
        }
    }

    /// Total attempts this schedule permits, the initial one included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records one failed attempt and decides what happens next.
    ///
    /// Permanent failures stop immediately; transient ones retry until the
    /// attempt bound, with the server's Retry-After taking precedence over
    /// the computed backoff when present.
    pub fn record_failure(&mut self, error: &HttpError) -> RetryDecision {
        self.failures += 1;

        if !error.is_transient() {
            return RetryDecision::Stop {
                reason: format!("permanent failure: {error}"),
            };
        }
        if self.failures >= self.max_attempts {
            debug!(
                failures = self.failures,
                max = self.max_attempts,
                "attempt bound reached"
            );
            return RetryDecision::Stop {
                reason: format!("all {} attempts failed: {error}", self.max_attempts),
            };
        }

        let delay = match error.retry_after() {
            Some(requested) => requested.min(self.max_delay),
            None => self.backoff_delay(),
        };
        debug!(
            failures = self.failures,
            next_attempt = self.failures + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: self.failures + 1,
        }
    }

    /// `min(base * multiplier^(failures-1), max) + jitter`.
    fn backoff_delay(&self) -> Duration {
        let exponent = f64::from(self.failures.saturating_sub(1));
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powf(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped) + jitter()
    }
}

/// Random jitter in `0..=MAX_JITTER`, spreading out simultaneous retries.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    fn test_url() -> Url {
        Url::parse("http://mirror.example/search.php").unwrap()
    }

    fn transient() -> HttpError {
        HttpError::status(&test_url(), 503, None)
    }

    fn permanent() -> HttpError {
        HttpError::status(&test_url(), 404, None)
    }

    #[test]
    fn test_zero_retries_still_allows_one_attempt() {
        let schedule = RetrySchedule::new(0);
        assert_eq!(schedule.max_attempts(), 1);
    }

    #[test]
    fn test_first_transient_failure_retries() {
        let mut schedule = RetrySchedule::new(2);
        match schedule.record_failure(&transient()) {
            RetryDecision::Retry { delay, attempt } => {
                assert_eq!(attempt, 2);
                // base 1s + up to 500ms jitter
                assert!(delay >= Duration::from_secs(1));
                assert!(delay <= Duration::from_millis(1500));
            }
            RetryDecision::Stop { reason } => panic!("stopped early: {reason}"),
        }
    }

    #[test]
    fn test_permanent_failure_stops_immediately() {
        let mut schedule = RetrySchedule::new(5);
        let decision = schedule.record_failure(&permanent());
        assert!(matches!(decision, RetryDecision::Stop { .. }));
        assert_eq!(schedule.failures(), 1);
    }

    #[test]
    fn test_bound_is_enforced_by_internal_counter() {
        let mut schedule = RetrySchedule::new(2);
        assert!(matches!(
            schedule.record_failure(&transient()),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            schedule.record_failure(&transient()),
            RetryDecision::Retry { .. }
        ));
        // Third failure exhausts the 3-attempt budget.
        let decision = schedule.record_failure(&transient());
        match decision {
            RetryDecision::Stop { reason } => assert!(reason.contains("3 attempts"), "{reason}"),
            RetryDecision::Retry { .. } => panic!("retried past the bound"),
        }
    }

    #[test]
    fn test_delays_grow_between_attempts() {
        let mut schedule = RetrySchedule::new(3);
        let first = match schedule.record_failure(&transient()) {
            RetryDecision::Retry { delay, .. } => delay,
            RetryDecision::Stop { reason } => panic!("{reason}"),
        };
        let second = match schedule.record_failure(&transient()) {
            RetryDecision::Retry { delay, .. } => delay,
            RetryDecision::Stop { reason } => panic!("{reason}"),
        };
        // ~1s+jitter then ~2s+jitter; jitter tops out at 500ms.
        assert!(second > first, "{second:?} <= {first:?}");
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let mut schedule = RetrySchedule::new(3);
        let error = HttpError::status(&test_url(), 429, Some(Duration::from_secs(7)));
        match schedule.record_failure(&error) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(7)),
            RetryDecision::Stop { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn test_retry_after_capped_at_max_delay() {
        let mut schedule = RetrySchedule::new(3);
        let error = HttpError::status(&test_url(), 429, Some(Duration::from_secs(600)));
        match schedule.record_failure(&error) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, MAX_DELAY),
            RetryDecision::Stop { reason } => panic!("{reason}"),
        }
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            assert!(jitter() <= MAX_JITTER);
        }
    }
}
