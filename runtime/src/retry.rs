//! Backoff policies.
//!
//! Two flavours share the same exponential shape:
//!
//! - [`BackoffPolicy`] schedules *durable* retries of notification jobs: the
//!   worker records `next_retry_at` and moves on, nothing sleeps.
//! - [`RetryPolicy`] with [`retry_with_backoff`] retries an in-process
//!   operation (e.g. connecting to the database at startup) by sleeping.
//!
//! # Example
//!
//! ```rust
//! use tablebook_runtime::retry::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default();
//! let schedule: Vec<u64> = (1..=5).map(|a| policy.compute_backoff_ms(a)).collect();
//! assert_eq!(schedule, [60_000, 120_000, 240_000, 480_000, 960_000]);
//! ```

use chrono::{DateTime, Utc};
use std::time::Duration;
use tablebook_core::notification::FailureRecord;
use tokio::time::sleep;

/// Retry schedule for queued notification jobs.
///
/// # Default Values
///
/// - `base_delay`: 60 seconds
/// - `max_attempts`: 5
/// - `max_delay`: 24 hours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Attempts after which a job is abandoned
    pub max_attempts: u32,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_attempts: 5,
            max_delay: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    ///
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`. Attempt 0 is
    /// treated like attempt 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// [`Self::delay_for_attempt`] in milliseconds.
    #[must_use]
    pub fn compute_backoff_ms(&self, attempt: u32) -> u64 {
        u64::try_from(self.delay_for_attempt(attempt).as_millis()).unwrap_or(u64::MAX)
    }

    /// Outcome of one more failed delivery for a job that had already failed
    /// `previous_attempts` times.
    ///
    /// Reaching `max_attempts` is terminal and leaves no retry time.
    #[must_use]
    pub fn after_failure(
        &self,
        previous_attempts: u32,
        error_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> FailureRecord {
        let attempt_count = previous_attempts.saturating_add(1);
        let terminal = attempt_count >= self.max_attempts;
        let next_retry_at = if terminal {
            None
        } else {
            let delay_ms = i64::try_from(self.compute_backoff_ms(attempt_count)).unwrap_or(i64::MAX);
            Some(now + chrono::Duration::milliseconds(delay_ms))
        };

        FailureRecord {
            attempt_count,
            error_code: error_code.into(),
            next_retry_at,
            terminal,
        }
    }

    /// Terminal record for a failure no retry can fix.
    #[must_use]
    pub fn give_up(previous_attempts: u32, error_code: impl Into<String>) -> FailureRecord {
        FailureRecord {
            attempt_count: previous_attempts.saturating_add(1),
            error_code: error_code.into(),
            next_retry_at: None,
            terminal: true,
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    policy: BackoffPolicy,
}

impl BackoffPolicyBuilder {
    /// Set the delay after the first failure.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Set the number of attempts before giving up.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Set the cap for a single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        self.policy
    }
}

/// In-process retry configuration.
///
/// # Default Values
///
/// - `max_retries`: 5
/// - `initial_delay`: 500ms
/// - `max_delay`: 10 seconds
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry
    pub initial_delay: Duration,
    /// Cap for a single sleep
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (0-based): `initial_delay * 2^retry`, capped.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Retry an async operation, sleeping between attempts.
///
/// Returns the first success, or the last error once `max_retries` is exhausted.
///
/// # Errors
///
/// The error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    tracing::info!(retry, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) if retry >= policy.max_retries => {
                tracing::error!(retry, error = %err, "Operation failed after max retries");
                return Err(err);
            },
            Err(err) => {
                let delay = policy.delay_for_retry(retry);
                tracing::warn!(
                    retry,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
                retry += 1;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn schedule_doubles_from_one_minute() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.compute_backoff_ms(1), 60_000);
        assert_eq!(policy.compute_backoff_ms(2), 120_000);
        assert_eq!(policy.compute_backoff_ms(3), 240_000);
        assert_eq!(policy.compute_backoff_ms(4), 480_000);
        assert_eq!(policy.compute_backoff_ms(5), 960_000);
    }

    #[test]
    fn fifth_failure_is_terminal() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();

        let fourth = policy.after_failure(3, "SMTP_TIMEOUT", now);
        assert_eq!(fourth.attempt_count, 4);
        assert!(!fourth.terminal);
        assert_eq!(fourth.next_retry_at, Some(now + chrono::Duration::minutes(8)));

        let fifth = policy.after_failure(4, "SMTP_TIMEOUT", now);
        assert_eq!(fifth.attempt_count, 5);
        assert!(fifth.terminal);
        assert_eq!(fifth.next_retry_at, None);
    }

    #[test]
    fn giving_up_is_terminal_at_once() {
        let record = BackoffPolicy::give_up(0, "NO_RECIPIENT");
        assert_eq!(record.attempt_count, 1);
        assert!(record.terminal);
        assert_eq!(record.next_retry_at, None);
    }

    #[test]
    fn builder_overrides_defaults() {
        let policy = BackoffPolicy::builder()
            .base_delay(Duration::from_secs(1))
            .max_attempts(3)
            .max_delay(Duration::from_secs(3))
            .build();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
        assert!(policy.after_failure(2, "x", Utc::now()).terminal);
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 0_u32..200) {
            let policy = BackoffPolicy::default();
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&policy, || {
            let c = Arc::clone(&counter);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err(format!("attempt {attempt}")) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry_with_backoff(&policy, || {
            let c = Arc::clone(&counter);
            async move { Err(format!("attempt {}", c.fetch_add(1, Ordering::SeqCst))) }
        })
        .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
