//! Token-bucket rate limiter keyed by caller fingerprint.
//!
//! ```text
//! Bucket per key (capacity: burst)
//! ├─ refills at `per_second` tokens per second
//! ├─ each request takes one token
//! └─ empty bucket → rejected with the time until the next token
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tablebook_core::collaborators::RateLimiter;

const PRUNE_THRESHOLD: usize = 10_000;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens per key (burst)
    pub burst: u32,
    /// Tokens refilled per second
    pub per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 20,
            per_second: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-process token bucket per key.
///
/// Once the map grows large, buckets that have refilled completely are dropped:
/// a full bucket is indistinguishable from a missing one.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// [`RateLimiter::try_acquire`] with an explicit instant.
    ///
    /// # Errors
    ///
    /// Returns the wait until one token is available.
    pub fn try_acquire_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let capacity = f64::from(self.config.burst);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.len() >= PRUNE_THRESHOLD {
            let per_second = self.config.per_second;
            buckets.retain(|_, b| {
                let idle = now.saturating_duration_since(b.last_refill).as_secs_f64();
                b.tokens + idle * per_second < capacity
            });
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.per_second).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - bucket.tokens;
        let wait = if self.config.per_second > 0.0 {
            Duration::from_secs_f64(missing / self.config.per_second)
        } else {
            Duration::MAX
        };

        tracing::warn!(
            key,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "Rate limit exceeded"
        );
        Err(wait)
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        self.try_acquire_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32, per_second: f64) -> TokenBucketLimiter {
        TokenBucketLimiter::new(RateLimitConfig { burst, per_second })
    }

    #[test]
    fn burst_is_allowed_then_rejected() {
        let limiter = limiter(3, 1.0);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.try_acquire_at("1.2.3.4", now).is_ok());
        }
        let wait = limiter.try_acquire_at("1.2.3.4", now);
        assert_eq!(wait, Err(Duration::from_secs(1)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, 1.0);
        let now = Instant::now();
        assert!(limiter.try_acquire_at("a", now).is_ok());
        assert!(limiter.try_acquire_at("a", now).is_err());
        assert!(limiter.try_acquire_at("b", now).is_ok());
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = limiter(1, 2.0);
        let now = Instant::now();
        assert!(limiter.try_acquire_at("a", now).is_ok());
        assert!(limiter.try_acquire_at("a", now).is_err());
        assert!(
            limiter
                .try_acquire_at("a", now + Duration::from_millis(500))
                .is_ok()
        );
    }
}
