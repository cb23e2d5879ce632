//! # Tablebook Testing
//!
//! Testing utilities for the Tablebook booking engine.
//!
//! This crate provides:
//! - Deterministic clocks
//! - In-memory implementations of every storage port
//! - Scripted collaborators (anti-bot, transports, rate limiting)
//! - Fixtures and a fully wired [`fixtures::BookingHarness`]
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use tablebook_testing::fixtures::{BookingHarness, booking_request, meta};
//!
//! #[tokio::test]
//! async fn books_a_table() {
//!     let harness = BookingHarness::with_capacity(10).await;
//!     let outcome = harness
//!         .orchestrator
//!         .create(&harness.ctx, &meta("k1"), &booking_request(2), Some("tok"), BookingSource::Online)
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome.reservation().unwrap().version, Version::INITIAL);
//! }
//! ```

use chrono::{DateTime, Utc};
use tablebook_core::environment::Clock;

/// Scripted collaborators
pub mod doubles;

/// Canned inputs and the booking harness
pub mod fixtures;

/// In-memory storage adapters
pub mod memory;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tablebook_testing::mocks::FixedClock;
    /// use tablebook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// ```
    /// use tablebook_testing::mocks::ManualClock;
    /// use tablebook_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::minutes(5));
    /// assert_eq!(clock.now(), start + Duration::minutes(5));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock reading `start`.
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Move forward by `delta`.
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use tablebook_core::types::ReservationStatus;

    /// Any reservation status.
    pub fn reservation_status() -> impl Strategy<Value = ReservationStatus> {
        proptest::sample::select(ReservationStatus::ALL.to_vec())
    }

    /// Party sizes a single reservation can have under the default policy.
    pub fn party_size() -> impl Strategy<Value = u32> {
        1_u32..16
    }

    /// Sequences of party sizes competing for one slot.
    pub fn competing_parties(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(party_size(), 1..max_len)
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output is captured by the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub use doubles::{FailingTransport, RecordingTransport, StaticBotVerifier, UnlimitedRateLimiter};
pub use fixtures::BookingHarness;
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(test_clock().now());
        let start = clock.now();
        clock.advance(Duration::hours(1));
        assert_eq!(clock.now() - start, Duration::hours(1));
    }
}
