//! Restaurant (tenant) context passed into every operation.
//!
//! The context is built and validated once at startup and then handed to each
//! orchestrator call. There is no ambient "current restaurant" lookup.

use crate::error::{BookingError, Result};
use crate::types::{RestaurantId, SlotKey};
use chrono::{DateTime, Duration, FixedOffset, Utc};

/// Business thresholds applied by the booking workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Parties up to this size are confirmed immediately; larger ones stay pending.
    pub auto_confirm_max_party: u32,
    /// Parties of this size or more become group inquiries instead of reservations.
    pub group_inquiry_min_party: u32,
    /// How long a cached idempotent result is replayed.
    pub idempotency_ttl: Duration,
    /// Manage tokens expire this long before the slot starts.
    pub manage_token_margin: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            auto_confirm_max_party: 4,
            group_inquiry_min_party: 16,
            idempotency_ttl: Duration::hours(24),
            manage_token_margin: Duration::hours(2),
        }
    }
}

/// Explicit tenant configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestaurantContext {
    /// Tenant identity
    pub restaurant_id: RestaurantId,
    /// Offset used to turn slot keys into instants
    pub utc_offset: FixedOffset,
    /// Business thresholds
    pub policy: BookingPolicy,
}

impl RestaurantContext {
    /// Build a context with the default policy.
    #[must_use]
    pub fn new(restaurant_id: RestaurantId, utc_offset: FixedOffset) -> Self {
        Self {
            restaurant_id,
            utc_offset,
            policy: BookingPolicy::default(),
        }
    }

    /// Replace the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Startup validation of the thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] when the thresholds are inconsistent.
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        if policy.auto_confirm_max_party == 0 {
            return Err(BookingError::invalid_input(
                "policy.autoConfirmMaxParty",
                "must be at least 1",
            ));
        }
        if policy.auto_confirm_max_party >= policy.group_inquiry_min_party {
            return Err(BookingError::invalid_input(
                "policy.groupInquiryMinParty",
                "must be greater than the auto-confirm threshold",
            ));
        }
        if policy.idempotency_ttl <= Duration::zero() {
            return Err(BookingError::invalid_input(
                "policy.idempotencyTtl",
                "must be positive",
            ));
        }
        if policy.manage_token_margin < Duration::zero() {
            return Err(BookingError::invalid_input(
                "policy.manageTokenMargin",
                "must not be negative",
            ));
        }
        Ok(())
    }

    /// Pick the single configured restaurant out of `candidates`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] unless exactly one candidate is given
    /// and it validates.
    pub fn single(mut candidates: Vec<Self>) -> Result<Self> {
        if candidates.len() != 1 {
            return Err(BookingError::invalid_input(
                "restaurant",
                format!("expected exactly one restaurant, found {}", candidates.len()),
            ));
        }
        let context = candidates.remove(0);
        context.validate()?;
        Ok(context)
    }

    /// Start instant of `slot` in this restaurant.
    #[must_use]
    pub fn slot_start(&self, slot: &SlotKey) -> DateTime<Utc> {
        slot.starts_at(self.utc_offset)
    }

    /// Expiry of manage tokens for a reservation in `slot`.
    #[must_use]
    pub fn manage_token_expiry(&self, slot: &SlotKey) -> DateTime<Utc> {
        self.slot_start(slot) - self.policy.manage_token_margin
    }
}
