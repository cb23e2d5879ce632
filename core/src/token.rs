//! Manage tokens: opaque, single-use, time-boxed guest credentials.
//!
//! A token lets a guest cancel their own reservation without an account. It
//! expires a fixed margin before the slot starts and is burned on first
//! successful use.
//!
//! Token minting (randomness, encoding) happens in the runtime; this module
//! only defines the record, the validation rules and the storage port.

use crate::error::{BookingError, Result};
use crate::types::ReservationId;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a token authorises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    /// Guest self-service on a single reservation
    Manage,
}

impl TokenPurpose {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manage => "manage",
        }
    }
}

impl FromStr for TokenPurpose {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manage" => Ok(Self::Manage),
            _ => Err(BookingError::Storage(format!("unknown token purpose: {s}"))),
        }
    }
}

/// Stored manage token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageToken {
    /// Opaque URL-safe value handed to the guest
    pub token: String,
    /// Reservation the token acts on
    pub reservation_id: ReservationId,
    /// Scope
    pub purpose: TokenPurpose,
    /// Rejected from this instant on
    pub expires_at: DateTime<Utc>,
    /// Set once, on the first successful use
    pub used_at: Option<DateTime<Utc>>,
    /// Mint time
    pub created_at: DateTime<Utc>,
}

impl ManageToken {
    /// Apply the validation rules at `now`.
    #[must_use]
    pub fn validate(&self, now: DateTime<Utc>) -> TokenValidation {
        if self.used_at.is_some() {
            TokenValidation::Used
        } else if now >= self.expires_at {
            TokenValidation::Expired
        } else {
            TokenValidation::Valid(self.reservation_id)
        }
    }

    /// Whether this token may be handed out again instead of minting a new one.
    #[must_use]
    pub fn is_reusable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

/// Outcome of validating a presented token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenValidation {
    /// Unknown token
    NotFound,
    /// Past `expires_at`
    Expired,
    /// Already burned
    Used,
    /// Usable for this reservation
    Valid(ReservationId),
}

impl TokenValidation {
    /// Convert into the reservation id or the matching rejection.
    ///
    /// # Errors
    ///
    /// [`BookingError::TokenExpired`] for expired tokens, [`BookingError::TokenInvalid`]
    /// for unknown or used ones.
    pub fn into_result(self) -> Result<ReservationId> {
        match self {
            Self::Valid(id) => Ok(id),
            Self::Expired => Err(BookingError::TokenExpired),
            Self::NotFound | Self::Used => Err(BookingError::TokenInvalid),
        }
    }
}

/// Persistence for manage tokens.
pub trait ManageTokenStore: Send + Sync {
    /// Store `candidate` unless the reservation already holds a reusable token
    /// of the same purpose, in which case that token is returned untouched.
    fn insert_or_get(
        &self,
        candidate: ManageToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ManageToken>>;

    /// Look a token up by value.
    fn find<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<ManageToken>>>;

    /// Burn the token. Returns `false` if it was already used.
    fn mark_used<'a>(&'a self, token: &'a str, now: DateTime<Utc>) -> BoxFuture<'a, Result<bool>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(now: DateTime<Utc>) -> ManageToken {
        ManageToken {
            token: "abc".into(),
            reservation_id: ReservationId::new(),
            purpose: TokenPurpose::Manage,
            expires_at: now + Duration::hours(1),
            used_at: None,
            created_at: now,
        }
    }

    #[test]
    fn used_wins_over_expired() {
        let now = Utc::now();
        let mut t = token(now);
        t.used_at = Some(now);
        assert_eq!(t.validate(now + Duration::hours(2)), TokenValidation::Used);
        assert_eq!(t.validate(now).into_result(), Err(BookingError::TokenInvalid));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let t = token(now);
        assert_eq!(t.validate(now), TokenValidation::Valid(t.reservation_id));
        assert_eq!(t.validate(t.expires_at), TokenValidation::Expired);
        assert_eq!(
            t.validate(t.expires_at).into_result(),
            Err(BookingError::TokenExpired)
        );
        assert!(!t.is_reusable(t.expires_at));
    }
}
