//! Ports for collaborators the booking workflow calls but does not own.
//!
//! None of these are ever invoked while a ledger transaction is open.

use crate::error::Result;
use crate::types::{ClientId, ContactDetails, GroupInquiryId, RestaurantId, SlotKey};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anti-bot verification (pass/fail boundary).
pub trait BotVerifier: Send + Sync {
    /// `Ok(true)` when the token proves a human. `Err` only for transport failures.
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool>>;
}

/// Guest identity resolution.
///
/// Normalisation of phone numbers and emails is this collaborator's contract:
/// two contacts with the same normalised phone resolve to the same client.
pub trait ClientDirectory: Send + Sync {
    /// Find the client with this phone or create one.
    fn upsert_by_phone<'a>(
        &'a self,
        restaurant_id: RestaurantId,
        contact: &'a ContactDetails,
    ) -> BoxFuture<'a, Result<ClientId>>;
}

/// Phone key used by client directories: `+` followed by the digits only.
///
/// ```
/// # use tablebook_core::collaborators::normalize_phone;
/// assert_eq!(normalize_phone("+33 6 12-34.56.78"), "+33612345678");
/// ```
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    format!("+{digits}")
}

/// Lowercased, trimmed email; `None` when blank.
#[must_use]
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
}

/// Large-party request recorded instead of a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInquiry {
    /// Identity
    pub id: GroupInquiryId,
    /// Restaurant asked
    pub restaurant_id: RestaurantId,
    /// Slot wished for
    pub slot_key: SlotKey,
    /// Guests
    pub party_size: u32,
    /// Who to call back
    pub contact: ContactDetails,
    /// Free text
    pub note: Option<String>,
    /// Message language
    pub language: String,
    /// Receipt time
    pub created_at: DateTime<Utc>,
}

/// Persistence for group inquiries.
pub trait GroupInquiryStore: Send + Sync {
    /// Store a new inquiry.
    fn create(&self, inquiry: GroupInquiry) -> BoxFuture<'_, Result<GroupInquiry>>;

    /// Remove an inquiry recorded by a request that lost its idempotency key
    /// to a concurrent one. Removing an unknown id is not an error.
    fn discard(&self, id: GroupInquiryId) -> BoxFuture<'_, Result<()>>;
}

/// Request budget per caller fingerprint.
pub trait RateLimiter: Send + Sync {
    /// Take one unit of budget for `key`, or return how long to wait.
    fn try_acquire(&self, key: &str) -> std::result::Result<(), Duration>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_email_is_dropped() {
        assert_eq!(normalize_email(Some("  ")), None);
        assert_eq!(
            normalize_email(Some(" Ana@Example.COM ")).as_deref(),
            Some("ana@example.com")
        );
    }

    #[test]
    fn formatting_does_not_split_clients() {
        assert_eq!(normalize_phone("06 12 34 56 78"), normalize_phone("06.12.34.56.78"));
    }
}
