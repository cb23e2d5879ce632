//! Request and result types of the booking workflow.
//!
//! Wire requests are loosely shaped JSON. Each one is turned into a fully typed
//! value before anything else happens, so the workflow never carries partial
//! maps around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tablebook_core::error::{BookingError, Result};
use tablebook_core::types::{
    ContactDetails, GroupInquiryId, PartyComposition, Reservation, ReservationId,
    ReservationStatus, SlotKey, Version,
};

const MAX_NOTE_LEN: usize = 1000;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

fn default_language() -> String {
    "fr".to_string()
}

/// Per-call metadata supplied by the transport layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMeta {
    /// Caller-chosen key, stable across retries of one logical request
    pub idempotency_key: String,
    /// Rate-limit bucket (usually the remote IP)
    pub fingerprint: String,
    /// Remote address forwarded to the anti-bot verifier
    pub remote_ip: Option<String>,
}

impl RequestMeta {
    /// Metadata for a request from `remote_ip`.
    #[must_use]
    pub fn new(idempotency_key: impl Into<String>, remote_ip: impl Into<String>) -> Self {
        let remote_ip = remote_ip.into();
        Self {
            idempotency_key: idempotency_key.into(),
            fingerprint: remote_ip.clone(),
            remote_ip: Some(remote_ip),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let key = self.idempotency_key.trim();
        if key.is_empty() {
            return Err(BookingError::invalid_input("Idempotency-Key", "must not be empty"));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(BookingError::invalid_input(
                "Idempotency-Key",
                format!("must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"),
            ));
        }
        Ok(())
    }
}

/// Back-office role, resolved upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    /// Full control
    Owner,
    /// Runs the floor
    Manager,
    /// Front-of-house
    Staff,
    /// Read-only
    Viewer,
}

impl StaffRole {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Manager => "manager",
            Self::Staff => "staff",
            Self::Viewer => "viewer",
        }
    }

    /// Whether the role may change reservations.
    #[must_use]
    pub const fn can_mutate(&self) -> bool {
        !matches!(self, Self::Viewer)
    }

    /// Whether the role may edit slot configuration.
    #[must_use]
    pub const fn can_configure(&self) -> bool {
        matches!(self, Self::Owner | Self::Manager)
    }
}

impl FromStr for StaffRole {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "manager" => Ok(Self::Manager),
            "staff" => Ok(Self::Staff),
            "viewer" => Ok(Self::Viewer),
            _ => Err(BookingError::Forbidden {
                role: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting on an existing reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "actor", rename_all = "camelCase")]
pub enum Actor {
    /// Guest presenting a manage token
    Guest {
        /// Presented token
        token: String,
    },
    /// Back-office user
    Staff {
        /// Target reservation
        reservation_id: ReservationId,
        /// Role set by the upstream authenticator
        role: StaffRole,
    },
}

/// Public booking payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    /// `YYYY-MM-DD`
    pub date_key: String,
    /// `lunch` or `dinner`
    pub service: String,
    /// `HH:MM`
    pub time_key: String,
    /// Adults (at least one)
    pub adults: u32,
    /// Children
    #[serde(default)]
    pub children: u32,
    /// Babies
    #[serde(default)]
    pub babies: u32,
    /// Guest contact
    pub contact: ContactDetails,
    /// Two-letter language code
    #[serde(default = "default_language")]
    pub language: String,
    /// Free-text note
    #[serde(default)]
    pub note: Option<String>,
}

/// [`CreateBookingRequest`] after validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedBooking {
    /// Slot
    pub slot_key: SlotKey,
    /// Guests
    pub party: PartyComposition,
    /// Contact
    pub contact: ContactDetails,
    /// Normalised language
    pub language: String,
    /// Trimmed note, `None` when blank
    pub note: Option<String>,
}

impl CreateBookingRequest {
    /// Structural validation.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<ValidatedBooking> {
        let slot_key = SlotKey::from_parts(&self.date_key, &self.service, &self.time_key)?;
        let party = PartyComposition::new(self.adults, self.children, self.babies)?;
        self.contact.validate()?;
        Ok(ValidatedBooking {
            slot_key,
            party,
            contact: self.contact.clone(),
            language: normalize_language(&self.language)?,
            note: normalize_note(self.note.as_deref())?,
        })
    }
}

/// Guest or staff modification payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    /// Version the caller last saw
    pub expected_version: Version,
    /// `YYYY-MM-DD`
    pub date_key: String,
    /// `lunch` or `dinner`
    pub service: String,
    /// `HH:MM`
    pub time_key: String,
    /// Adults
    pub adults: u32,
    /// Children
    #[serde(default)]
    pub children: u32,
    /// Babies
    #[serde(default)]
    pub babies: u32,
    /// Two-letter language code
    #[serde(default = "default_language")]
    pub language: String,
    /// Free-text note
    #[serde(default)]
    pub note: Option<String>,
}

impl UpdateBookingRequest {
    /// Structural validation into a ledger change.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> Result<tablebook_core::ledger::ReservationChange> {
        Ok(tablebook_core::ledger::ReservationChange {
            expected_version: self.expected_version,
            slot_key: SlotKey::from_parts(&self.date_key, &self.service, &self.time_key)?,
            party: PartyComposition::new(self.adults, self.children, self.babies)?,
            note: normalize_note(self.note.as_deref())?,
            language: normalize_language(&self.language)?,
        })
    }
}

/// Cancellation payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    /// Version the caller last saw; guests usually omit it
    #[serde(default)]
    pub expected_version: Option<Version>,
}

/// Staff status change payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// Version the caller last saw
    pub expected_version: Version,
    /// Requested status
    pub to: ReservationStatus,
}

fn normalize_language(raw: &str) -> Result<String> {
    let lang = raw.trim().to_ascii_lowercase();
    if lang.len() == 2 && lang.chars().all(|c| c.is_ascii_lowercase()) {
        Ok(lang)
    } else {
        Err(BookingError::invalid_input("language", "expected a two-letter code"))
    }
}

fn normalize_note(raw: Option<&str>) -> Result<Option<String>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(note) if note.chars().count() > MAX_NOTE_LEN => Err(BookingError::invalid_input(
            "note",
            format!("must be at most {MAX_NOTE_LEN} characters"),
        )),
        Some(note) => Ok(Some(note.to_string())),
    }
}

/// Result of a reservation mutation, as returned (and replayed) to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationReceipt {
    /// Reservation
    pub reservation_id: ReservationId,
    /// Slot
    pub slot_key: SlotKey,
    /// Status after the mutation
    pub status: ReservationStatus,
    /// Version after the mutation
    pub version: Version,
    /// Guests
    pub party_size: u32,
    /// Manage token, only on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_token: Option<String>,
    /// Manage token expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_token_expires_at: Option<DateTime<Utc>>,
}

impl ReservationReceipt {
    /// Receipt for `reservation` without a token.
    #[must_use]
    pub fn of(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id,
            slot_key: reservation.slot_key,
            status: reservation.status,
            version: reservation.version,
            party_size: reservation.party_size(),
            manage_token: None,
            manage_token_expires_at: None,
        }
    }
}

/// Receipt for a large-party request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInquiryReceipt {
    /// Inquiry
    pub inquiry_id: GroupInquiryId,
    /// Slot asked for
    pub slot_key: SlotKey,
    /// Guests
    pub party_size: u32,
}

/// Outcome of an orchestrated booking operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BookingOutcome {
    /// A reservation was created or changed
    Reservation(ReservationReceipt),
    /// The party was routed to a group inquiry
    GroupInquiry(GroupInquiryReceipt),
}

impl BookingOutcome {
    /// The reservation receipt, if any.
    #[must_use]
    pub const fn reservation(&self) -> Option<&ReservationReceipt> {
        match self {
            Self::Reservation(receipt) => Some(receipt),
            Self::GroupInquiry(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> CreateBookingRequest {
        serde_json::from_value(serde_json::json!({
            "dateKey": "2025-06-14",
            "service": "dinner",
            "timeKey": "19:30",
            "adults": 2,
            "contact": {
                "firstName": "Ana",
                "lastName": "Silva",
                "email": "ana@example.com",
                "phone": "+33 6 12 34 56 78"
            },
            "note": "   "
        }))
        .unwrap()
    }

    #[test]
    fn defaults_and_normalisation() {
        let valid = request().validate().unwrap();
        assert_eq!(valid.language, "fr");
        assert_eq!(valid.note, None);
        assert_eq!(valid.party.size(), 2);
    }

    #[test]
    fn zero_adults_is_invalid_input() {
        let mut req = request();
        req.adults = 0;
        assert_eq!(req.validate().unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn outcome_is_tagged() {
        let outcome = BookingOutcome::GroupInquiry(GroupInquiryReceipt {
            inquiry_id: GroupInquiryId::new(),
            slot_key: "2025-06-14#dinner#19:30".parse().unwrap(),
            party_size: 20,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "groupInquiry");
        assert_eq!(json["partySize"], 20);
        let back: BookingOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn unknown_role_is_forbidden() {
        assert_eq!("Manager".parse::<StaffRole>().unwrap(), StaffRole::Manager);
        assert_eq!("intern".parse::<StaffRole>().unwrap_err().code(), "FORBIDDEN");
        assert!(!StaffRole::Viewer.can_mutate());
    }
}
