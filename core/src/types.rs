//! Domain types for the reservation engine.
//!
//! Value objects (identifiers, slot keys, party composition) and the versioned
//! [`Reservation`] record. Everything here is plain data: validation lives in
//! constructors and parsers so that malformed input never reaches the ledger.

use crate::error::{BookingError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = BookingError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| BookingError::invalid_input(stringify!($name), "not a valid UUID"))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for a restaurant (tenant)
    RestaurantId
);
uuid_id!(
    /// Identifier returned by the client directory for a guest
    ClientId
);
uuid_id!(
    /// Unique identifier for a large-party inquiry
    GroupInquiryId
);
uuid_id!(
    /// Unique identifier for a queued notification
    NotificationJobId
);

// ============================================================================
// Version (optimistic concurrency)
// ============================================================================

/// Reservation version used for optimistic concurrency.
///
/// Starts at 1 on creation and is incremented by exactly one on every accepted
/// mutation. A mutation carrying a stale version is rejected with
/// [`BookingError::VersionConflict`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version assigned to a freshly created reservation.
    pub const INITIAL: Self = Self(1);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Slot key
// ============================================================================

/// Meal service a slot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Midday service
    Lunch,
    /// Evening service
    Dinner,
}

impl Service {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        }
    }
}

impl FromStr for Service {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            _ => Err(BookingError::invalid_input(
                "service",
                "must be `lunch` or `dinner`",
            )),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a bookable slot: `YYYY-MM-DD#service#HH:MM`.
///
/// # Examples
///
/// ```
/// use tablebook_core::types::SlotKey;
///
/// let key: SlotKey = "2025-06-14#dinner#19:30".parse().unwrap();
/// assert_eq!(key.to_string(), "2025-06-14#dinner#19:30");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotKey {
    date: NaiveDate,
    service: Service,
    time: NaiveTime,
}

impl SlotKey {
    /// Build a slot key from already-parsed parts.
    #[must_use]
    pub const fn new(date: NaiveDate, service: Service, time: NaiveTime) -> Self {
        Self { date, service, time }
    }

    /// Parse the three wire components of a slot (`dateKey`, `service`, `timeKey`).
    ///
    /// The date must be exactly `YYYY-MM-DD` and the time exactly `HH:MM`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] naming the offending field.
    pub fn from_parts(date_key: &str, service: &str, time_key: &str) -> Result<Self> {
        if date_key.len() != 10 {
            return Err(BookingError::invalid_input("dateKey", "expected YYYY-MM-DD"));
        }
        let date = NaiveDate::parse_from_str(date_key, "%Y-%m-%d")
            .map_err(|_| BookingError::invalid_input("dateKey", "expected YYYY-MM-DD"))?;

        if time_key.len() != 5 {
            return Err(BookingError::invalid_input("timeKey", "expected HH:MM"));
        }
        let time = NaiveTime::parse_from_str(time_key, "%H:%M")
            .map_err(|_| BookingError::invalid_input("timeKey", "expected HH:MM"))?;

        Ok(Self::new(date, service.parse()?, time))
    }

    /// Calendar date of the slot.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Service of the slot.
    #[must_use]
    pub const fn service(&self) -> Service {
        self.service
    }

    /// Local start time of the slot.
    #[must_use]
    pub const fn time(&self) -> NaiveTime {
        self.time
    }

    /// `YYYY-MM-DD` component.
    #[must_use]
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `HH:MM` component.
    #[must_use]
    pub fn time_key(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    /// Absolute start instant of the slot for a restaurant at `utc_offset`.
    #[must_use]
    pub fn starts_at(&self, utc_offset: FixedOffset) -> DateTime<Utc> {
        let local = self.date.and_time(self.time);
        Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(utc_offset.local_minus_utc()))))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.date_key(), self.service, self.time_key())
    }
}

impl FromStr for SlotKey {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('#');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(date), Some(service), Some(time), None) => Self::from_parts(date, service, time),
            _ => Err(BookingError::invalid_input(
                "slotKey",
                "expected YYYY-MM-DD#service#HH:MM",
            )),
        }
    }
}

impl TryFrom<String> for SlotKey {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SlotKey> for String {
    fn from(key: SlotKey) -> Self {
        key.to_string()
    }
}

// ============================================================================
// Party
// ============================================================================

/// Guests in a booking. Party size is the sum of all three counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyComposition {
    /// Adults (at least one)
    pub adults: u32,
    /// Children
    pub children: u32,
    /// Babies (still count against capacity)
    pub babies: u32,
}

impl PartyComposition {
    /// Build and validate a party.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] when there is no adult.
    pub fn new(adults: u32, children: u32, babies: u32) -> Result<Self> {
        if adults == 0 {
            return Err(BookingError::invalid_input("adults", "at least one adult is required"));
        }
        Ok(Self {
            adults,
            children,
            babies,
        })
    }

    /// Total guest count.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.adults
            .saturating_add(self.children)
            .saturating_add(self.babies)
    }
}

// ============================================================================
// Reservation status
// ============================================================================

/// Lifecycle status of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Awaiting staff confirmation (large parties)
    #[serde(rename = "pending")]
    Pending,
    /// Confirmed booking
    #[serde(rename = "confirmed")]
    Confirmed,
    /// Guarantee card placed, guest not yet seated
    #[serde(rename = "cardPlaced")]
    CardPlaced,
    /// Guests are at the table
    #[serde(rename = "seated")]
    Seated,
    /// Service finished
    #[serde(rename = "completed")]
    Completed,
    /// Guest never showed up
    #[serde(rename = "noshow")]
    NoShow,
    /// Cancelled by guest or staff
    #[serde(rename = "cancelled")]
    Cancelled,
    /// Declined by staff
    #[serde(rename = "refused")]
    Refused,
    /// Something went wrong during service
    #[serde(rename = "incident")]
    Incident,
}

impl ReservationStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Pending,
        Self::Confirmed,
        Self::CardPlaced,
        Self::Seated,
        Self::Completed,
        Self::NoShow,
        Self::Cancelled,
        Self::Refused,
        Self::Incident,
    ];

    /// Wire / database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::CardPlaced => "cardPlaced",
            Self::Seated => "seated",
            Self::Completed => "completed",
            Self::NoShow => "noshow",
            Self::Cancelled => "cancelled",
            Self::Refused => "refused",
            Self::Incident => "incident",
        }
    }

    /// Whether a reservation in this status counts against slot capacity.
    ///
    /// Exactly pending, confirmed and seated consume capacity. `cardPlaced` does
    /// not: the card marks a guarantee, not an occupied seat.
    #[must_use]
    pub const fn consumes_capacity(&self) -> bool {
        match self {
            Self::Pending | Self::Confirmed | Self::Seated => true,
            Self::CardPlaced
            | Self::Completed
            | Self::NoShow
            | Self::Cancelled
            | Self::Refused
            | Self::Incident => false,
        }
    }

    /// Whether guest-facing modification (slot / party change) is allowed.
    #[must_use]
    pub const fn is_modifiable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether the cancel operation (guest token or staff) is allowed.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether an external table-assignment collaborator may attach tables.
    #[must_use]
    pub const fn is_assignable(&self) -> bool {
        self.consumes_capacity()
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BookingError::invalid_input("status", format!("unknown status `{s}`")))
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel a reservation came in through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    /// Public booking widget
    Online,
    /// Back-office
    Admin,
    /// Taken over the phone by staff
    Phone,
    /// Walk-in guest
    Walkin,
}

impl BookingSource {
    /// Wire / database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Admin => "admin",
            Self::Phone => "phone",
            Self::Walkin => "walkin",
        }
    }
}

impl FromStr for BookingSource {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(Self::Online),
            "admin" => Ok(Self::Admin),
            "phone" => Ok(Self::Phone),
            "walkin" => Ok(Self::Walkin),
            _ => Err(BookingError::invalid_input("source", format!("unknown source `{s}`"))),
        }
    }
}

/// Guest contact as supplied with the booking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Email address, used for notifications
    pub email: Option<String>,
    /// Phone number as typed by the guest
    pub phone: String,
}

impl ContactDetails {
    /// Structural validation only; normalisation belongs to the client directory.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] for an empty name or phone, or an
    /// email without `@`.
    pub fn validate(&self) -> Result<()> {
        if self.last_name.trim().is_empty() {
            return Err(BookingError::invalid_input("lastName", "must not be empty"));
        }
        if self.phone.chars().filter(char::is_ascii_digit).count() < 6 {
            return Err(BookingError::invalid_input("phone", "must contain at least 6 digits"));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(BookingError::invalid_input("email", "not an email address"));
            }
        }
        Ok(())
    }

    /// Display name used in messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// The versioned reservation record.
///
/// Reservations are never deleted; the status reflects the end state. Every
/// accepted mutation produces a new value with `version + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Identity
    pub id: ReservationId,
    /// Owning restaurant
    pub restaurant_id: RestaurantId,
    /// Slot the party is booked into
    pub slot_key: SlotKey,
    /// Guest counts
    pub party: PartyComposition,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Optimistic concurrency version
    pub version: Version,
    /// Guest identity from the client directory
    pub client_id: ClientId,
    /// Contact as given at booking time
    pub contact: ContactDetails,
    /// Two-letter language code for guest messages
    pub language: String,
    /// Free-text note from the guest
    pub note: Option<String>,
    /// Booking channel
    pub source: BookingSource,
    /// Tables attached by the floor-plan collaborator
    pub table_ids: Vec<String>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last accepted mutation
    pub updated_at: DateTime<Utc>,
    /// Set when the reservation entered `cancelled`
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when the reservation entered `refused`
    pub refused_at: Option<DateTime<Utc>>,
    /// Set when the reservation entered `seated`
    pub seated_at: Option<DateTime<Utc>>,
    /// Set when the reservation entered `completed`
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the reservation entered `noshow`
    pub noshow_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Total guests.
    #[must_use]
    pub const fn party_size(&self) -> u32 {
        self.party.size()
    }
}
