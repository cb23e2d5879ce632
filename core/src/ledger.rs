//! Reservation ledger: the atomic check-and-write at the heart of booking.
//!
//! The `plan_*` functions are the pure decision part. Given the current record
//! and a fresh [`SlotSnapshot`] they either produce the next version of the
//! reservation or reject with a typed error. Ledger implementations call them
//! while holding whatever makes the read-check-write indivisible for the slot
//! and reservation concerned (a row lock, a mutex), and persist the result
//! only on `Ok`.
//!
//! A rejected plan never has side effects: implementations must not write
//! anything before the plan succeeds.

use crate::capacity::{Occupancy, SlotAvailability, SlotConfig, SlotOverride, resolve};
use crate::error::{BookingError, Result};
use crate::status::ensure_transition;
use crate::tenant::BookingPolicy;
use crate::types::{
    BookingSource, ClientId, ContactDetails, PartyComposition, Reservation, ReservationId,
    ReservationStatus, RestaurantId, SlotKey, Version,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Validated input for a new reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReservation {
    /// Owning restaurant
    pub restaurant_id: RestaurantId,
    /// Requested slot
    pub slot_key: SlotKey,
    /// Guests
    pub party: PartyComposition,
    /// Identity resolved by the client directory
    pub client_id: ClientId,
    /// Contact as supplied
    pub contact: ContactDetails,
    /// Message language
    pub language: String,
    /// Guest note
    pub note: Option<String>,
    /// Channel
    pub source: BookingSource,
}

/// Guest-editable fields of a reservation, fully specified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationChange {
    /// Version the caller last saw
    pub expected_version: Version,
    /// Target slot (may equal the current one)
    pub slot_key: SlotKey,
    /// New guest counts
    pub party: PartyComposition,
    /// New note
    pub note: Option<String>,
    /// New message language
    pub language: String,
}

/// Everything capacity resolution needs, read inside the atomic section.
///
/// `occupants` must exclude the reservation being mutated so that its own
/// seats are not counted twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Base configuration
    pub config: SlotConfig,
    /// Manual and period overrides
    pub overrides: Vec<SlotOverride>,
    /// Other reservations on the slot
    pub occupants: Vec<Occupancy>,
}

impl SlotSnapshot {
    /// Resolve live availability.
    #[must_use]
    pub fn availability(&self) -> SlotAvailability {
        resolve(&self.config, &self.overrides, self.occupants.iter().copied())
    }
}

/// Status given to a freshly created reservation.
#[must_use]
pub const fn initial_status(policy: &BookingPolicy, party_size: u32) -> ReservationStatus {
    if party_size <= policy.auto_confirm_max_party {
        ReservationStatus::Confirmed
    } else {
        ReservationStatus::Pending
    }
}

/// Whether moving `from -> to` starts consuming seats again.
#[must_use]
pub const fn needs_capacity(from: ReservationStatus, to: ReservationStatus) -> bool {
    !from.consumes_capacity() && to.consumes_capacity()
}

/// Reject stale writers.
///
/// # Errors
///
/// [`BookingError::VersionConflict`] when `expected` is not the stored version.
pub fn ensure_version(current: &Reservation, expected: Version) -> Result<()> {
    if current.version == expected {
        Ok(())
    } else {
        Err(BookingError::VersionConflict {
            expected,
            actual: current.version,
        })
    }
}

fn ensure_not_group(policy: &BookingPolicy, party: &PartyComposition) -> Result<()> {
    if party.size() >= policy.group_inquiry_min_party {
        return Err(BookingError::invalid_input(
            "partySize",
            format!(
                "parties of {} or more are handled as group inquiries",
                policy.group_inquiry_min_party
            ),
        ));
    }
    Ok(())
}

/// Decide a creation.
///
/// # Errors
///
/// `SLOT_TAKEN` / `INSUFFICIENT_CAPACITY` from [`SlotAvailability::admit`], or
/// `INVALID_INPUT` for a party that belongs in a group inquiry.
pub fn plan_create(
    new: NewReservation,
    slot: &SlotSnapshot,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    ensure_not_group(policy, &new.party)?;
    slot.availability().admit(new.party.size())?;

    Ok(Reservation {
        id: ReservationId::new(),
        restaurant_id: new.restaurant_id,
        slot_key: new.slot_key,
        party: new.party,
        status: initial_status(policy, new.party.size()),
        version: Version::INITIAL,
        client_id: new.client_id,
        contact: new.contact,
        language: new.language,
        note: new.note,
        source: new.source,
        table_ids: Vec::new(),
        created_at: now,
        updated_at: now,
        cancelled_at: None,
        refused_at: None,
        seated_at: None,
        completed_at: None,
        noshow_at: None,
    })
}

/// Decide a guest modification. `slot` is the *target* slot.
///
/// Status is never changed by an update.
///
/// # Errors
///
/// `VERSION_CONFLICT`, `NOT_MODIFIABLE`, `INVALID_INPUT`, `SLOT_TAKEN`,
/// `INSUFFICIENT_CAPACITY`.
pub fn plan_update(
    current: &Reservation,
    change: ReservationChange,
    slot: &SlotSnapshot,
    policy: &BookingPolicy,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    ensure_version(current, change.expected_version)?;
    if !current.status.is_modifiable() {
        return Err(BookingError::NotModifiable {
            status: current.status,
        });
    }
    ensure_not_group(policy, &change.party)?;
    slot.availability().admit(change.party.size())?;

    let mut next = current.clone();
    next.slot_key = change.slot_key;
    next.party = change.party;
    next.note = change.note;
    next.language = change.language;
    if next.slot_key != current.slot_key {
        next.table_ids.clear();
    }
    next.version = current.version.next();
    next.updated_at = now;
    Ok(next)
}

/// Decide a staff status change.
///
/// `slot` is required when [`needs_capacity`] holds for the edge.
///
/// # Errors
///
/// `VERSION_CONFLICT`, `INVALID_TRANSITION`, and capacity rejections when the
/// reservation starts consuming seats again.
pub fn plan_transition(
    current: &Reservation,
    expected_version: Version,
    to: ReservationStatus,
    slot: Option<&SlotSnapshot>,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    ensure_version(current, expected_version)?;
    ensure_transition(current.status, to)?;

    if needs_capacity(current.status, to) {
        let slot = slot.ok_or_else(|| {
            BookingError::Storage("slot snapshot missing for a capacity-consuming transition".into())
        })?;
        slot.availability().admit(current.party_size())?;
    }

    let mut next = current.clone();
    next.status = to;
    stamp(&mut next, to, now);
    next.version = current.version.next();
    next.updated_at = now;
    Ok(next)
}

/// Decide a cancellation (guest token or staff cancel).
///
/// # Errors
///
/// `VERSION_CONFLICT` when a version is supplied and stale, `NOT_MODIFIABLE`
/// unless the reservation is pending or confirmed.
pub fn plan_cancel(
    current: &Reservation,
    expected_version: Option<Version>,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    if let Some(expected) = expected_version {
        ensure_version(current, expected)?;
    }
    if !current.status.is_cancellable() {
        return Err(BookingError::NotModifiable {
            status: current.status,
        });
    }
    ensure_transition(current.status, ReservationStatus::Cancelled)?;

    let mut next = current.clone();
    next.status = ReservationStatus::Cancelled;
    stamp(&mut next, ReservationStatus::Cancelled, now);
    next.version = current.version.next();
    next.updated_at = now;
    Ok(next)
}

/// Decide a table assignment written by the floor-plan collaborator.
///
/// # Errors
///
/// `VERSION_CONFLICT`, or `NOT_MODIFIABLE` for statuses that hold no seats.
pub fn plan_assign_tables(
    current: &Reservation,
    expected_version: Version,
    table_ids: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    ensure_version(current, expected_version)?;
    if !current.status.is_assignable() {
        return Err(BookingError::NotModifiable {
            status: current.status,
        });
    }
    let mut next = current.clone();
    next.table_ids = table_ids;
    next.version = current.version.next();
    next.updated_at = now;
    Ok(next)
}

fn stamp(reservation: &mut Reservation, to: ReservationStatus, now: DateTime<Utc>) {
    match to {
        ReservationStatus::Cancelled => reservation.cancelled_at = Some(now),
        ReservationStatus::Refused => reservation.refused_at = Some(now),
        ReservationStatus::Seated => reservation.seated_at = Some(now),
        ReservationStatus::Completed => reservation.completed_at = Some(now),
        ReservationStatus::NoShow => reservation.noshow_at = Some(now),
        ReservationStatus::Pending
        | ReservationStatus::Confirmed
        | ReservationStatus::CardPlaced
        | ReservationStatus::Incident => {},
    }
}

/// Slot configuration storage.
pub trait SlotCatalog: Send + Sync {
    /// Create or replace a slot's base configuration.
    fn upsert_slot(
        &self,
        restaurant_id: RestaurantId,
        config: SlotConfig,
    ) -> BoxFuture<'_, Result<()>>;

    /// Create or replace the override of the same origin on a slot.
    fn set_override(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
        over: SlotOverride,
    ) -> BoxFuture<'_, Result<()>>;

    /// Base configuration, if the slot exists.
    fn get_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Option<SlotConfig>>>;
}

/// Versioned reservation storage with atomic, capacity-checked mutations.
///
/// # Atomicity
///
/// Every mutating method performs read-version, read-capacity, validate and
/// write as one unit with respect to any other mutation touching the same slot
/// or the same reservation. Two concurrent creates on the last seat must end
/// with exactly one success.
pub trait ReservationLedger: Send + Sync {
    /// Insert a reservation at version 1 if the slot can take it.
    fn create<'a>(
        &'a self,
        new: NewReservation,
        policy: &'a BookingPolicy,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation>>;

    /// Apply a guest modification.
    fn update<'a>(
        &'a self,
        id: ReservationId,
        change: ReservationChange,
        policy: &'a BookingPolicy,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation>>;

    /// Apply a staff status change.
    fn transition(
        &self,
        id: ReservationId,
        expected_version: Version,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>>;

    /// Cancel a pending or confirmed reservation.
    fn cancel(
        &self,
        id: ReservationId,
        expected_version: Option<Version>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>>;

    /// Replace attached tables.
    fn assign_tables(
        &self,
        id: ReservationId,
        expected_version: Version,
        table_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>>;

    /// Fetch a reservation.
    fn get(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>>>;

    /// Live availability of a slot.
    fn slot_availability(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<SlotAvailability>>;

    /// All reservations on a slot, any status, oldest first.
    fn list_for_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Vec<Reservation>>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slot(capacity: u32, taken: &[(ReservationStatus, u32)]) -> SlotSnapshot {
        SlotSnapshot {
            config: SlotConfig {
                slot_key: "2025-06-14#dinner#19:30".parse().unwrap(),
                is_open: true,
                capacity,
                max_group_size: None,
            },
            overrides: Vec::new(),
            occupants: taken
                .iter()
                .map(|&(status, party_size)| Occupancy { status, party_size })
                .collect(),
        }
    }

    fn new_reservation(adults: u32) -> NewReservation {
        NewReservation {
            restaurant_id: RestaurantId::new(),
            slot_key: "2025-06-14#dinner#19:30".parse().unwrap(),
            party: PartyComposition::new(adults, 0, 0).unwrap(),
            client_id: ClientId::new(),
            contact: ContactDetails {
                first_name: "Ana".into(),
                last_name: "Silva".into(),
                email: None,
                phone: "0612345678".into(),
            },
            language: "fr".into(),
            note: None,
            source: BookingSource::Online,
        }
    }

    fn created(adults: u32) -> Reservation {
        plan_create(
            new_reservation(adults),
            &slot(40, &[]),
            &BookingPolicy::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn auto_confirm_threshold() {
        let policy = BookingPolicy::default();
        assert_eq!(initial_status(&policy, 4), ReservationStatus::Confirmed);
        assert_eq!(initial_status(&policy, 5), ReservationStatus::Pending);
        assert_eq!(created(4).status, ReservationStatus::Confirmed);
        assert_eq!(created(10).status, ReservationStatus::Pending);
        assert_eq!(created(4).version, Version::INITIAL);
    }

    #[test]
    fn create_rejects_when_seats_run_out() {
        let result = plan_create(
            new_reservation(3),
            &slot(8, &[(ReservationStatus::Confirmed, 6)]),
            &BookingPolicy::default(),
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(BookingError::InsufficientCapacity {
                requested: 3,
                remaining: 2
            })
        );
    }

    #[test]
    fn stale_version_changes_nothing() {
        let current = created(2);
        let change = ReservationChange {
            expected_version: Version::new(7),
            slot_key: current.slot_key,
            party: PartyComposition::new(3, 0, 0).unwrap(),
            note: None,
            language: "en".into(),
        };
        let err = plan_update(&current, change, &slot(40, &[]), &BookingPolicy::default(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::VersionConflict {
                expected: Version::new(7),
                actual: Version::INITIAL
            }
        );
    }

    #[test]
    fn update_bumps_version_and_keeps_status() {
        let current = created(6);
        let change = ReservationChange {
            expected_version: current.version,
            slot_key: "2025-06-15#lunch#12:00".parse().unwrap(),
            party: PartyComposition::new(2, 0, 0).unwrap(),
            note: Some("window".into()),
            language: "en".into(),
        };
        let next = plan_update(&current, change, &slot(40, &[]), &BookingPolicy::default(), Utc::now())
            .unwrap();
        assert_eq!(next.version, Version::new(2));
        assert_eq!(next.status, ReservationStatus::Pending);
        assert_eq!(next.party_size(), 2);
        assert_eq!(next.note.as_deref(), Some("window"));
    }

    #[test]
    fn restoring_a_cancelled_booking_rechecks_capacity() {
        let current = created(4);
        let cancelled = plan_cancel(&current, Some(current.version), Utc::now()).unwrap();
        assert!(cancelled.cancelled_at.is_some());

        let full = slot(4, &[(ReservationStatus::Confirmed, 4)]);
        let err = plan_transition(
            &cancelled,
            cancelled.version,
            ReservationStatus::Confirmed,
            Some(&full),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_CAPACITY");

        let restored = plan_transition(
            &cancelled,
            cancelled.version,
            ReservationStatus::Confirmed,
            Some(&slot(8, &[])),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(restored.version, Version::new(3));
    }

    #[test]
    fn transition_outside_table_is_rejected() {
        let current = created(2);
        let err = plan_transition(
            &current,
            current.version,
            ReservationStatus::Pending,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn seating_stamps_the_time() {
        let current = created(2);
        let now = Utc::now();
        let seated =
            plan_transition(&current, current.version, ReservationStatus::Seated, None, now).unwrap();
        assert_eq!(seated.seated_at, Some(now));
    }

    #[test]
    fn only_pending_or_confirmed_can_be_cancelled() {
        let current = created(2);
        let seated = plan_transition(
            &current,
            current.version,
            ReservationStatus::Seated,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            plan_cancel(&seated, None, Utc::now()),
            Err(BookingError::NotModifiable {
                status: ReservationStatus::Seated
            })
        );
    }

    #[test]
    fn groups_never_reach_the_ledger() {
        let result = plan_create(
            new_reservation(16),
            &slot(100, &[]),
            &BookingPolicy::default(),
            Utc::now(),
        );
        assert!(matches!(result, Err(BookingError::InvalidInput { .. })));
    }
}
