//! Slot capacity resolution.
//!
//! Pure computation of whether a slot is bookable and how many seats remain,
//! from the slot's base configuration, its layered overrides and the
//! reservations currently attached to it. No I/O: ledgers call [`resolve`]
//! inside their atomic section with a fresh read of the slot's reservations.
//!
//! ```text
//! base ──► period overrides ──► manual overrides ──► EffectiveSlot
//!                                                        │
//!             used = Σ party over {pending, confirmed, seated}
//!                                                        ▼
//!               remaining = max(0, capacity − used)   SlotAvailability
//! ```

use crate::error::{BookingError, Result, SlotTakenReason};
use crate::types::{Reservation, ReservationStatus, SlotKey};
use serde::{Deserialize, Serialize};

/// Base configuration of a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConfig {
    /// Slot identity
    pub slot_key: SlotKey,
    /// Open for bookings
    pub is_open: bool,
    /// Seats offered
    pub capacity: u32,
    /// Largest party accepted, if limited
    pub max_group_size: Option<u32>,
}

/// Where an override comes from. Manual wins over period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideOrigin {
    /// One-off edit by staff
    Manual,
    /// Generated from an opening-period rule
    Period,
}

impl OverrideOrigin {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Period => "period",
        }
    }
}

/// Field-level patch over a slot's base configuration.
///
/// `None` leaves the field untouched. An override cannot remove an existing
/// group-size limit, only replace it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotOverride {
    /// Layer this patch belongs to
    pub origin: Option<OverrideOrigin>,
    /// Replacement open flag
    pub is_open: Option<bool>,
    /// Replacement capacity
    pub capacity: Option<u32>,
    /// Replacement group-size limit
    pub max_group_size: Option<u32>,
}

impl SlotOverride {
    /// A manual patch.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            origin: Some(OverrideOrigin::Manual),
            ..Self::default()
        }
    }

    /// A period patch.
    #[must_use]
    pub fn period() -> Self {
        Self {
            origin: Some(OverrideOrigin::Period),
            ..Self::default()
        }
    }

    /// Set the open flag.
    #[must_use]
    pub const fn open(mut self, is_open: bool) -> Self {
        self.is_open = Some(is_open);
        self
    }

    /// Set the capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the group-size limit.
    #[must_use]
    pub const fn max_group_size(mut self, max: u32) -> Self {
        self.max_group_size = Some(max);
        self
    }

    fn layer(&self) -> OverrideOrigin {
        self.origin.unwrap_or(OverrideOrigin::Manual)
    }
}

/// Slot configuration after overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSlot {
    /// Open flag after overrides
    pub is_open: bool,
    /// Capacity after overrides
    pub capacity: u32,
    /// Group limit after overrides
    pub max_group_size: Option<u32>,
}

impl EffectiveSlot {
    /// Open and with at least one seat.
    #[must_use]
    pub const fn effective_open(&self) -> bool {
        self.is_open && self.capacity > 0
    }

    fn patch(&mut self, over: &SlotOverride) {
        if let Some(is_open) = over.is_open {
            self.is_open = is_open;
        }
        if let Some(capacity) = over.capacity {
            self.capacity = capacity;
        }
        if let Some(max) = over.max_group_size {
            self.max_group_size = Some(max);
        }
    }
}

/// Apply period overrides, then manual overrides, field by field.
#[must_use]
pub fn effective_slot(base: &SlotConfig, overrides: &[SlotOverride]) -> EffectiveSlot {
    let mut slot = EffectiveSlot {
        is_open: base.is_open,
        capacity: base.capacity,
        max_group_size: base.max_group_size,
    };
    for layer in [OverrideOrigin::Period, OverrideOrigin::Manual] {
        for over in overrides.iter().filter(|o| o.layer() == layer) {
            slot.patch(over);
        }
    }
    slot
}

/// Capacity-relevant view of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupancy {
    /// Current status
    pub status: ReservationStatus,
    /// Guests
    pub party_size: u32,
}

impl From<&Reservation> for Occupancy {
    fn from(reservation: &Reservation) -> Self {
        Self {
            status: reservation.status,
            party_size: reservation.party_size(),
        }
    }
}

/// Live availability of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAvailability {
    /// Slot identity
    pub slot_key: SlotKey,
    /// Open and with positive capacity after overrides
    pub effective_open: bool,
    /// Capacity after overrides
    pub effective_capacity: u32,
    /// Seats held by pending, confirmed and seated reservations
    pub used: u32,
    /// `max(0, effective_capacity - used)`
    pub remaining_capacity: u32,
    /// Group limit after overrides
    pub max_group_size: Option<u32>,
}

impl SlotAvailability {
    /// Check that a party of `party_size` may be accepted right now.
    ///
    /// # Errors
    ///
    /// - [`BookingError::SlotTaken`] if the slot is not effectively open or the
    ///   party exceeds `max_group_size`
    /// - [`BookingError::InsufficientCapacity`] if fewer seats remain than requested
    pub fn admit(&self, party_size: u32) -> Result<()> {
        if !self.effective_open {
            return Err(BookingError::SlotTaken {
                slot_key: self.slot_key,
                reason: SlotTakenReason::Closed,
            });
        }
        if let Some(max_group_size) = self.max_group_size {
            if party_size > max_group_size {
                return Err(BookingError::SlotTaken {
                    slot_key: self.slot_key,
                    reason: SlotTakenReason::GroupTooLarge { max_group_size },
                });
            }
        }
        if party_size > self.remaining_capacity {
            return Err(BookingError::InsufficientCapacity {
                requested: party_size,
                remaining: self.remaining_capacity,
            });
        }
        Ok(())
    }
}

/// Resolve a slot's availability.
///
/// Only statuses for which [`ReservationStatus::consumes_capacity`] holds are
/// counted.
#[must_use]
pub fn resolve<I>(base: &SlotConfig, overrides: &[SlotOverride], occupants: I) -> SlotAvailability
where
    I: IntoIterator<Item = Occupancy>,
{
    let slot = effective_slot(base, overrides);
    let used = occupants
        .into_iter()
        .filter(|o| o.status.consumes_capacity())
        .fold(0_u32, |acc, o| acc.saturating_add(o.party_size));

    SlotAvailability {
        slot_key: base.slot_key,
        effective_open: slot.effective_open(),
        effective_capacity: slot.capacity,
        used,
        remaining_capacity: slot.capacity.saturating_sub(used),
        max_group_size: slot.max_group_size,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base(capacity: u32) -> SlotConfig {
        SlotConfig {
            slot_key: "2025-06-14#dinner#19:30".parse().unwrap(),
            is_open: true,
            capacity,
            max_group_size: None,
        }
    }

    fn occ(status: ReservationStatus, party_size: u32) -> Occupancy {
        Occupancy { status, party_size }
    }

    #[test]
    fn remaining_counts_only_consuming_statuses() {
        let occupants = vec![
            occ(ReservationStatus::Confirmed, 2),
            occ(ReservationStatus::Pending, 3),
            occ(ReservationStatus::Seated, 1),
            occ(ReservationStatus::CardPlaced, 4),
            occ(ReservationStatus::Cancelled, 6),
            occ(ReservationStatus::Completed, 6),
            occ(ReservationStatus::NoShow, 6),
            occ(ReservationStatus::Refused, 6),
            occ(ReservationStatus::Incident, 6),
        ];
        let availability = resolve(&base(10), &[], occupants);
        assert_eq!(availability.used, 6);
        assert_eq!(availability.remaining_capacity, 4);
        assert!(availability.effective_open);
    }

    #[test]
    fn manual_wins_over_period_field_by_field() {
        let overrides = vec![
            SlotOverride::manual().capacity(12),
            SlotOverride::period().open(false).capacity(30).max_group_size(6),
        ];
        let slot = effective_slot(&base(20), &overrides);
        assert_eq!(slot.capacity, 12);
        assert!(!slot.is_open);
        assert_eq!(slot.max_group_size, Some(6));
    }

    #[test]
    fn zero_capacity_is_not_effectively_open() {
        let availability = resolve(&base(0), &[], Vec::<Occupancy>::new());
        assert!(!availability.effective_open);
        assert!(matches!(
            availability.admit(1),
            Err(BookingError::SlotTaken {
                reason: SlotTakenReason::Closed,
                ..
            })
        ));
    }

    #[test]
    fn admit_reports_remaining_seats() {
        let availability = resolve(&base(8), &[], [occ(ReservationStatus::Confirmed, 6)]);
        assert_eq!(
            availability.admit(3),
            Err(BookingError::InsufficientCapacity {
                requested: 3,
                remaining: 2
            })
        );
        assert!(availability.admit(2).is_ok());
    }

    #[test]
    fn group_limit_rejects_as_slot_taken() {
        let overrides = vec![SlotOverride::manual().max_group_size(6)];
        let availability = resolve(&base(40), &overrides, Vec::<Occupancy>::new());
        assert!(matches!(
            availability.admit(7),
            Err(BookingError::SlotTaken {
                reason: SlotTakenReason::GroupTooLarge { max_group_size: 6 },
                ..
            })
        ));
    }

    fn any_status() -> impl Strategy<Value = ReservationStatus> {
        (0..ReservationStatus::ALL.len()).prop_map(|i| ReservationStatus::ALL[i])
    }

    proptest! {
        #[test]
        fn remaining_is_saturating_capacity_minus_consumed(
            capacity in 0_u32..200,
            parties in prop::collection::vec((any_status(), 1_u32..20), 0..30),
        ) {
            let occupants: Vec<_> = parties.iter().map(|(s, p)| occ(*s, *p)).collect();
            let expected_used: u32 = parties
                .iter()
                .filter(|(s, _)| matches!(
                    s,
                    ReservationStatus::Pending | ReservationStatus::Confirmed | ReservationStatus::Seated
                ))
                .map(|(_, p)| *p)
                .sum();
            let availability = resolve(&base(capacity), &[], occupants);
            prop_assert_eq!(availability.used, expected_used);
            prop_assert_eq!(availability.remaining_capacity, capacity.saturating_sub(expected_used));
        }
    }
}
