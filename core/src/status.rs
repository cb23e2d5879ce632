//! Reservation status state machine.
//!
//! A fixed, exhaustively matched adjacency table. Nothing here applies a
//! transition; callers ask [`is_valid_transition`] before every write.
//!
//! Statuses that look terminal (`cancelled`, `completed`, `noshow`, `refused`)
//! keep outgoing edges so staff can correct mistakes, e.g. restore a cancelled
//! booking to `confirmed`.

use crate::error::{BookingError, Result};
use crate::types::ReservationStatus;

/// Statuses reachable in one step from `from`.
#[must_use]
pub const fn allowed_targets(from: ReservationStatus) -> &'static [ReservationStatus] {
    use ReservationStatus::{
        Cancelled, CardPlaced, Completed, Confirmed, Incident, NoShow, Pending, Refused, Seated,
    };

    match from {
        Pending => &[Confirmed, Refused, Cancelled],
        Confirmed => &[CardPlaced, Seated, Cancelled, NoShow, Completed],
        CardPlaced => &[Seated, Cancelled, NoShow, Incident, Confirmed],
        Seated => &[Completed, Incident, NoShow, Confirmed, Cancelled],
        Completed => &[Seated, Confirmed, Incident, Cancelled],
        NoShow => &[Seated, Confirmed, Cancelled],
        Cancelled => &[Confirmed],
        Refused => &[Confirmed, Cancelled],
        Incident => &[Seated, Completed, Cancelled],
    }
}

/// Whether `from -> to` is in the transition table.
///
/// # Examples
///
/// ```
/// use tablebook_core::status::is_valid_transition;
/// use tablebook_core::types::ReservationStatus::*;
///
/// assert!(is_valid_transition(Pending, Confirmed));
/// assert!(is_valid_transition(Cancelled, Confirmed));
/// assert!(!is_valid_transition(Cancelled, Seated));
/// ```
#[must_use]
pub fn is_valid_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Like [`is_valid_transition`] but returns a typed rejection.
///
/// # Errors
///
/// Returns [`BookingError::InvalidTransition`] when the edge does not exist.
pub fn ensure_transition(from: ReservationStatus, to: ReservationStatus) -> Result<()> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}
