//! Error taxonomy for booking operations.
//!
//! Every rejection a caller can observe is a variant of [`BookingError`]. Variants
//! carry enough structured data to render a precise message (requested vs
//! remaining seats, expected vs actual version) and map to a stable wire code via
//! [`BookingError::code`].

use crate::types::{ReservationStatus, SlotKey, Version};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Why a slot refused a party outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SlotTakenReason {
    /// Slot is closed or has no capacity after overrides
    Closed,
    /// Party exceeds the slot's maximum group size
    GroupTooLarge {
        /// Configured limit
        max_group_size: u32,
    },
}

/// Errors surfaced by the reservation engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookingError {
    // ═══════════════════════════════════════════════════════════
    // Client errors
    // ═══════════════════════════════════════════════════════════
    /// Malformed or missing field.
    #[error("Invalid input for `{field}`: {reason}")]
    InvalidInput {
        /// Offending field (wire name)
        field: String,
        /// Human readable reason
        reason: String,
    },

    /// Slot, reservation or token does not exist.
    #[error("{resource} `{id}` not found")]
    NotFound {
        /// Kind of resource
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Slot is closed or cannot host a group of this size.
    #[error("Slot {slot_key} is not bookable ({reason:?})")]
    SlotTaken {
        /// Slot that refused the booking
        slot_key: SlotKey,
        /// Why
        reason: SlotTakenReason,
    },

    /// Not enough seats left in the slot.
    #[error("Insufficient capacity: requested {requested}, remaining {remaining}")]
    InsufficientCapacity {
        /// Party size requested
        requested: u32,
        /// Seats left at the moment of the check
        remaining: u32,
    },

    /// Stale optimistic-concurrency version.
    #[error("Version conflict: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Version the caller submitted
        expected: Version,
        /// Version currently stored
        actual: Version,
    },

    /// Manage token unknown or already used.
    #[error("Manage token is invalid")]
    TokenInvalid,

    /// Manage token past its expiry.
    #[error("Manage token has expired")]
    TokenExpired,

    /// Anti-bot verification rejected the request.
    #[error("Anti-bot verification failed")]
    TurnstileFailed,

    /// Caller exceeded the request budget.
    #[error("Too many requests, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait before retrying
        retry_after: Duration,
    },

    /// Idempotency key reused with a different request body.
    #[error("Idempotency key `{key}` was already used for a different request")]
    IdempotencyKeyReused {
        /// The reused key
        key: String,
    },

    /// Requested status change is not in the transition table.
    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition {
        /// Current status
        from: ReservationStatus,
        /// Requested status
        to: ReservationStatus,
    },

    /// Reservation status does not allow this operation.
    #[error("Reservation in status {status} cannot be modified")]
    NotModifiable {
        /// Current status
        status: ReservationStatus,
    },

    /// Staff role lacks the permission.
    #[error("Role `{role}` may not perform this operation")]
    Forbidden {
        /// Role that was presented
        role: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════
    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// External collaborator (anti-bot, client directory) failure.
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

impl BookingError {
    /// Shorthand for [`BookingError::InvalidInput`].
    #[must_use]
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BookingError::NotFound`].
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Stable wire code.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tablebook_core::error::BookingError;
    /// assert_eq!(BookingError::TokenExpired.code(), "TOKEN_EXPIRED");
    /// ```
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::SlotTaken { .. } => "SLOT_TAKEN",
            Self::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TurnstileFailed => "TURNSTILE_FAILED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::IdempotencyKeyReused { .. } => "IDEMPOTENCY_KEY_REUSED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NotModifiable { .. } => "NOT_MODIFIABLE",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Collaborator(_) => "COLLABORATOR_ERROR",
        }
    }

    /// Returns `true` if the caller caused the error (as opposed to infrastructure).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Collaborator(_))
    }

    /// Structured details for rendering a precise message.
    #[must_use]
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::InvalidInput { field, reason } => {
                serde_json::json!({ "field": field, "reason": reason })
            },
            Self::NotFound { resource, id } => serde_json::json!({ "resource": resource, "id": id }),
            Self::SlotTaken { slot_key, reason } => {
                serde_json::json!({ "slotKey": slot_key, "cause": reason })
            },
            Self::InsufficientCapacity {
                requested,
                remaining,
            } => serde_json::json!({ "requested": requested, "remaining": remaining }),
            Self::VersionConflict { expected, actual } => {
                serde_json::json!({ "expected": expected, "actual": actual })
            },
            Self::RateLimited { retry_after } => {
                serde_json::json!({ "retryAfterSeconds": retry_after.as_secs() })
            },
            Self::InvalidTransition { from, to } => serde_json::json!({ "from": from, "to": to }),
            Self::NotModifiable { status } => serde_json::json!({ "status": status }),
            Self::IdempotencyKeyReused { key } => serde_json::json!({ "key": key }),
            Self::Forbidden { role } => serde_json::json!({ "role": role }),
            Self::TokenInvalid
            | Self::TokenExpired
            | Self::TurnstileFailed
            | Self::Storage(_)
            | Self::Collaborator(_) => serde_json::Value::Null,
        }
    }
}
