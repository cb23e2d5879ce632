//! # Tablebook Core
//!
//! Domain types, pure decision functions and storage ports for the Tablebook
//! reservation engine.
//!
//! This crate is the functional core: nothing here performs I/O. The runtime
//! orchestrates the ports defined here, and the `postgres` and `testing` crates
//! implement them.
//!
//! ## Core Concepts
//!
//! - **Slot**: a bookable `date#service#time` with a seat capacity, optionally
//!   patched by manual and period overrides ([`capacity`])
//! - **Reservation**: a versioned record whose status follows a fixed
//!   transition table ([`types`], [`status`])
//! - **Ledger**: atomic, capacity-checked writes of reservations ([`ledger`])
//! - **Idempotency**: replay of client-retried requests ([`idempotency`])
//! - **Outbox**: durable guest notifications with bounded retries ([`notification`])
//! - **Manage tokens**: single-use guest credentials ([`token`])
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit tenant context, validated at startup ([`tenant`])
//! - Dependency injection via object-safe port traits
//!
//! ## Example
//!
//! ```
//! use tablebook_core::capacity::{SlotConfig, Occupancy, resolve};
//! use tablebook_core::types::ReservationStatus;
//!
//! let slot = SlotConfig {
//!     slot_key: "2025-06-14#dinner#19:30".parse().unwrap(),
//!     is_open: true,
//!     capacity: 8,
//!     max_group_size: None,
//! };
//! let occupied = [Occupancy { status: ReservationStatus::Confirmed, party_size: 6 }];
//! let availability = resolve(&slot, &[], occupied);
//! assert_eq!(availability.remaining_capacity, 2);
//! assert!(availability.admit(3).is_err());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{BookingError, Result};

pub mod capacity;
pub mod collaborators;
pub mod environment;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod notification;
pub mod status;
pub mod tenant;
pub mod token;
pub mod types;
