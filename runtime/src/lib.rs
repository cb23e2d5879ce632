//! # Tablebook Runtime
//!
//! The imperative shell around [`tablebook_core`]: everything that talks to
//! ports, clocks and the outside world.
//!
//! ## Components
//!
//! - **[`orchestrator::BookingOrchestrator`]**: create, update, cancel and staff
//!   transitions with rate limiting, idempotency, anti-bot checks and the
//!   notification outbox
//! - **[`worker::NotificationWorker`]**: claims queued jobs, renders and sends
//!   them, schedules retries
//! - **[`tokens::ManageTokenIssuer`]**: guest self-service tokens
//! - **[`rate_limit::TokenBucketLimiter`]**: per-fingerprint request budget
//! - **[`retry`]**: backoff schedules
//! - **[`metrics`]**: Prometheus recorder and metric names
//!
//! ## Example
//!
//! ```ignore
//! use tablebook_runtime::orchestrator::{BookingEnvironment, BookingOrchestrator};
//!
//! let orchestrator = BookingOrchestrator::new(environment);
//! let outcome = orchestrator
//!     .create(&ctx, &meta, &request, Some(bot_token), BookingSource::Online)
//!     .await?;
//! ```

/// Request, role and outcome types
pub mod commands;

/// Prometheus metrics for observability
pub mod metrics;

/// Booking workflow
pub mod orchestrator;

/// Per-caller rate limiting
pub mod rate_limit;

/// Guest message templates
pub mod render;

/// Retry logic with exponential backoff
pub mod retry;

/// Manage token issuing
pub mod tokens;

/// Notification delivery
pub mod worker;

pub use commands::{
    Actor, BookingOutcome, CancelBookingRequest, CreateBookingRequest, RequestMeta,
    ReservationReceipt, StaffRole, TransitionRequest, UpdateBookingRequest,
};
pub use orchestrator::{BookingEnvironment, BookingOrchestrator};
pub use worker::{NotificationWorker, WorkerConfig};
