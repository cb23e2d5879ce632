//! # Tablebook Service
//!
//! The deployable shell: HTTP API, collaborator adapters and the notification
//! worker pool, wired over the `PostgreSQL` stores.
//!
//! # Request Flow
//!
//! 1. **HTTP request** arrives at an Axum handler
//! 2. **Extract** client IP, idempotency key and staff role from headers
//! 3. **Build** a typed request and call the [`BookingOrchestrator`](tablebook_runtime::BookingOrchestrator)
//! 4. **Map** the outcome, or the [`BookingError`](tablebook_core::error::BookingError), to a response
//!
//! # Layout
//!
//! - [`config`]: environment configuration
//! - [`server`]: router, state and bootstrap
//! - [`api`]: route handlers
//! - [`turnstile`], [`transport`]: anti-bot and mail adapters

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

/// HTTP handlers
pub mod api;

/// Environment configuration
pub mod config;

/// HTTP error mapping
pub mod error;

/// Request extractors
pub mod extractors;

/// Correlation id tracking
pub mod middleware;

/// Router, state and process wiring
pub mod server;

/// Notification transports
pub mod transport;

/// Anti-bot verification
pub mod turnstile;

pub use config::Config;
pub use error::AppError;
pub use server::{AppState, build_router};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
