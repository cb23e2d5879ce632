//! HTTP server module.
//!
//! - Application state
//! - Health check endpoint
//! - Router configuration
//! - Process wiring and graceful shutdown

pub mod bootstrap;
pub mod health;
pub mod routes;
pub mod state;

pub use health::health_check;
pub use routes::build_router;
pub use state::AppState;
