//! Application state shared by the handlers.

use std::sync::Arc;
use tablebook_core::tenant::RestaurantContext;
use tablebook_runtime::orchestrator::BookingOrchestrator;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; everything inside is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Booking workflow
    pub orchestrator: BookingOrchestrator,
    /// Restaurant served by this process
    pub ctx: Arc<RestaurantContext>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(orchestrator: BookingOrchestrator, ctx: RestaurantContext) -> Self {
        Self {
            orchestrator,
            ctx: Arc::new(ctx),
        }
    }
}
