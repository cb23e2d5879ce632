//! Slot endpoints.
//!
//! - GET /api/slots/:slot_key/availability - public availability for the widget
//! - PUT /api/slots/:slot_key - base configuration (owner, manager)
//! - PUT /api/slots/:slot_key/override - manual or period override (owner, manager)
//! - GET /api/slots/:slot_key/reservations - floor list (staff)
//!
//! Slot keys look like `2025-06-14#dinner#19:30`; the `#` must be sent
//! percent-encoded.

use crate::error::AppError;
use crate::extractors::StaffAuth;
use crate::server::state::AppState;
use crate::WebResult;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use tablebook_core::capacity::{SlotAvailability, SlotConfig, SlotOverride};
use tablebook_core::types::{Reservation, SlotKey};

/// Base configuration payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSettings {
    /// Open for bookings
    pub is_open: bool,
    /// Seats offered
    pub capacity: u32,
    /// Largest party accepted
    #[serde(default)]
    pub max_group_size: Option<u32>,
}

fn slot_key(raw: &str) -> Result<SlotKey, AppError> {
    Ok(raw.parse::<SlotKey>()?)
}

/// Live availability of a slot.
///
/// ```bash
/// curl http://localhost:8080/api/slots/2025-06-14%23dinner%2319:30/availability
/// # {"slotKey":"2025-06-14#dinner#19:30","effectiveOpen":true,"effectiveCapacity":40,
/// #  "used":12,"remainingCapacity":28,"maxGroupSize":null}
/// ```
pub async fn availability(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> WebResult<Json<SlotAvailability>> {
    let availability = state
        .orchestrator
        .availability(&state.ctx, slot_key(&raw)?)
        .await?;
    Ok(Json(availability))
}

/// Create or replace a slot's base configuration.
pub async fn configure_slot(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    StaffAuth(role): StaffAuth,
    payload: Result<Json<SlotSettings>, JsonRejection>,
) -> WebResult<StatusCode> {
    let Json(settings) = payload?;
    let config = SlotConfig {
        slot_key: slot_key(&raw)?,
        is_open: settings.is_open,
        capacity: settings.capacity,
        max_group_size: settings.max_group_size,
    };
    state.orchestrator.configure_slot(&state.ctx, role, config).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Set a manual or period override.
pub async fn override_slot(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    StaffAuth(role): StaffAuth,
    payload: Result<Json<SlotOverride>, JsonRejection>,
) -> WebResult<StatusCode> {
    let Json(over) = payload?;
    state
        .orchestrator
        .override_slot(&state.ctx, role, slot_key(&raw)?, over)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Every reservation on a slot, any status.
pub async fn slot_reservations(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    StaffAuth(_role): StaffAuth,
) -> WebResult<Json<Vec<Reservation>>> {
    let reservations = state
        .orchestrator
        .slot_reservations(&state.ctx, slot_key(&raw)?)
        .await?;
    Ok(Json(reservations))
}
