//! Guest self-service through the manage link.
//!
//! - PUT /api/manage/:token - modify the booking
//! - POST /api/manage/:token/cancel - cancel it (burns the token)

use super::{optional_body, request_meta};
use crate::WebResult;
use crate::extractors::{ClientIp, IdempotencyKey};
use crate::server::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
};
use tablebook_runtime::commands::{
    Actor, BookingOutcome, CancelBookingRequest, UpdateBookingRequest,
};

/// Modify a booking with a manage token.
pub async fn update_booking(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    payload: Result<Json<UpdateBookingRequest>, JsonRejection>,
) -> WebResult<Json<BookingOutcome>> {
    let Json(request) = payload?;
    let outcome = state
        .orchestrator
        .update(
            &state.ctx,
            &request_meta(key, ip),
            &Actor::Guest { token },
            &request,
        )
        .await?;
    Ok(Json(outcome))
}

/// Cancel a booking with a manage token.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    body: Bytes,
) -> WebResult<Json<BookingOutcome>> {
    let request: CancelBookingRequest = optional_body(&body)?;
    let outcome = state
        .orchestrator
        .cancel(
            &state.ctx,
            &request_meta(key, ip),
            &Actor::Guest { token },
            &request,
        )
        .await?;
    Ok(Json(outcome))
}
