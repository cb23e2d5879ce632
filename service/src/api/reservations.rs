//! Reservation endpoints.
//!
//! - POST /api/reservations - book a table (public widget, or staff for phone and walk-in)
//! - GET /api/reservations/:id - reservation details (staff)
//! - PUT /api/reservations/:id - modify slot, party, note or language (staff)
//! - POST /api/reservations/:id/cancel - cancel (staff)
//! - POST /api/reservations/:id/transition - status change (staff)
//! - PUT /api/reservations/:id/tables - table assignment (staff)
//!
//! Mutations require an `Idempotency-Key` header; replaying a key returns the
//! first result unchanged.

use super::{optional_body, request_meta};
use crate::WebResult;
use crate::error::AppError;
use crate::extractors::{ClientIp, IdempotencyKey, StaffAuth, TurnstileToken, staff_role};
use crate::server::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use tablebook_core::error::BookingError;
use tablebook_core::types::{BookingSource, Reservation, ReservationId, Version};
use tablebook_runtime::commands::{
    Actor, BookingOutcome, CancelBookingRequest, CreateBookingRequest, TransitionRequest,
    UpdateBookingRequest,
};

/// Booking payload as posted by the widget or the back office.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationBody {
    /// Slot, party and contact
    #[serde(flatten)]
    pub booking: CreateBookingRequest,
    /// Channel; `online` when omitted
    #[serde(default)]
    pub source: Option<BookingSource>,
    /// Anti-bot token, when not sent as a header
    #[serde(default)]
    pub turnstile_token: Option<String>,
}

/// Table assignment payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTablesBody {
    /// Version the caller last saw
    pub expected_version: Version,
    /// Tables, replacing the current assignment
    pub table_ids: Vec<String>,
}

fn reservation_id(raw: &str) -> Result<ReservationId, AppError> {
    Ok(raw.parse::<ReservationId>()?)
}

fn status_of(outcome: &BookingOutcome) -> StatusCode {
    match outcome {
        BookingOutcome::Reservation(_) => StatusCode::CREATED,
        BookingOutcome::GroupInquiry(_) => StatusCode::ACCEPTED,
    }
}

/// Book a table.
///
/// Online bookings need an anti-bot token (`X-Turnstile-Token` header or
/// `turnstileToken` field). Other sources are staff entries and need a role
/// allowed to change reservations. Answers 201 with the reservation, or 202
/// when the party was routed to a group inquiry.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/reservations \
///   -H 'Idempotency-Key: 3f1c...' -H 'X-Turnstile-Token: ...' \
///   -d '{"dateKey":"2025-06-14","service":"dinner","timeKey":"19:30","adults":2,
///        "contact":{"firstName":"Ana","lastName":"Martin","phone":"+33612345678"}}'
/// ```
pub async fn create_reservation(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    TurnstileToken(header_token): TurnstileToken,
    headers: HeaderMap,
    payload: Result<Json<CreateReservationBody>, JsonRejection>,
) -> WebResult<(StatusCode, Json<BookingOutcome>)> {
    let Json(body) = payload?;
    let source = body.source.unwrap_or(BookingSource::Online);

    if source != BookingSource::Online {
        let role = staff_role(&headers)?;
        if !role.can_mutate() {
            return Err(BookingError::Forbidden {
                role: role.to_string(),
            }
            .into());
        }
    }

    let bot_token = header_token.or(body.turnstile_token);
    let outcome = state
        .orchestrator
        .create(
            &state.ctx,
            &request_meta(key, ip),
            &body.booking,
            bot_token.as_deref(),
            source,
        )
        .await?;

    Ok((status_of(&outcome), Json(outcome)))
}

/// Reservation details.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    StaffAuth(_role): StaffAuth,
) -> WebResult<Json<Reservation>> {
    let reservation = state
        .orchestrator
        .reservation(&state.ctx, reservation_id(&raw)?)
        .await?;
    Ok(Json(reservation))
}

/// Modify a reservation on behalf of the guest.
pub async fn update_reservation(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    StaffAuth(role): StaffAuth,
    payload: Result<Json<UpdateBookingRequest>, JsonRejection>,
) -> WebResult<Json<BookingOutcome>> {
    let Json(request) = payload?;
    let actor = Actor::Staff {
        reservation_id: reservation_id(&raw)?,
        role,
    };
    let outcome = state
        .orchestrator
        .update(&state.ctx, &request_meta(key, ip), &actor, &request)
        .await?;
    Ok(Json(outcome))
}

/// Cancel a pending or confirmed reservation. The body is optional.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    StaffAuth(role): StaffAuth,
    body: Bytes,
) -> WebResult<Json<BookingOutcome>> {
    let request: CancelBookingRequest = optional_body(&body)?;
    let actor = Actor::Staff {
        reservation_id: reservation_id(&raw)?,
        role,
    };
    let outcome = state
        .orchestrator
        .cancel(&state.ctx, &request_meta(key, ip), &actor, &request)
        .await?;
    Ok(Json(outcome))
}

/// Move a reservation to another status.
pub async fn transition_reservation(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    ClientIp(ip): ClientIp,
    IdempotencyKey(key): IdempotencyKey,
    StaffAuth(role): StaffAuth,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> WebResult<Json<BookingOutcome>> {
    let Json(request) = payload?;
    let outcome = state
        .orchestrator
        .transition(
            &state.ctx,
            &request_meta(key, ip),
            reservation_id(&raw)?,
            role,
            &request,
        )
        .await?;
    Ok(Json(outcome))
}

/// Replace the tables of a reservation.
pub async fn assign_tables(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    StaffAuth(role): StaffAuth,
    payload: Result<Json<AssignTablesBody>, JsonRejection>,
) -> WebResult<Json<Reservation>> {
    let Json(body) = payload?;
    let reservation = state
        .orchestrator
        .assign_tables(
            &state.ctx,
            reservation_id(&raw)?,
            role,
            body.expected_version,
            body.table_ids,
        )
        .await?;
    Ok(Json(reservation))
}
