//! Router configuration.

use super::health::health_check;
use super::state::AppState;
use crate::api::{manage, reservations, slots};
use crate::extractors::{IDEMPOTENCY_KEY_HEADER, STAFF_ROLE_HEADER, TURNSTILE_TOKEN_HEADER};
use crate::middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post, put},
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer, ExposeHeaders};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`: liveness
/// - `/api/slots/...`: availability (public) and slot configuration (staff)
/// - `/api/reservations/...`: public booking and staff operations
/// - `/api/manage/:token...`: guest self-service
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Slots
        .route("/slots/:slot_key", put(slots::configure_slot))
        .route("/slots/:slot_key/override", put(slots::override_slot))
        .route("/slots/:slot_key/availability", get(slots::availability))
        .route("/slots/:slot_key/reservations", get(slots::slot_reservations))
        // Reservations
        .route("/reservations", post(reservations::create_reservation))
        .route(
            "/reservations/:id",
            get(reservations::get_reservation).put(reservations::update_reservation),
        )
        .route("/reservations/:id/cancel", post(reservations::cancel_reservation))
        .route("/reservations/:id/transition", post(reservations::transition_reservation))
        .route("/reservations/:id/tables", put(reservations::assign_tables))
        // Guest self-service
        .route("/manage/:token", put(manage::update_booking))
        .route("/manage/:token/cancel", post(manage::cancel_booking));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

/// CORS policy for the booking widget.
///
/// No origin is allowed when `origins` is empty.
#[must_use]
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    let allowed: Vec<HeaderName> = [
        IDEMPOTENCY_KEY_HEADER,
        TURNSTILE_TOKEN_HEADER,
        STAFF_ROLE_HEADER,
        CORRELATION_ID_HEADER,
    ]
    .iter()
    .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
    .chain([header::CONTENT_TYPE])
    .collect();
    let exposed: Vec<HeaderName> = HeaderName::from_bytes(CORRELATION_ID_HEADER.as_bytes())
        .ok()
        .into_iter()
        .chain([header::RETRY_AFTER])
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(AllowHeaders::list(allowed))
        .expose_headers(ExposeHeaders::list(exposed))
}
