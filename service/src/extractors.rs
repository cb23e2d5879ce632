//! Custom Axum extractors.
//!
//! - `CorrelationId`: id set by the middleware, the request header, or a new one
//! - `ClientIp`: caller address, used as rate-limit fingerprint and for anti-bot checks
//! - `IdempotencyKey`: the mandatory `Idempotency-Key` header of mutating routes
//! - `StaffAuth`: back-office role set by the upstream authenticator
//! - `TurnstileToken`: anti-bot token header of the public widget
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState>,
//!     ClientIp(ip): ClientIp,
//!     IdempotencyKey(key): IdempotencyKey,
//!     StaffAuth(role): StaffAuth,
//! ) -> Result<Json<BookingOutcome>, AppError> {
//!     let meta = RequestMeta::new(key, ip.to_string());
//!     // ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tablebook_core::error::BookingError;
use tablebook_runtime::commands::StaffRole;
use uuid::Uuid;

/// Idempotency key header.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Back-office role header, set by the authenticating proxy.
pub const STAFF_ROLE_HEADER: &str = "X-Staff-Role";

/// Anti-bot token header of the booking widget.
pub const TURNSTILE_TOKEN_HEADER: &str = "X-Turnstile-Token";

/// Correlation ID for request tracing.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Client IP address.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Connection IP, when the server was started with connect info
/// 4. `127.0.0.1`
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(&parts.headers, parts.extensions.get());

        Ok(Self(ip))
    }
}

fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip;
    }

    connect_info.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |info| info.0.ip())
}

/// The `Idempotency-Key` header, trimmed.
///
/// Rejected with `INVALID_INPUT` when absent or blank.
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Self(key.to_string()))
            .ok_or_else(|| {
                BookingError::invalid_input(IDEMPOTENCY_KEY_HEADER, "header is required").into()
            })
    }
}

/// Role of an authenticated back-office user.
///
/// Rejected with `FORBIDDEN` when the header is missing or unknown.
#[derive(Debug, Clone, Copy)]
pub struct StaffAuth(pub StaffRole);

#[async_trait]
impl<S> FromRequestParts<S> for StaffAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(staff_role(&parts.headers)?))
    }
}

/// Parse the `X-Staff-Role` header.
///
/// # Errors
///
/// `FORBIDDEN` when the header is missing or names no known role.
pub fn staff_role(headers: &HeaderMap) -> Result<StaffRole, AppError> {
    let raw = headers
        .get(STAFF_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous");

    Ok(raw.parse::<StaffRole>()?)
}

/// Anti-bot token from the `X-Turnstile-Token` header, if any.
#[derive(Debug, Clone, Default)]
pub struct TurnstileToken(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for TurnstileToken
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(TURNSTILE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self(token))
    }
}
