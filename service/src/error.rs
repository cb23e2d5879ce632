//! Error responses.
//!
//! Every failure leaves the service as `{ code, message, details }` with the
//! status derived from the [`BookingError`] code.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tablebook_core::error::BookingError;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Reservation>, AppError> {
///     let reservation = state.orchestrator.reservation(&state.ctx, id).await?;
///     Ok(Json(reservation))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    details: Option<serde_json::Value>,
    retry_after: Option<Duration>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            details: None,
            retry_after: None,
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = (!details.is_null()).then_some(details);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "INVALID_INPUT".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Wire code of the response.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Status for each booking error code.
#[must_use]
pub const fn status_for(error: &BookingError) -> StatusCode {
    match error {
        BookingError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        BookingError::NotFound { .. } | BookingError::TokenInvalid => StatusCode::NOT_FOUND,
        BookingError::SlotTaken { .. }
        | BookingError::InsufficientCapacity { .. }
        | BookingError::VersionConflict { .. }
        | BookingError::IdempotencyKeyReused { .. }
        | BookingError::InvalidTransition { .. }
        | BookingError::NotModifiable { .. } => StatusCode::CONFLICT,
        BookingError::TokenExpired
        | BookingError::TurnstileFailed
        | BookingError::Forbidden { .. } => StatusCode::FORBIDDEN,
        BookingError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        BookingError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let status = status_for(&err);
        let code = err.code().to_string();

        if !err.is_client_error() {
            let message = match err {
                BookingError::Collaborator(_) => "An upstream service failed",
                _ => "An internal error occurred",
            };
            return Self::new(status, message.to_string(), code)
                .with_source(anyhow::Error::new(err));
        }

        let retry_after = match &err {
            BookingError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };
        let mut app = Self::new(status, err.to_string(), code).with_details(err.details());
        app.retry_after = retry_after;
        app
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(status = %self.status, code = %self.code, message = %self.message, "Request failed");
            }
        }

        let retry_after = self.retry_after;
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(wait) = retry_after {
            // Round up so a client never retries early.
            let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tablebook_core::types::Version;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[INVALID_INPUT] Invalid input");
    }

    #[test]
    fn booking_errors_keep_their_code() {
        let err = AppError::from(BookingError::VersionConflict {
            expected: Version::new(1),
            actual: Version::new(2),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "VERSION_CONFLICT");
        assert_eq!(err.details.unwrap()["actual"], 2);
    }

    #[test]
    fn infrastructure_errors_hide_their_cause() {
        let err = AppError::from(BookingError::Storage("connection reset by peer".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("connection reset"));
        assert!(err.source.is_some());

        let err = AppError::from(BookingError::Collaborator("siteverify timed out".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "COLLABORATOR_ERROR");
    }

    #[test]
    fn rate_limits_advertise_retry_after() {
        let err = AppError::from(BookingError::RateLimited {
            retry_after: Duration::from_millis(1500),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn token_errors_map_to_distinct_statuses() {
        assert_eq!(status_for(&BookingError::TokenInvalid), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&BookingError::TokenExpired), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&BookingError::TurnstileFailed), StatusCode::FORBIDDEN);
    }
}
