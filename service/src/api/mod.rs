//! Route handlers.
//!
//! Handlers only translate HTTP into orchestrator calls; every rule lives in
//! the runtime.

pub mod manage;
pub mod reservations;
pub mod slots;

use crate::error::AppError;
use axum::body::Bytes;
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use tablebook_runtime::commands::RequestMeta;

/// Parse a body that may be empty.
pub(crate) fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("Invalid JSON body: {e}")))
}

pub(crate) fn request_meta(idempotency_key: String, ip: IpAddr) -> RequestMeta {
    RequestMeta::new(idempotency_key, ip.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tablebook_runtime::commands::CancelBookingRequest;
    use tablebook_core::types::Version;

    #[test]
    fn empty_bodies_use_the_default() {
        let request: CancelBookingRequest = optional_body(&Bytes::new()).unwrap();
        assert_eq!(request, CancelBookingRequest::default());

        let request: CancelBookingRequest =
            optional_body(&Bytes::from_static(br#"{"expectedVersion":3}"#)).unwrap();
        assert_eq!(request.expected_version, Some(Version::new(3)));

        let err = optional_body::<CancelBookingRequest>(&Bytes::from_static(b"{")).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
