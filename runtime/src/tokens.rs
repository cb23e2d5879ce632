//! Manage token issuing and redemption.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::sync::Arc;
use tablebook_core::error::{BookingError, Result};
use tablebook_core::token::{ManageToken, ManageTokenStore, TokenPurpose, TokenValidation};
use tablebook_core::types::ReservationId;

/// Mints, validates and burns manage tokens.
#[derive(Clone)]
pub struct ManageTokenIssuer {
    store: Arc<dyn ManageTokenStore>,
}

impl ManageTokenIssuer {
    /// Issuer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ManageTokenStore>) -> Self {
        Self { store }
    }

    /// Generate a cryptographically secure random token.
    ///
    /// 256 random bits encoded as base64url (43 characters).
    #[must_use]
    pub fn generate_token() -> String {
        let mut random_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// Issue a manage token, reusing a live one for the same reservation.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn issue(
        &self,
        reservation_id: ReservationId,
        purpose: TokenPurpose,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ManageToken> {
        let candidate = ManageToken {
            token: Self::generate_token(),
            reservation_id,
            purpose,
            expires_at,
            used_at: None,
            created_at: now,
        };
        let token = self.store.insert_or_get(candidate, now).await?;
        tracing::debug!(%reservation_id, expires_at = %token.expires_at, "Manage token issued");
        Ok(token)
    }

    /// Check a presented token.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<TokenValidation> {
        Ok(self
            .store
            .find(token)
            .await?
            .map_or(TokenValidation::NotFound, |t| t.validate(now)))
    }

    /// Resolve a token to its reservation or reject it.
    ///
    /// # Errors
    ///
    /// `TOKEN_INVALID` or `TOKEN_EXPIRED`; storage failures.
    pub async fn redeem(&self, token: &str, now: DateTime<Utc>) -> Result<ReservationId> {
        self.validate(token, now).await?.into_result()
    }

    /// Burn a token after a successful use.
    ///
    /// # Errors
    ///
    /// `TOKEN_INVALID` if a concurrent use burned it first; storage failures.
    pub async fn mark_used(&self, token: &str, now: DateTime<Utc>) -> Result<()> {
        if self.store.mark_used(token, now).await? {
            Ok(())
        } else {
            Err(BookingError::TokenInvalid)
        }
    }
}
