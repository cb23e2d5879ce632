//! Cloudflare Turnstile siteverify client.

use crate::config::TurnstileConfig;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tablebook_core::collaborators::BotVerifier;
use tablebook_core::error::{BookingError, Result};

#[derive(Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verifies widget tokens against the siteverify endpoint.
#[derive(Clone)]
pub struct TurnstileVerifier {
    client: Client,
    secret: String,
    verify_url: String,
}

impl TurnstileVerifier {
    /// Create a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Collaborator`] if the HTTP client cannot be built.
    pub fn new(secret: impl Into<String>, verify_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BookingError::Collaborator(format!("turnstile client: {e}")))?;

        Ok(Self {
            client,
            secret: secret.into(),
            verify_url: verify_url.into(),
        })
    }
}

impl BotVerifier for TurnstileVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        remote_ip: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.verify_url)
                .json(&SiteVerifyRequest {
                    secret: &self.secret,
                    response: token,
                    remoteip: remote_ip,
                })
                .send()
                .await
                .map_err(|e| BookingError::Collaborator(format!("turnstile request failed: {e}")))?;

            match response.status() {
                StatusCode::OK => {
                    let body = response.json::<SiteVerifyResponse>().await.map_err(|e| {
                        BookingError::Collaborator(format!("turnstile response unreadable: {e}"))
                    })?;
                    if !body.success {
                        tracing::warn!(error_codes = ?body.error_codes, "Turnstile rejected token");
                    }
                    Ok(body.success)
                },
                status => Err(BookingError::Collaborator(format!(
                    "turnstile answered {}",
                    status.as_u16()
                ))),
            }
        })
    }
}

/// Accepts every token. For local development without a secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassVerifier;

impl BotVerifier for BypassVerifier {
    fn verify<'a>(
        &'a self,
        _token: &'a str,
        _remote_ip: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}

/// Verifier selected by the configuration.
///
/// # Errors
///
/// Returns [`BookingError::InvalidInput`] when no secret is configured and the
/// bypass is off.
pub fn from_config(config: &TurnstileConfig) -> Result<Arc<dyn BotVerifier>> {
    if config.bypass {
        tracing::warn!("Turnstile bypass enabled, every booking token is accepted");
        return Ok(Arc::new(BypassVerifier));
    }

    let secret = config
        .secret
        .as_deref()
        .ok_or_else(|| BookingError::invalid_input("TURNSTILE_SECRET", "required unless TURNSTILE_BYPASS=true"))?;
    Ok(Arc::new(TurnstileVerifier::new(
        secret,
        &config.verify_url,
        Duration::from_secs(config.timeout),
    )?))
}
