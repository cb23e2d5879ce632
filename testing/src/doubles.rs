//! Scripted collaborators: anti-bot verifier, transports, rate limiter.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future::BoxFuture;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tablebook_core::collaborators::{BotVerifier, RateLimiter};
use tablebook_core::error::Result;
use tablebook_core::notification::{
    DeliveryFailure, DeliveryReceipt, NotificationTransport, OutboundMessage,
};

/// Verifier that answers the same thing for every token.
#[derive(Debug)]
pub struct StaticBotVerifier {
    accept: AtomicBool,
    calls: AtomicUsize,
}

impl StaticBotVerifier {
    /// Accepts every token.
    #[must_use]
    pub const fn accepting() -> Self {
        Self {
            accept: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Rejects every token.
    #[must_use]
    pub const fn rejecting() -> Self {
        Self {
            accept: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the answer.
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// How many tokens were checked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BotVerifier for StaticBotVerifier {
    fn verify<'a>(
        &'a self,
        _token: &'a str,
        _remote_ip: Option<&'a str>,
    ) -> BoxFuture<'a, Result<bool>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let accept = self.accept.load(Ordering::SeqCst);
        Box::pin(async move { Ok(accept) })
    }
}

/// Transport that accepts everything and keeps a copy.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationTransport for RecordingTransport {
    fn send<'a>(
        &'a self,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, std::result::Result<DeliveryReceipt, DeliveryFailure>> {
        Box::pin(async move {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(DeliveryReceipt {
                message_id: Some(format!("msg-{}", sent.len())),
            })
        })
    }
}

/// Transport that fails with the same code every time.
#[derive(Debug)]
pub struct FailingTransport {
    error_code: String,
    attempts: AtomicUsize,
}

impl FailingTransport {
    /// Fail every send with `error_code`.
    #[must_use]
    pub fn new(error_code: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Send attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationTransport for FailingTransport {
    fn send<'a>(
        &'a self,
        _message: &'a OutboundMessage,
    ) -> BoxFuture<'a, std::result::Result<DeliveryReceipt, DeliveryFailure>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failure = DeliveryFailure::new(self.error_code.clone());
        Box::pin(async move { Err(failure) })
    }
}

/// Rate limiter that never says no.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedRateLimiter;

impl RateLimiter for UnlimitedRateLimiter {
    fn try_acquire(&self, _key: &str) -> std::result::Result<(), Duration> {
        Ok(())
    }
}
