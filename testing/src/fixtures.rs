//! Canned inputs and a fully wired in-memory booking harness.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::doubles::{RecordingTransport, StaticBotVerifier, UnlimitedRateLimiter};
use crate::memory::{
    MemoryClientDirectory, MemoryGroupInquiryStore, MemoryIdempotencyStore, MemoryLedger,
    MemoryNotificationQueue, MemoryTokenStore,
};
use crate::mocks::{ManualClock, test_clock};
use chrono::FixedOffset;
use std::sync::Arc;
use tablebook_core::capacity::SlotConfig;
use tablebook_core::collaborators::RateLimiter;
use tablebook_core::environment::Clock;
use tablebook_core::ledger::{NewReservation, SlotCatalog};
use tablebook_core::notification::NotificationTransport;
use tablebook_core::tenant::RestaurantContext;
use tablebook_core::types::{
    BookingSource, ClientId, ContactDetails, PartyComposition, RestaurantId, SlotKey,
};
use tablebook_runtime::commands::{CreateBookingRequest, RequestMeta};
use tablebook_runtime::orchestrator::{BookingEnvironment, BookingOrchestrator};
use tablebook_runtime::render::MessageRenderer;
use tablebook_runtime::worker::{NotificationWorker, WorkerConfig};
use uuid::Uuid;

/// Restaurant used across fixtures.
pub const RESTAURANT_UUID: Uuid = Uuid::from_u128(0x7ab1_e000_0000_4000_8000_0000_0000_0001);

/// Default slot: 2025-06-14, dinner, 19:30.
#[must_use]
pub fn slot_key() -> SlotKey {
    "2025-06-14#dinner#19:30".parse().unwrap()
}

/// Another slot on the same evening.
#[must_use]
pub fn later_slot_key() -> SlotKey {
    "2025-06-14#dinner#21:00".parse().unwrap()
}

/// Open slot with `capacity` seats and no group limit.
#[must_use]
pub fn slot_config(capacity: u32) -> SlotConfig {
    SlotConfig {
        slot_key: slot_key(),
        is_open: true,
        capacity,
        max_group_size: None,
    }
}

/// Restaurant at UTC+1 with the default policy.
#[must_use]
pub fn restaurant_context() -> RestaurantContext {
    RestaurantContext::new(
        RestaurantId::from_uuid(RESTAURANT_UUID),
        FixedOffset::east_opt(3600).unwrap(),
    )
}

/// Contact with an email derived from `first_name`.
#[must_use]
pub fn contact(first_name: &str) -> ContactDetails {
    ContactDetails {
        first_name: first_name.to_string(),
        last_name: "Martin".to_string(),
        email: Some(format!("{}@example.com", first_name.to_lowercase())),
        phone: "+33 6 12 34 56 78".to_string(),
    }
}

/// Online booking for `adults` on [`slot_key`].
#[must_use]
pub fn booking_request(adults: u32) -> CreateBookingRequest {
    let slot = slot_key();
    CreateBookingRequest {
        date_key: slot.date_key(),
        service: slot.service().to_string(),
        time_key: slot.time_key(),
        adults,
        children: 0,
        babies: 0,
        contact: contact("Ana"),
        language: "fr".to_string(),
        note: None,
    }
}

/// Request metadata from a fixed address.
#[must_use]
pub fn meta(idempotency_key: &str) -> RequestMeta {
    RequestMeta::new(idempotency_key, "203.0.113.7")
}

/// Ledger input for `adults` on [`slot_key`].
#[must_use]
pub fn new_reservation(ctx: &RestaurantContext, adults: u32) -> NewReservation {
    NewReservation {
        restaurant_id: ctx.restaurant_id,
        slot_key: slot_key(),
        party: PartyComposition::new(adults, 0, 0).unwrap(),
        client_id: ClientId::new(),
        contact: contact("Ana"),
        language: "fr".to_string(),
        note: None,
        source: BookingSource::Online,
    }
}

/// Orchestrator over in-memory adapters, with handles to every store.
///
/// # Example
///
/// ```
/// use tablebook_testing::fixtures::{BookingHarness, booking_request, meta};
/// use tablebook_core::types::BookingSource;
///
/// # async fn example() {
/// let harness = BookingHarness::with_capacity(10).await;
/// let outcome = harness
///     .orchestrator
///     .create(&harness.ctx, &meta("k1"), &booking_request(2), Some("tok"), BookingSource::Online)
///     .await
///     .unwrap();
/// assert!(outcome.reservation().is_some());
/// # }
/// ```
pub struct BookingHarness {
    /// Restaurant
    pub ctx: RestaurantContext,
    /// Controllable clock, starting at 2025-01-01
    pub clock: Arc<ManualClock>,
    /// Ledger and slot catalog
    pub ledger: Arc<MemoryLedger>,
    /// Idempotency records
    pub idempotency: Arc<MemoryIdempotencyStore>,
    /// Manage tokens
    pub tokens: Arc<MemoryTokenStore>,
    /// Outbox
    pub notifications: Arc<MemoryNotificationQueue>,
    /// Anti-bot verifier
    pub bot_verifier: Arc<StaticBotVerifier>,
    /// Client directory
    pub clients: Arc<MemoryClientDirectory>,
    /// Group inquiries
    pub group_inquiries: Arc<MemoryGroupInquiryStore>,
    /// System under test
    pub orchestrator: BookingOrchestrator,
}

impl BookingHarness {
    /// Harness without any slot and without rate limiting.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limiter(Arc::new(UnlimitedRateLimiter))
    }

    /// Harness with a custom rate limiter.
    #[must_use]
    pub fn with_rate_limiter(rate_limiter: Arc<dyn RateLimiter>) -> Self {
        let ctx = restaurant_context();
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let ledger = Arc::new(MemoryLedger::new());
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let tokens = Arc::new(MemoryTokenStore::new());
        let notifications = Arc::new(MemoryNotificationQueue::new());
        let bot_verifier = Arc::new(StaticBotVerifier::accepting());
        let clients = Arc::new(MemoryClientDirectory::new());
        let group_inquiries = Arc::new(MemoryGroupInquiryStore::new());

        let orchestrator = BookingOrchestrator::new(BookingEnvironment {
            ledger: ledger.clone(),
            slots: ledger.clone(),
            idempotency: idempotency.clone(),
            tokens: tokens.clone(),
            notifications: notifications.clone(),
            bot_verifier: bot_verifier.clone(),
            clients: clients.clone(),
            group_inquiries: group_inquiries.clone(),
            rate_limiter,
            clock: clock.clone(),
        });

        Self {
            ctx,
            clock,
            ledger,
            idempotency,
            tokens,
            notifications,
            bot_verifier,
            clients,
            group_inquiries,
            orchestrator,
        }
    }

    /// Harness with [`slot_config`] of `capacity` seats.
    pub async fn with_capacity(capacity: u32) -> Self {
        let harness = Self::new();
        harness
            .ledger
            .upsert_slot(harness.ctx.restaurant_id, slot_config(capacity))
            .await
            .unwrap();
        harness
    }

    /// Worker draining this harness's outbox through `transport`.
    #[must_use]
    pub fn worker(&self, transport: Arc<dyn NotificationTransport>) -> NotificationWorker {
        NotificationWorker::new(
            self.notifications.clone(),
            transport,
            self.idempotency.clone(),
            MessageRenderer::new("Chez Nous", "https://book.example.com"),
            self.clock.clone(),
            WorkerConfig::default(),
        )
    }

    /// Worker with a recording transport.
    #[must_use]
    pub fn recording_worker(&self) -> (NotificationWorker, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (self.worker(transport.clone()), transport)
    }
}

impl Default for BookingHarness {
    fn default() -> Self {
        Self::new()
    }
}
