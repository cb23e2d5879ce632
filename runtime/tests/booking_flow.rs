//! End-to-end booking scenarios against the in-memory adapters.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Duration;
use std::sync::Arc;
use tablebook_core::capacity::SlotOverride;
use tablebook_core::ledger::ReservationLedger;
use tablebook_core::notification::{DedupeKey, NotificationKind, NotificationQueue};
use tablebook_core::types::{BookingSource, ReservationStatus, Version};
use tablebook_runtime::commands::{
    Actor, BookingOutcome, CancelBookingRequest, ReservationReceipt, StaffRole, TransitionRequest,
    UpdateBookingRequest,
};
use tablebook_runtime::rate_limit::{RateLimitConfig, TokenBucketLimiter};
use tablebook_testing::fixtures::{BookingHarness, booking_request, later_slot_key, meta, slot_key};
use tablebook_testing::init_tracing;

async fn book(harness: &BookingHarness, key: &str, adults: u32) -> ReservationReceipt {
    harness
        .orchestrator
        .create(
            &harness.ctx,
            &meta(key),
            &booking_request(adults),
            Some("human"),
            BookingSource::Online,
        )
        .await
        .unwrap()
        .reservation()
        .cloned()
        .expect("reservation outcome")
}

fn update_to(slot: tablebook_core::types::SlotKey, version: Version, adults: u32) -> UpdateBookingRequest {
    UpdateBookingRequest {
        expected_version: version,
        date_key: slot.date_key(),
        service: slot.service().to_string(),
        time_key: slot.time_key(),
        adults,
        children: 0,
        babies: 0,
        language: "en".into(),
        note: Some("Anniversary".into()),
    }
}

fn staff(receipt: &ReservationReceipt, role: StaffRole) -> Actor {
    Actor::Staff {
        reservation_id: receipt.reservation_id,
        role,
    }
}

// ═══════════════════════════════════════════════════════════
// Create
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn small_party_is_confirmed_with_token_and_notification() {
    init_tracing();
    let harness = BookingHarness::with_capacity(10).await;

    let receipt = book(&harness, "k1", 2).await;

    assert_eq!(receipt.status, ReservationStatus::Confirmed);
    assert_eq!(receipt.version, Version::INITIAL);
    let token = receipt.manage_token.clone().expect("manage token");
    assert_eq!(token.len(), 43);

    let expected_expiry = harness.ctx.manage_token_expiry(&slot_key());
    assert_eq!(receipt.manage_token_expires_at, Some(expected_expiry));

    let key = DedupeKey::for_reservation(
        NotificationKind::ReservationConfirmed,
        receipt.reservation_id,
        Version::INITIAL,
    );
    let job = harness
        .notifications
        .find_by_dedupe_key(&key)
        .await
        .unwrap()
        .expect("queued job");
    assert_eq!(job.payload.manage_token.as_deref(), Some(token.as_str()));
    assert_eq!(job.payload.recipient.as_deref(), Some("ana@example.com"));

    let availability = harness
        .orchestrator
        .availability(&harness.ctx, slot_key())
        .await
        .unwrap();
    assert_eq!(availability.used, 2);
    assert_eq!(availability.remaining_capacity, 8);
}

#[tokio::test]
async fn larger_party_waits_for_confirmation() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 5).await;
    assert_eq!(receipt.status, ReservationStatus::Pending);

    let jobs = harness.notifications.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, NotificationKind::ReservationPending);
}

#[tokio::test]
async fn group_becomes_inquiry_without_touching_capacity() {
    let harness = BookingHarness::with_capacity(10).await;
    let outcome = harness
        .orchestrator
        .create(&harness.ctx, &meta("g1"), &booking_request(16), Some("human"), BookingSource::Online)
        .await
        .unwrap();

    assert!(matches!(outcome, BookingOutcome::GroupInquiry(ref r) if r.party_size == 16));
    assert!(harness.ledger.is_empty());
    assert_eq!(harness.group_inquiries.inquiries().len(), 1);
    assert!(harness.notifications.jobs().is_empty());
}

#[tokio::test]
async fn insufficient_capacity_reports_what_is_left() {
    let harness = BookingHarness::with_capacity(4).await;
    book(&harness, "k1", 3).await;

    let err = harness
        .orchestrator
        .create(&harness.ctx, &meta("k2"), &booking_request(2), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_CAPACITY");
    assert_eq!(err.details()["remaining"], 1);
    assert_eq!(harness.ledger.len(), 1);
}

#[tokio::test]
async fn closed_override_takes_the_slot() {
    let harness = BookingHarness::with_capacity(10).await;
    harness
        .orchestrator
        .override_slot(&harness.ctx, StaffRole::Manager, slot_key(), SlotOverride::manual().open(false))
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .create(&harness.ctx, &meta("k1"), &booking_request(2), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SLOT_TAKEN");
}

#[tokio::test]
async fn unknown_slot_is_not_found() {
    let harness = BookingHarness::new();
    let err = harness
        .orchestrator
        .create(&harness.ctx, &meta("k1"), &booking_request(2), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn online_bookings_need_a_human() {
    let harness = BookingHarness::with_capacity(10).await;

    let missing = harness
        .orchestrator
        .create(&harness.ctx, &meta("k1"), &booking_request(2), None, BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(missing.code(), "TURNSTILE_FAILED");

    harness.bot_verifier.set_accept(false);
    let rejected = harness
        .orchestrator
        .create(&harness.ctx, &meta("k2"), &booking_request(2), Some("bot"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(rejected.code(), "TURNSTILE_FAILED");

    // Staff-entered bookings skip the check.
    harness
        .orchestrator
        .create(&harness.ctx, &meta("k3"), &booking_request(2), None, BookingSource::Phone)
        .await
        .unwrap();
    assert_eq!(harness.ledger.len(), 1);
}

#[tokio::test]
async fn validation_happens_before_any_side_effect() {
    let harness = BookingHarness::with_capacity(10).await;
    let mut request = booking_request(2);
    request.time_key = "7pm".into();

    let err = harness
        .orchestrator
        .create(&harness.ctx, &meta("k1"), &request, Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert_eq!(harness.bot_verifier.calls(), 0);
    assert!(harness.idempotency.is_empty());
}

#[tokio::test]
async fn rate_limit_rejects_before_anything_else() {
    let limiter = Arc::new(TokenBucketLimiter::new(RateLimitConfig {
        burst: 1,
        per_second: 0.01,
    }));
    let harness = BookingHarness::with_rate_limiter(limiter);

    let first = harness
        .orchestrator
        .create(&harness.ctx, &meta("k1"), &booking_request(2), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    // No slot configured, but the request was let through.
    assert_eq!(first.code(), "NOT_FOUND");

    let second = harness
        .orchestrator
        .create(&harness.ctx, &meta("k2"), &booking_request(2), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(second.code(), "RATE_LIMITED");
    assert!(second.details()["retryAfterSeconds"].as_u64().unwrap() > 0);
}

// ═══════════════════════════════════════════════════════════
// Idempotency
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn retry_with_same_key_replays_the_original() {
    let harness = BookingHarness::with_capacity(10).await;
    let first = book(&harness, "same", 2).await;
    let second = book(&harness, "same", 2).await;

    assert_eq!(first, second);
    assert_eq!(harness.ledger.len(), 1);
    assert_eq!(harness.notifications.jobs().len(), 1);
    assert_eq!(harness.clients.len(), 1);
}

#[tokio::test]
async fn same_key_with_different_body_is_rejected() {
    let harness = BookingHarness::with_capacity(10).await;
    book(&harness, "same", 2).await;

    let err = harness
        .orchestrator
        .create(&harness.ctx, &meta("same"), &booking_request(3), Some("human"), BookingSource::Online)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "IDEMPOTENCY_KEY_REUSED");
    assert_eq!(harness.ledger.len(), 1);
}

#[tokio::test]
async fn expired_key_books_again() {
    let harness = BookingHarness::with_capacity(10).await;
    let first = book(&harness, "same", 2).await;
    harness.clock.advance(Duration::hours(25));
    let second = book(&harness, "same", 2).await;

    assert_ne!(first.reservation_id, second.reservation_id);
    assert_eq!(harness.ledger.len(), 2);
}

// ═══════════════════════════════════════════════════════════
// Update and cancel
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn guest_moves_booking_with_token() {
    let harness = BookingHarness::with_capacity(10).await;
    harness
        .orchestrator
        .configure_slot(
            &harness.ctx,
            StaffRole::Owner,
            tablebook_core::capacity::SlotConfig {
                slot_key: later_slot_key(),
                is_open: true,
                capacity: 4,
                max_group_size: None,
            },
        )
        .await
        .unwrap();
    let receipt = book(&harness, "k1", 2).await;
    let guest = Actor::Guest {
        token: receipt.manage_token.clone().unwrap(),
    };

    let outcome = harness
        .orchestrator
        .update(&harness.ctx, &meta("u1"), &guest, &update_to(later_slot_key(), Version::INITIAL, 3))
        .await
        .unwrap();
    let updated = outcome.reservation().unwrap();
    assert_eq!(updated.version, Version::new(2));
    assert_eq!(updated.slot_key, later_slot_key());
    assert_eq!(updated.status, ReservationStatus::Confirmed);

    // The old slot is free again, the new one holds the party.
    let old = harness.orchestrator.availability(&harness.ctx, slot_key()).await.unwrap();
    let new = harness.orchestrator.availability(&harness.ctx, later_slot_key()).await.unwrap();
    assert_eq!(old.used, 0);
    assert_eq!(new.used, 3);

    // Token is not burned by an update.
    let again = harness
        .orchestrator
        .update(&harness.ctx, &meta("u2"), &guest, &update_to(later_slot_key(), Version::new(2), 2))
        .await
        .unwrap();
    assert_eq!(again.reservation().unwrap().version, Version::new(3));

    let kinds: Vec<_> = harness.notifications.jobs().iter().map(|j| j.kind).collect();
    assert_eq!(
        kinds,
        [
            NotificationKind::ReservationConfirmed,
            NotificationKind::ReservationUpdated,
            NotificationKind::ReservationUpdated
        ]
    );
}

#[tokio::test]
async fn stale_version_changes_nothing() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;
    let actor = staff(&receipt, StaffRole::Staff);

    harness
        .orchestrator
        .update(&harness.ctx, &meta("u1"), &actor, &update_to(slot_key(), Version::INITIAL, 3))
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .update(&harness.ctx, &meta("u2"), &actor, &update_to(slot_key(), Version::INITIAL, 4))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VERSION_CONFLICT");
    assert_eq!(err.details()["actual"], 2);

    let stored = harness.ledger.get(receipt.reservation_id).await.unwrap().unwrap();
    assert_eq!(stored.party_size(), 3);
}

#[tokio::test]
async fn growing_party_beyond_capacity_is_rejected() {
    let harness = BookingHarness::with_capacity(4).await;
    let receipt = book(&harness, "k1", 2).await;
    book(&harness, "k2", 1).await;

    let err = harness
        .orchestrator
        .update(
            &harness.ctx,
            &meta("u1"),
            &staff(&receipt, StaffRole::Manager),
            &update_to(slot_key(), Version::INITIAL, 4),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_CAPACITY");
    assert_eq!(err.details()["remaining"], 3);
}

#[tokio::test]
async fn guest_cancel_burns_the_token() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;
    let guest = Actor::Guest {
        token: receipt.manage_token.clone().unwrap(),
    };

    let outcome = harness
        .orchestrator
        .cancel(&harness.ctx, &meta("c1"), &guest, &CancelBookingRequest::default())
        .await
        .unwrap();
    assert_eq!(outcome.reservation().unwrap().status, ReservationStatus::Cancelled);

    let availability = harness.orchestrator.availability(&harness.ctx, slot_key()).await.unwrap();
    assert_eq!(availability.remaining_capacity, 10);

    // Replaying the same request returns the cached outcome.
    let replay = harness
        .orchestrator
        .cancel(&harness.ctx, &meta("c1"), &guest, &CancelBookingRequest::default())
        .await
        .unwrap();
    assert_eq!(replay, outcome);

    // A new request with the burned token is rejected.
    let err = harness
        .orchestrator
        .cancel(&harness.ctx, &meta("c2"), &guest, &CancelBookingRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_INVALID");

    let stored = harness.tokens.tokens_for(receipt.reservation_id);
    assert!(stored.iter().all(|t| t.used_at.is_some()));
}

#[tokio::test]
async fn token_expires_before_the_slot() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;
    harness
        .clock
        .set(harness.ctx.manage_token_expiry(&slot_key()));

    let err = harness
        .orchestrator
        .cancel(
            &harness.ctx,
            &meta("c1"),
            &Actor::Guest {
                token: receipt.manage_token.unwrap(),
            },
            &CancelBookingRequest::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_EXPIRED");
}

#[tokio::test]
async fn unknown_token_is_invalid() {
    let harness = BookingHarness::with_capacity(10).await;
    let err = harness
        .orchestrator
        .cancel(
            &harness.ctx,
            &meta("c1"),
            &Actor::Guest {
                token: "nope".into(),
            },
            &CancelBookingRequest::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_INVALID");
}

// ═══════════════════════════════════════════════════════════
// Staff lifecycle
// ═══════════════════════════════════════════════════════════

#[tokio::test]
async fn service_night_lifecycle() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;
    let id = receipt.reservation_id;

    let mut version = receipt.version;
    for (key, to) in [
        ("t1", ReservationStatus::Seated),
        ("t2", ReservationStatus::Completed),
    ] {
        let outcome = harness
            .orchestrator
            .transition(&harness.ctx, &meta(key), id, StaffRole::Staff, &TransitionRequest {
                expected_version: version,
                to,
            })
            .await
            .unwrap();
        version = outcome.reservation().unwrap().version;
    }
    assert_eq!(version, Version::new(3));

    let stored = harness.ledger.get(id).await.unwrap().unwrap();
    assert!(stored.seated_at.is_some());
    assert!(stored.completed_at.is_some());

    // Completed releases the seats; refusing it afterwards is not an edge.
    let availability = harness.orchestrator.availability(&harness.ctx, slot_key()).await.unwrap();
    assert_eq!(availability.used, 0);
    let err = harness
        .orchestrator
        .transition(&harness.ctx, &meta("t3"), id, StaffRole::Owner, &TransitionRequest {
            expected_version: version,
            to: ReservationStatus::Refused,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn viewers_cannot_change_anything() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;

    let err = harness
        .orchestrator
        .transition(
            &harness.ctx,
            &meta("t1"),
            receipt.reservation_id,
            StaffRole::Viewer,
            &TransitionRequest {
                expected_version: receipt.version,
                to: ReservationStatus::Seated,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = harness
        .orchestrator
        .configure_slot(&harness.ctx, StaffRole::Staff, tablebook_testing::fixtures::slot_config(20))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn refusing_a_pending_request_notifies_the_guest() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 6).await;
    assert_eq!(receipt.status, ReservationStatus::Pending);

    harness
        .orchestrator
        .transition(
            &harness.ctx,
            &meta("t1"),
            receipt.reservation_id,
            StaffRole::Manager,
            &TransitionRequest {
                expected_version: receipt.version,
                to: ReservationStatus::Refused,
            },
        )
        .await
        .unwrap();

    let kinds: Vec<_> = harness.notifications.jobs().iter().map(|j| j.kind).collect();
    assert_eq!(
        kinds,
        [NotificationKind::ReservationPending, NotificationKind::ReservationRefused]
    );
}

#[tokio::test]
async fn restoring_a_cancellation_needs_free_seats() {
    let harness = BookingHarness::with_capacity(4).await;
    let first = book(&harness, "k1", 4).await;
    let cancelled = harness
        .orchestrator
        .cancel(
            &harness.ctx,
            &meta("c1"),
            &staff(&first, StaffRole::Staff),
            &CancelBookingRequest {
                expected_version: Some(first.version),
            },
        )
        .await
        .unwrap();
    book(&harness, "k2", 2).await;

    let err = harness
        .orchestrator
        .transition(
            &harness.ctx,
            &meta("t1"),
            first.reservation_id,
            StaffRole::Manager,
            &TransitionRequest {
                expected_version: cancelled.reservation().unwrap().version,
                to: ReservationStatus::Confirmed,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_CAPACITY");
}

#[tokio::test]
async fn tables_follow_the_reservation() {
    let harness = BookingHarness::with_capacity(10).await;
    let receipt = book(&harness, "k1", 2).await;

    let assigned = harness
        .orchestrator
        .assign_tables(
            &harness.ctx,
            receipt.reservation_id,
            StaffRole::Staff,
            receipt.version,
            vec!["T4".into(), "T5".into()],
        )
        .await
        .unwrap();
    assert_eq!(assigned.table_ids, ["T4", "T5"]);
    assert_eq!(assigned.version, Version::new(2));

    let listed = harness
        .orchestrator
        .slot_reservations(&harness.ctx, slot_key())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].table_ids.len(), 2);
}
