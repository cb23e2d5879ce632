//! Booking orchestrator: the imperative shell around the reservation ledger.
//!
//! # Create workflow
//!
//! ```text
//! rate limit ─► validate ─► hash ─► idempotency check ──replay──► cached outcome
//!                                        │
//!                                   anti-bot (online only)
//!                                        │
//!                     party ≥ group threshold? ──yes──► group inquiry
//!                                        │
//!                            client directory upsert
//!                                        │
//!                   ledger.create (atomic capacity check + insert)
//!                                        │
//!              manage token ─► idempotency store ─► enqueue notification
//! ```
//!
//! Every external call happens outside the ledger's atomic section. Once the
//! ledger write commits the booking is a success: token issuing, idempotency
//! bookkeeping and notification enqueue failures are logged, never rolled back.
//!
//! The idempotency result is stored *before* the notification is enqueued so
//! that a caller that loses a same-key race can cancel its duplicate without
//! a stray message having been queued for it.

use crate::commands::{
    Actor, BookingOutcome, CancelBookingRequest, CreateBookingRequest, GroupInquiryReceipt,
    RequestMeta, ReservationReceipt, StaffRole, TransitionRequest, UpdateBookingRequest,
};
use crate::metrics::{BookingMetrics, NotificationMetrics};
use crate::tokens::ManageTokenIssuer;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tablebook_core::capacity::{SlotAvailability, SlotConfig, SlotOverride};
use tablebook_core::collaborators::{
    BotVerifier, ClientDirectory, GroupInquiry, GroupInquiryStore, RateLimiter,
};
use tablebook_core::environment::Clock;
use tablebook_core::error::{BookingError, Result};
use tablebook_core::idempotency::{
    IdempotencyCheck, IdempotencyRecord, IdempotencyStore, RequestHash, StoreOutcome, hash_value,
};
use tablebook_core::ledger::{NewReservation, ReservationLedger, SlotCatalog};
use tablebook_core::notification::{
    DedupeKey, NewNotification, NotificationKind, NotificationPayload, NotificationQueue,
};
use tablebook_core::tenant::RestaurantContext;
use tablebook_core::token::{ManageTokenStore, TokenPurpose};
use tablebook_core::types::{
    BookingSource, GroupInquiryId, Reservation, ReservationId, SlotKey, Version,
};

/// Ports the orchestrator drives.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Reservation storage
    pub ledger: Arc<dyn ReservationLedger>,
    /// Slot configuration storage
    pub slots: Arc<dyn SlotCatalog>,
    /// Replay cache
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Manage token storage
    pub tokens: Arc<dyn ManageTokenStore>,
    /// Outbox
    pub notifications: Arc<dyn NotificationQueue>,
    /// Anti-bot boundary
    pub bot_verifier: Arc<dyn BotVerifier>,
    /// Guest identity
    pub clients: Arc<dyn ClientDirectory>,
    /// Large-party requests
    pub group_inquiries: Arc<dyn GroupInquiryStore>,
    /// Request budget
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

enum Guard {
    Replay(BookingOutcome),
    Fresh { key: String, hash: RequestHash },
}

/// How storing a result under its idempotency key went.
enum Finished {
    /// This request owns the key
    Recorded(BookingOutcome),
    /// A concurrent request took the key first: its outcome when the bodies
    /// match, `IDEMPOTENCY_KEY_REUSED` when they differ
    Lost(Result<BookingOutcome>),
}

impl Finished {
    fn into_result(self) -> Result<BookingOutcome> {
        match self {
            Self::Recorded(outcome) => Ok(outcome),
            Self::Lost(result) => result,
        }
    }
}

/// Orchestrates create, update, cancel and staff transitions.
///
/// The restaurant context is passed into every call; the orchestrator holds
/// no tenant state of its own.
#[derive(Clone)]
pub struct BookingOrchestrator {
    env: BookingEnvironment,
    issuer: ManageTokenIssuer,
}

impl BookingOrchestrator {
    /// Orchestrator over `env`.
    #[must_use]
    pub fn new(env: BookingEnvironment) -> Self {
        let issuer = ManageTokenIssuer::new(Arc::clone(&env.tokens));
        Self { env, issuer }
    }

    /// The ports in use.
    #[must_use]
    pub const fn environment(&self) -> &BookingEnvironment {
        &self.env
    }

    // ═══════════════════════════════════════════════════════════
    // Create
    // ═══════════════════════════════════════════════════════════

    /// Book a table, or record a group inquiry for large parties.
    ///
    /// `bot_token` is required for [`BookingSource::Online`] and ignored otherwise.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED`, `INVALID_INPUT`, `IDEMPOTENCY_KEY_REUSED`, `TURNSTILE_FAILED`,
    /// `NOT_FOUND` (slot), `SLOT_TAKEN`, `INSUFFICIENT_CAPACITY`, infrastructure errors.
    #[tracing::instrument(
        skip_all,
        fields(restaurant_id = %ctx.restaurant_id, idempotency_key = %meta.idempotency_key, source = source.as_str())
    )]
    pub async fn create(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        request: &CreateBookingRequest,
        bot_token: Option<&str>,
        source: BookingSource,
    ) -> Result<BookingOutcome> {
        let result = self.create_inner(ctx, meta, request, bot_token, source).await;
        observe("create", &result);
        result
    }

    async fn create_inner(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        request: &CreateBookingRequest,
        bot_token: Option<&str>,
        source: BookingSource,
    ) -> Result<BookingOutcome> {
        self.acquire(meta)?;
        meta.validate()?;
        let booking = request.validate()?;
        let payload = json!({ "source": source, "request": request });

        let (key, hash) = match self.begin(ctx, "create", meta, &payload).await? {
            Guard::Replay(outcome) => return Ok(outcome),
            Guard::Fresh { key, hash } => (key, hash),
        };

        if source == BookingSource::Online {
            self.verify_human(bot_token, meta.remote_ip.as_deref()).await?;
        }

        let now = self.env.clock.now();
        let party_size = booking.party.size();

        if party_size >= ctx.policy.group_inquiry_min_party {
            let inquiry = self
                .env
                .group_inquiries
                .create(GroupInquiry {
                    id: GroupInquiryId::new(),
                    restaurant_id: ctx.restaurant_id,
                    slot_key: booking.slot_key,
                    party_size,
                    contact: booking.contact,
                    note: booking.note,
                    language: booking.language,
                    created_at: now,
                })
                .await?;
            BookingMetrics::record_group_inquiry();
            tracing::info!(inquiry_id = %inquiry.id, party_size, "Group inquiry recorded");

            let outcome = BookingOutcome::GroupInquiry(GroupInquiryReceipt {
                inquiry_id: inquiry.id,
                slot_key: inquiry.slot_key,
                party_size,
            });
            return match self.finish(ctx, meta, key, hash, outcome, now).await {
                Finished::Recorded(outcome) => Ok(outcome),
                Finished::Lost(result) => {
                    self.discard_inquiry(&inquiry).await;
                    result
                },
            };
        }

        let client_id = self
            .env
            .clients
            .upsert_by_phone(ctx.restaurant_id, &booking.contact)
            .await?;

        let reservation = self
            .env
            .ledger
            .create(
                NewReservation {
                    restaurant_id: ctx.restaurant_id,
                    slot_key: booking.slot_key,
                    party: booking.party,
                    client_id,
                    contact: booking.contact,
                    language: booking.language,
                    note: booking.note,
                    source,
                },
                &ctx.policy,
                now,
            )
            .await?;

        BookingMetrics::record_created(reservation.status);
        tracing::info!(
            reservation_id = %reservation.id,
            slot_key = %reservation.slot_key,
            party_size,
            status = %reservation.status,
            "Reservation created"
        );

        let mut receipt = ReservationReceipt::of(&reservation);
        if let Some((token, expires_at)) = self.issue_token(ctx, &reservation, now).await {
            receipt.manage_token = Some(token);
            receipt.manage_token_expires_at = Some(expires_at);
        }
        let manage_token = receipt.manage_token.clone();

        match self
            .finish(ctx, meta, key, hash, BookingOutcome::Reservation(receipt), now)
            .await
        {
            Finished::Recorded(outcome) => {
                if let Some(kind) = NotificationKind::for_status(reservation.status) {
                    self.notify(&reservation, kind, manage_token).await;
                }
                Ok(outcome)
            },
            Finished::Lost(result) => {
                self.compensate_duplicate(&reservation).await;
                result
            },
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Update / cancel
    // ═══════════════════════════════════════════════════════════

    /// Change slot, party, note or language of a pending or confirmed reservation.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED`, `INVALID_INPUT`, `IDEMPOTENCY_KEY_REUSED`, `TOKEN_INVALID`,
    /// `TOKEN_EXPIRED`, `FORBIDDEN`, `NOT_FOUND`, `VERSION_CONFLICT`, `NOT_MODIFIABLE`,
    /// `SLOT_TAKEN`, `INSUFFICIENT_CAPACITY`, infrastructure errors.
    #[tracing::instrument(
        skip_all,
        fields(restaurant_id = %ctx.restaurant_id, idempotency_key = %meta.idempotency_key)
    )]
    pub async fn update(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        actor: &Actor,
        request: &UpdateBookingRequest,
    ) -> Result<BookingOutcome> {
        let result = self.update_inner(ctx, meta, actor, request).await;
        observe("update", &result);
        result
    }

    async fn update_inner(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        actor: &Actor,
        request: &UpdateBookingRequest,
    ) -> Result<BookingOutcome> {
        self.acquire(meta)?;
        meta.validate()?;
        let change = request.validate()?;
        let payload = json!({ "actor": actor, "request": request });

        let (key, hash) = match self.begin(ctx, "update", meta, &payload).await? {
            Guard::Replay(outcome) => return Ok(outcome),
            Guard::Fresh { key, hash } => (key, hash),
        };

        let now = self.env.clock.now();
        let id = self.authorize(ctx, actor, now).await?;
        let reservation = self
            .env
            .ledger
            .update(id, change, &ctx.policy, now)
            .await?;

        BookingMetrics::record_updated();
        tracing::info!(
            reservation_id = %reservation.id,
            slot_key = %reservation.slot_key,
            version = %reservation.version,
            "Reservation updated"
        );

        let outcome = BookingOutcome::Reservation(ReservationReceipt::of(&reservation));
        let finished = self.finish(ctx, meta, key, hash, outcome, now).await;

        let token = self.issue_token(ctx, &reservation, now).await.map(|(t, _)| t);
        self.notify(&reservation, NotificationKind::ReservationUpdated, token)
            .await;
        finished.into_result()
    }

    /// Cancel a pending or confirmed reservation, by manage token or by staff.
    ///
    /// On the token path the token is burned.
    ///
    /// # Errors
    ///
    /// `RATE_LIMITED`, `INVALID_INPUT`, `IDEMPOTENCY_KEY_REUSED`, `TOKEN_INVALID`,
    /// `TOKEN_EXPIRED`, `FORBIDDEN`, `NOT_FOUND`, `VERSION_CONFLICT`, `NOT_MODIFIABLE`,
    /// infrastructure errors.
    #[tracing::instrument(
        skip_all,
        fields(restaurant_id = %ctx.restaurant_id, idempotency_key = %meta.idempotency_key)
    )]
    pub async fn cancel(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        actor: &Actor,
        request: &CancelBookingRequest,
    ) -> Result<BookingOutcome> {
        let result = self.cancel_inner(ctx, meta, actor, request).await;
        observe("cancel", &result);
        result
    }

    async fn cancel_inner(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        actor: &Actor,
        request: &CancelBookingRequest,
    ) -> Result<BookingOutcome> {
        self.acquire(meta)?;
        meta.validate()?;
        let payload = json!({ "actor": actor, "request": request });

        let (key, hash) = match self.begin(ctx, "cancel", meta, &payload).await? {
            Guard::Replay(outcome) => return Ok(outcome),
            Guard::Fresh { key, hash } => (key, hash),
        };

        let now = self.env.clock.now();
        let id = self.authorize(ctx, actor, now).await?;
        let reservation = self
            .env
            .ledger
            .cancel(id, request.expected_version, now)
            .await?;

        if let Actor::Guest { token } = actor {
            if let Err(e) = self.issuer.mark_used(token, now).await {
                tracing::warn!(reservation_id = %id, error = %e, "Manage token was not burned");
            }
        }

        BookingMetrics::record_cancelled();
        tracing::info!(reservation_id = %reservation.id, version = %reservation.version, "Reservation cancelled");

        let outcome = BookingOutcome::Reservation(ReservationReceipt::of(&reservation));
        let finished = self.finish(ctx, meta, key, hash, outcome, now).await;
        self.notify(&reservation, NotificationKind::ReservationCancelled, None)
            .await;
        finished.into_result()
    }

    // ═══════════════════════════════════════════════════════════
    // Staff operations
    // ═══════════════════════════════════════════════════════════

    /// Apply any status change allowed by the transition table.
    ///
    /// Moving back into a seat-consuming status re-checks capacity.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `IDEMPOTENCY_KEY_REUSED`, `NOT_FOUND`, `VERSION_CONFLICT`,
    /// `INVALID_TRANSITION`, `SLOT_TAKEN`, `INSUFFICIENT_CAPACITY`, infrastructure errors.
    #[tracing::instrument(
        skip_all,
        fields(restaurant_id = %ctx.restaurant_id, reservation_id = %id, to = %request.to)
    )]
    pub async fn transition(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        id: ReservationId,
        role: StaffRole,
        request: &TransitionRequest,
    ) -> Result<BookingOutcome> {
        let result = self.transition_inner(ctx, meta, id, role, request).await;
        observe("transition", &result);
        result
    }

    async fn transition_inner(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        id: ReservationId,
        role: StaffRole,
        request: &TransitionRequest,
    ) -> Result<BookingOutcome> {
        meta.validate()?;
        let payload = json!({ "reservationId": id, "request": request });

        let (key, hash) = match self.begin(ctx, "transition", meta, &payload).await? {
            Guard::Replay(outcome) => return Ok(outcome),
            Guard::Fresh { key, hash } => (key, hash),
        };

        let now = self.env.clock.now();
        let actor = Actor::Staff {
            reservation_id: id,
            role,
        };
        self.authorize(ctx, &actor, now).await?;
        let reservation = self
            .env
            .ledger
            .transition(id, request.expected_version, request.to, now)
            .await?;

        BookingMetrics::record_transition(request.to);
        tracing::info!(version = %reservation.version, "Reservation status changed");

        let outcome = BookingOutcome::Reservation(ReservationReceipt::of(&reservation));
        let finished = self.finish(ctx, meta, key, hash, outcome, now).await;
        if let Some(kind) = NotificationKind::for_status(request.to) {
            let token = match kind {
                NotificationKind::ReservationConfirmed => {
                    self.issue_token(ctx, &reservation, now).await.map(|(t, _)| t)
                },
                _ => None,
            };
            self.notify(&reservation, kind, token).await;
        }
        finished.into_result()
    }

    /// Attach tables chosen by the floor-plan collaborator.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `NOT_FOUND`, `VERSION_CONFLICT`, `NOT_MODIFIABLE`.
    pub async fn assign_tables(
        &self,
        ctx: &RestaurantContext,
        id: ReservationId,
        role: StaffRole,
        expected_version: Version,
        table_ids: Vec<String>,
    ) -> Result<Reservation> {
        let now = self.env.clock.now();
        self.authorize(
            ctx,
            &Actor::Staff {
                reservation_id: id,
                role,
            },
            now,
        )
        .await?;
        self.env
            .ledger
            .assign_tables(id, expected_version, table_ids, now)
            .await
    }

    /// Create or replace a slot's base configuration.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN` unless owner or manager; infrastructure errors.
    pub async fn configure_slot(
        &self,
        ctx: &RestaurantContext,
        role: StaffRole,
        config: SlotConfig,
    ) -> Result<()> {
        ensure_configurer(role)?;
        tracing::info!(slot_key = %config.slot_key, capacity = config.capacity, "Slot configured");
        self.env.slots.upsert_slot(ctx.restaurant_id, config).await
    }

    /// Set the manual or period override of a slot.
    ///
    /// # Errors
    ///
    /// `FORBIDDEN`, `NOT_FOUND` if the slot has no base configuration.
    pub async fn override_slot(
        &self,
        ctx: &RestaurantContext,
        role: StaffRole,
        slot_key: SlotKey,
        over: SlotOverride,
    ) -> Result<()> {
        ensure_configurer(role)?;
        if self
            .env
            .slots
            .get_slot(ctx.restaurant_id, slot_key)
            .await?
            .is_none()
        {
            return Err(BookingError::not_found("slot", slot_key));
        }
        self.env
            .slots
            .set_override(ctx.restaurant_id, slot_key, over)
            .await
    }

    // ═══════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════

    /// Live availability of a slot.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for unknown slots; storage failures.
    pub async fn availability(
        &self,
        ctx: &RestaurantContext,
        slot_key: SlotKey,
    ) -> Result<SlotAvailability> {
        self.env
            .ledger
            .slot_availability(ctx.restaurant_id, slot_key)
            .await
    }

    /// A reservation of this restaurant.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND`; storage failures.
    pub async fn reservation(
        &self,
        ctx: &RestaurantContext,
        id: ReservationId,
    ) -> Result<Reservation> {
        self.load(ctx, id).await
    }

    /// All reservations on a slot.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn slot_reservations(
        &self,
        ctx: &RestaurantContext,
        slot_key: SlotKey,
    ) -> Result<Vec<Reservation>> {
        self.env
            .ledger
            .list_for_slot(ctx.restaurant_id, slot_key)
            .await
    }

    // ═══════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════

    fn acquire(&self, meta: &RequestMeta) -> Result<()> {
        self.env
            .rate_limiter
            .try_acquire(&meta.fingerprint)
            .map_err(|retry_after| BookingError::RateLimited { retry_after })
    }

    async fn verify_human(&self, token: Option<&str>, remote_ip: Option<&str>) -> Result<()> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or(BookingError::TurnstileFailed)?;
        if self.env.bot_verifier.verify(token, remote_ip).await? {
            Ok(())
        } else {
            Err(BookingError::TurnstileFailed)
        }
    }

    async fn begin(
        &self,
        ctx: &RestaurantContext,
        operation: &'static str,
        meta: &RequestMeta,
        payload: &Value,
    ) -> Result<Guard> {
        let key = format!(
            "{}:{operation}:{}",
            ctx.restaurant_id,
            meta.idempotency_key.trim()
        );
        let hash = hash_value(payload);
        let now = self.env.clock.now();

        match self.env.idempotency.check(&key, &hash, now).await? {
            IdempotencyCheck::NotFound => Ok(Guard::Fresh { key, hash }),
            IdempotencyCheck::HashMismatch => Err(BookingError::IdempotencyKeyReused {
                key: meta.idempotency_key.clone(),
            }),
            IdempotencyCheck::Replay(cached) => {
                let outcome = decode_outcome(cached)?;
                BookingMetrics::record_replay(operation);
                tracing::info!(operation, "Idempotent replay");
                Ok(Guard::Replay(outcome))
            },
        }
    }

    /// Store the result under the scoped key.
    async fn finish(
        &self,
        ctx: &RestaurantContext,
        meta: &RequestMeta,
        key: String,
        request_hash: RequestHash,
        outcome: BookingOutcome,
        now: DateTime<Utc>,
    ) -> Finished {
        let result_data = match serde_json::to_value(&outcome) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Outcome not serializable, skipping idempotency record");
                return Finished::Recorded(outcome);
            },
        };
        let record = IdempotencyRecord {
            key,
            request_hash: request_hash.clone(),
            result_data,
            created_at: now,
            expires_at: now + ctx.policy.idempotency_ttl,
        };

        match self.env.idempotency.store(record).await {
            Ok(StoreOutcome::Stored) => Finished::Recorded(outcome),
            Ok(StoreOutcome::AlreadyStored {
                request_hash: winner_hash,
                ..
            }) if winner_hash != request_hash => {
                tracing::warn!("Concurrent request reused the idempotency key with another body");
                Finished::Lost(Err(BookingError::IdempotencyKeyReused {
                    key: meta.idempotency_key.clone(),
                }))
            },
            Ok(StoreOutcome::AlreadyStored { result_data, .. }) => {
                Finished::Lost(decode_outcome(result_data))
            },
            Err(e) => {
                tracing::warn!(error = %e, "Idempotency record not stored");
                Finished::Recorded(outcome)
            },
        }
    }

    async fn discard_inquiry(&self, inquiry: &GroupInquiry) {
        tracing::warn!(
            inquiry_id = %inquiry.id,
            "Concurrent request with the same idempotency key won, discarding duplicate inquiry"
        );
        if let Err(e) = self.env.group_inquiries.discard(inquiry.id).await {
            tracing::error!(inquiry_id = %inquiry.id, error = %e, "Duplicate inquiry not discarded");
        }
    }

    async fn compensate_duplicate(&self, reservation: &Reservation) {
        tracing::warn!(
            reservation_id = %reservation.id,
            "Concurrent request with the same idempotency key won, cancelling duplicate"
        );
        let now = self.env.clock.now();
        if let Err(e) = self
            .env
            .ledger
            .cancel(reservation.id, Some(reservation.version), now)
            .await
        {
            tracing::error!(reservation_id = %reservation.id, error = %e, "Duplicate reservation not cancelled");
        }
    }

    async fn authorize(
        &self,
        ctx: &RestaurantContext,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ReservationId> {
        let id = match actor {
            Actor::Guest { token } => self.issuer.redeem(token, now).await?,
            Actor::Staff {
                reservation_id,
                role,
            } => {
                if !role.can_mutate() {
                    return Err(BookingError::Forbidden {
                        role: role.to_string(),
                    });
                }
                *reservation_id
            },
        };
        self.load(ctx, id).await?;
        Ok(id)
    }

    async fn load(&self, ctx: &RestaurantContext, id: ReservationId) -> Result<Reservation> {
        self.env
            .ledger
            .get(id)
            .await?
            .filter(|r| r.restaurant_id == ctx.restaurant_id)
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    async fn issue_token(
        &self,
        ctx: &RestaurantContext,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> Option<(String, DateTime<Utc>)> {
        let expires_at = ctx.manage_token_expiry(&reservation.slot_key);
        if expires_at <= now {
            return None;
        }
        match self
            .issuer
            .issue(reservation.id, TokenPurpose::Manage, expires_at, now)
            .await
        {
            Ok(token) => Some((token.token, token.expires_at)),
            Err(e) => {
                tracing::warn!(reservation_id = %reservation.id, error = %e, "Manage token not issued");
                None
            },
        }
    }

    async fn notify(
        &self,
        reservation: &Reservation,
        kind: NotificationKind,
        manage_token: Option<String>,
    ) {
        let request = NewNotification {
            dedupe_key: DedupeKey::for_reservation(kind, reservation.id, reservation.version),
            kind,
            payload: NotificationPayload {
                reservation_id: reservation.id,
                restaurant_id: reservation.restaurant_id,
                recipient: reservation.contact.email.clone(),
                guest_name: reservation.contact.display_name(),
                language: reservation.language.clone(),
                slot_key: reservation.slot_key,
                party_size: reservation.party_size(),
                status: reservation.status,
                version: reservation.version,
                manage_token,
            },
        };
        let dedupe_key = request.dedupe_key.clone();

        match self
            .env
            .notifications
            .enqueue(request, self.env.clock.now())
            .await
        {
            Ok(outcome) if outcome.is_new() => {
                NotificationMetrics::record_enqueued(kind);
                tracing::debug!(%dedupe_key, "Notification enqueued");
            },
            Ok(_) => tracing::debug!(%dedupe_key, "Notification already enqueued"),
            Err(e) => {
                tracing::error!(%dedupe_key, error = %e, "Notification enqueue failed");
            },
        }
    }
}

fn ensure_configurer(role: StaffRole) -> Result<()> {
    if role.can_configure() {
        Ok(())
    } else {
        Err(BookingError::Forbidden {
            role: role.to_string(),
        })
    }
}

fn decode_outcome(value: Value) -> Result<BookingOutcome> {
    serde_json::from_value(value)
        .map_err(|e| BookingError::Storage(format!("cached outcome is unreadable: {e}")))
}

fn observe(operation: &'static str, result: &Result<BookingOutcome>) {
    if let Err(err) = result {
        BookingMetrics::record_rejection(operation, err);
        if err.is_client_error() {
            tracing::warn!(operation, code = err.code(), error = %err, "Booking request rejected");
        } else {
            tracing::error!(operation, code = err.code(), error = %err, "Booking request failed");
        }
    }
}
