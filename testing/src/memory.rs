//! In-memory adapters for every storage port.
//!
//! Each store keeps its state behind one mutex, so every operation is atomic
//! with respect to every other operation on the same store. That is stronger
//! than the per-slot guarantee the ports ask for, which keeps these adapters
//! honest stand-ins for the database in concurrency tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned locks panic

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use tablebook_core::capacity::{Occupancy, SlotAvailability, SlotConfig, SlotOverride};
use tablebook_core::collaborators::{
    ClientDirectory, GroupInquiry, GroupInquiryStore, normalize_phone,
};
use tablebook_core::error::{BookingError, Result};
use tablebook_core::idempotency::{
    IdempotencyCheck, IdempotencyRecord, IdempotencyStore, RequestHash, StoreOutcome,
};
use tablebook_core::ledger::{
    NewReservation, ReservationChange, ReservationLedger, SlotCatalog, SlotSnapshot,
    needs_capacity, plan_assign_tables, plan_cancel, plan_create, plan_transition, plan_update,
};
use tablebook_core::notification::{
    ClaimRequest, DedupeKey, EnqueueOutcome, FailureRecord, JobStatus, NewNotification,
    NotificationJob, NotificationQueue, QueueStats,
};
use tablebook_core::tenant::BookingPolicy;
use tablebook_core::token::{ManageToken, ManageTokenStore};
use tablebook_core::types::{
    ClientId, ContactDetails, GroupInquiryId, NotificationJobId, Reservation, ReservationId,
    ReservationStatus, RestaurantId, SlotKey, Version,
};

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Default)]
struct SlotRecord {
    config: Option<SlotConfig>,
    overrides: Vec<SlotOverride>,
}

#[derive(Debug, Default)]
struct LedgerState {
    slots: HashMap<(RestaurantId, SlotKey), SlotRecord>,
    reservations: HashMap<ReservationId, Reservation>,
    order: Vec<ReservationId>,
}

impl LedgerState {
    fn snapshot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
        exclude: Option<ReservationId>,
    ) -> Result<SlotSnapshot> {
        let record = self.slots.get(&(restaurant_id, slot_key));
        let config = record
            .and_then(|r| r.config.clone())
            .ok_or_else(|| BookingError::not_found("slot", slot_key))?;
        let occupants = self
            .reservations
            .values()
            .filter(|r| r.restaurant_id == restaurant_id && r.slot_key == slot_key)
            .filter(|r| Some(r.id) != exclude)
            .map(Occupancy::from)
            .collect();

        Ok(SlotSnapshot {
            config,
            overrides: record.map(|r| r.overrides.clone()).unwrap_or_default(),
            occupants,
        })
    }

    fn current(&self, id: ReservationId) -> Result<&Reservation> {
        self.reservations
            .get(&id)
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    fn save(&mut self, reservation: Reservation) -> Reservation {
        if !self.reservations.contains_key(&reservation.id) {
            self.order.push(reservation.id);
        }
        self.reservations.insert(reservation.id, reservation.clone());
        reservation
    }
}

/// Reservation ledger and slot catalog backed by a `HashMap`.
///
/// # Example
///
/// ```
/// use tablebook_testing::memory::MemoryLedger;
/// use tablebook_testing::fixtures::{slot_config, restaurant_context};
/// use tablebook_core::ledger::{ReservationLedger, SlotCatalog};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = restaurant_context();
/// let ledger = MemoryLedger::new();
/// ledger.upsert_slot(ctx.restaurant_id, slot_config(10)).await?;
/// let availability = ledger
///     .slot_availability(ctx.restaurant_id, slot_config(10).slot_key)
///     .await?;
/// assert_eq!(availability.remaining_capacity, 10);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reservations, any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().reservations.len()
    }

    /// Whether no reservation was ever stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a reservation as-is, bypassing every check.
    ///
    /// Useful for setting up states the workflow cannot reach quickly.
    pub fn insert_raw(&self, reservation: Reservation) {
        self.state.lock().unwrap().save(reservation);
    }
}

impl SlotCatalog for MemoryLedger {
    fn upsert_slot(
        &self,
        restaurant_id: RestaurantId,
        config: SlotConfig,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let slot_key = config.slot_key;
            state
                .slots
                .entry((restaurant_id, slot_key))
                .or_default()
                .config = Some(config);
            Ok(())
        })
    }

    fn set_override(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
        over: SlotOverride,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let record = state.slots.entry((restaurant_id, slot_key)).or_default();
            record.overrides.retain(|o| o.origin != over.origin);
            record.overrides.push(over);
            Ok(())
        })
    }

    fn get_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Option<SlotConfig>>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .slots
                .get(&(restaurant_id, slot_key))
                .and_then(|r| r.config.clone()))
        })
    }
}

impl ReservationLedger for MemoryLedger {
    fn create<'a>(
        &'a self,
        new: NewReservation,
        policy: &'a BookingPolicy,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let slot = state.snapshot(new.restaurant_id, new.slot_key, None)?;
            let reservation = plan_create(new, &slot, policy, now)?;
            Ok(state.save(reservation))
        })
    }

    fn update<'a>(
        &'a self,
        id: ReservationId,
        change: ReservationChange,
        policy: &'a BookingPolicy,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let current = state.current(id)?.clone();
            let slot = state.snapshot(current.restaurant_id, change.slot_key, Some(id))?;
            let next = plan_update(&current, change, &slot, policy, now)?;
            Ok(state.save(next))
        })
    }

    fn transition(
        &self,
        id: ReservationId,
        expected_version: Version,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let current = state.current(id)?.clone();
            let slot = if needs_capacity(current.status, to) {
                Some(state.snapshot(current.restaurant_id, current.slot_key, Some(id))?)
            } else {
                None
            };
            let next = plan_transition(&current, expected_version, to, slot.as_ref(), now)?;
            Ok(state.save(next))
        })
    }

    fn cancel(
        &self,
        id: ReservationId,
        expected_version: Option<Version>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let current = state.current(id)?.clone();
            let next = plan_cancel(&current, expected_version, now)?;
            Ok(state.save(next))
        })
    }

    fn assign_tables(
        &self,
        id: ReservationId,
        expected_version: Version,
        table_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let current = state.current(id)?.clone();
            let next = plan_assign_tables(&current, expected_version, table_ids, now)?;
            Ok(state.save(next))
        })
    }

    fn get(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().reservations.get(&id).cloned()) })
    }

    fn slot_availability(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<SlotAvailability>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state.snapshot(restaurant_id, slot_key, None)?.availability())
        })
    }

    fn list_for_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Vec<Reservation>>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .order
                .iter()
                .filter_map(|id| state.reservations.get(id))
                .filter(|r| r.restaurant_id == restaurant_id && r.slot_key == slot_key)
                .cloned()
                .collect())
        })
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// First-writer-wins idempotency store.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, live or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether the store holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn check<'a>(
        &'a self,
        key: &'a str,
        request_hash: &'a RequestHash,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<IdempotencyCheck>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(key)
                .map_or(IdempotencyCheck::NotFound, |r| r.check(request_hash, now)))
        })
    }

    fn store(&self, record: IdempotencyRecord) -> BoxFuture<'_, Result<StoreOutcome>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            if let Some(existing) = records.get(&record.key) {
                if !existing.is_expired(record.created_at) {
                    return Ok(StoreOutcome::AlreadyStored {
                        request_hash: existing.request_hash.clone(),
                        result_data: existing.result_data.clone(),
                    });
                }
            }
            records.insert(record.key.clone(), record);
            Ok(StoreOutcome::Stored)
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, r| !r.is_expired(now));
            Ok((before - records.len()) as u64)
        })
    }
}

// ============================================================================
// Manage tokens
// ============================================================================

/// Manage token store keyed by token value.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, ManageToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All tokens minted for `reservation_id`.
    #[must_use]
    pub fn tokens_for(&self, reservation_id: ReservationId) -> Vec<ManageToken> {
        self.tokens
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.reservation_id == reservation_id)
            .cloned()
            .collect()
    }
}

impl ManageTokenStore for MemoryTokenStore {
    fn insert_or_get(
        &self,
        candidate: ManageToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ManageToken>> {
        Box::pin(async move {
            let mut tokens = self.tokens.lock().unwrap();
            if let Some(live) = tokens.values().find(|t| {
                t.reservation_id == candidate.reservation_id
                    && t.purpose == candidate.purpose
                    && t.is_reusable(now)
            }) {
                return Ok(live.clone());
            }
            tokens.insert(candidate.token.clone(), candidate.clone());
            Ok(candidate)
        })
    }

    fn find<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<ManageToken>>> {
        Box::pin(async move { Ok(self.tokens.lock().unwrap().get(token).cloned()) })
    }

    fn mark_used<'a>(&'a self, token: &'a str, now: DateTime<Utc>) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut tokens = self.tokens.lock().unwrap();
            match tokens.get_mut(token) {
                Some(stored) if stored.used_at.is_none() => {
                    stored.used_at = Some(now);
                    Ok(true)
                },
                _ => Ok(false),
            }
        })
    }
}

// ============================================================================
// Notification queue
// ============================================================================

/// Outbox kept in enqueue order.
#[derive(Debug, Default)]
pub struct MemoryNotificationQueue {
    jobs: Mutex<Vec<NotificationJob>>,
}

impl MemoryNotificationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<NotificationJob> {
        self.jobs.lock().unwrap().clone()
    }

    fn with_job<T>(
        &self,
        id: NotificationJobId,
        apply: impl FnOnce(&mut NotificationJob) -> T,
    ) -> Option<T> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.iter_mut().find(|j| j.id == id).map(apply)
    }
}

impl NotificationQueue for MemoryNotificationQueue {
    fn enqueue(
        &self,
        request: NewNotification,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EnqueueOutcome>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(existing) = jobs.iter().find(|j| j.dedupe_key == request.dedupe_key) {
                return Ok(EnqueueOutcome::Existing(existing.clone()));
            }
            let job = NotificationJob::queued(request, now);
            jobs.push(job.clone());
            Ok(EnqueueOutcome::Created(job))
        })
    }

    fn claim_due(&self, request: ClaimRequest) -> BoxFuture<'_, Result<Vec<NotificationJob>>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let claimed = jobs
                .iter_mut()
                .filter(|j| j.is_claimable(request.now, request.stuck_before))
                .take(request.limit)
                .map(|job| {
                    job.locked_at = Some(request.now);
                    job.locked_by = Some(request.worker_id.clone());
                    job.updated_at = request.now;
                    job.clone()
                })
                .collect();
            Ok(claimed)
        })
    }

    fn mark_sent<'a>(
        &'a self,
        id: NotificationJobId,
        worker_id: &'a str,
        message_id: Option<String>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            Ok(self
                .with_job(id, |job| {
                    if !job.is_held_by(worker_id) {
                        return false;
                    }
                    job.status = JobStatus::Sent;
                    job.message_id = message_id;
                    job.sent_at = Some(now);
                    job.updated_at = now;
                    job.locked_at = None;
                    job.locked_by = None;
                    true
                })
                .unwrap_or(false))
        })
    }

    fn record_failure<'a>(
        &'a self,
        id: NotificationJobId,
        worker_id: &'a str,
        failure: FailureRecord,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            Ok(self
                .with_job(id, |job| {
                    if !job.is_held_by(worker_id) {
                        return false;
                    }
                    job.attempt_count = failure.attempt_count;
                    job.last_error = Some(failure.error_code);
                    job.next_retry_at = failure.next_retry_at;
                    if failure.terminal {
                        job.status = JobStatus::Failed;
                    }
                    job.updated_at = now;
                    job.locked_at = None;
                    job.locked_by = None;
                    true
                })
                .unwrap_or(false))
        })
    }

    fn get(&self, id: NotificationJobId) -> BoxFuture<'_, Result<Option<NotificationJob>>> {
        Box::pin(async move { Ok(self.with_job(id, |job| job.clone())) })
    }

    fn find_by_dedupe_key<'a>(
        &'a self,
        key: &'a DedupeKey,
    ) -> BoxFuture<'a, Result<Option<NotificationJob>>> {
        Box::pin(async move {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|j| &j.dedupe_key == key)
                .cloned())
        })
    }

    fn count_by_status(&self) -> BoxFuture<'_, Result<QueueStats>> {
        Box::pin(async move {
            let jobs = self.jobs.lock().unwrap();
            let mut stats = QueueStats::default();
            for job in jobs.iter() {
                match job.status {
                    JobStatus::Queued => stats.queued += 1,
                    JobStatus::Sent => stats.sent += 1,
                    JobStatus::Failed => stats.failed += 1,
                }
            }
            Ok(stats)
        })
    }

    fn purge_failed_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|j| !(j.status == JobStatus::Failed && j.updated_at < cutoff));
            Ok((before - jobs.len()) as u64)
        })
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Group inquiries kept in a `Vec`.
#[derive(Debug, Default)]
pub struct MemoryGroupInquiryStore {
    inquiries: Mutex<Vec<GroupInquiry>>,
}

impl MemoryGroupInquiryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All inquiries received.
    #[must_use]
    pub fn inquiries(&self) -> Vec<GroupInquiry> {
        self.inquiries.lock().unwrap().clone()
    }
}

impl GroupInquiryStore for MemoryGroupInquiryStore {
    fn create(&self, inquiry: GroupInquiry) -> BoxFuture<'_, Result<GroupInquiry>> {
        Box::pin(async move {
            self.inquiries.lock().unwrap().push(inquiry.clone());
            Ok(inquiry)
        })
    }

    fn discard(&self, id: GroupInquiryId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inquiries.lock().unwrap().retain(|i| i.id != id);
            Ok(())
        })
    }
}

/// Client directory keyed by normalised phone.
#[derive(Debug, Default)]
pub struct MemoryClientDirectory {
    clients: Mutex<HashMap<(RestaurantId, String), ClientId>>,
}

impl MemoryClientDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Whether no client exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientDirectory for MemoryClientDirectory {
    fn upsert_by_phone<'a>(
        &'a self,
        restaurant_id: RestaurantId,
        contact: &'a ContactDetails,
    ) -> BoxFuture<'a, Result<ClientId>> {
        Box::pin(async move {
            let key = (restaurant_id, normalize_phone(&contact.phone));
            Ok(*self
                .clients
                .lock()
                .unwrap()
                .entry(key)
                .or_insert_with(ClientId::new))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{new_reservation, restaurant_context, slot_config, slot_key};
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn ledger_rejects_unknown_slot() {
        let ctx = restaurant_context();
        let ledger = MemoryLedger::new();
        let err = ledger
            .create(new_reservation(&ctx, 2), &ctx.policy, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn update_excludes_own_seats() {
        let ctx = restaurant_context();
        let ledger = MemoryLedger::new();
        ledger.upsert_slot(ctx.restaurant_id, slot_config(4)).await.unwrap();
        let created = ledger
            .create(new_reservation(&ctx, 4), &ctx.policy, Utc::now())
            .await
            .unwrap();

        let change = ReservationChange {
            expected_version: created.version,
            slot_key: slot_key(),
            party: created.party,
            note: Some("window".into()),
            language: "en".into(),
        };
        let updated = ledger
            .update(created.id, change, &ctx.policy, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.version, Version::new(2));
    }

    #[tokio::test]
    async fn idempotency_store_is_first_writer_wins() {
        let store = MemoryIdempotencyStore::new();
        let now = Utc::now();
        let record = |value: i32| IdempotencyRecord {
            key: "k".into(),
            request_hash: RequestHash::from_hex("abc"),
            result_data: json!(value),
            created_at: now,
            expires_at: now + Duration::hours(1),
        };
        assert_eq!(store.store(record(1)).await.unwrap(), StoreOutcome::Stored);
        assert_eq!(
            store.store(record(2)).await.unwrap(),
            StoreOutcome::AlreadyStored {
                request_hash: RequestHash::from_hex("abc"),
                result_data: json!(1),
            }
        );
        assert_eq!(store.purge_expired(now + Duration::hours(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_phone_resolves_to_same_client() {
        let directory = MemoryClientDirectory::new();
        let ctx = restaurant_context();
        let mut contact = crate::fixtures::contact("Ana");
        let a = directory.upsert_by_phone(ctx.restaurant_id, &contact).await.unwrap();
        contact.phone = contact.phone.replace(' ', ".");
        let b = directory.upsert_by_phone(ctx.restaurant_id, &contact).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(directory.len(), 1);
    }
}
