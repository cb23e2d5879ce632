//! Outbound notification queue (outbox) and delivery transport ports.
//!
//! The booking workflow only ever *enqueues*; delivery is done later by a worker
//! that claims due jobs, calls the [`NotificationTransport`] and records the
//! outcome. Delivery is at-least-once: a worker that crashes after the
//! transport accepted a message but before `mark_sent` leaves the job queued,
//! and it is sent again once its claim goes stale.
//!
//! # Job lifecycle
//!
//! ```text
//! enqueue ──► queued ──claim──► (deliver) ──ok──► sent
//!               ▲                   │
//!               └── retry scheduled ┤
//!                                   └── attempts exhausted ──► failed
//! ```

use crate::error::{BookingError, Result};
use crate::types::{
    NotificationJobId, ReservationId, ReservationStatus, RestaurantId, SlotKey, Version,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delivery state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for (re)delivery
    Queued,
    /// Accepted by the transport
    Sent,
    /// Gave up after the last attempt
    Failed,
}

impl JobStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(BookingError::Storage(format!("Invalid job status: {s}"))),
        }
    }
}

/// Kind of guest message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Booking accepted
    ReservationConfirmed,
    /// Booking awaiting staff review
    ReservationPending,
    /// Slot, party or note changed
    ReservationUpdated,
    /// Booking cancelled
    ReservationCancelled,
    /// Booking declined by staff
    ReservationRefused,
}

impl NotificationKind {
    /// Database / dedupe-key representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationConfirmed => "reservation_confirmed",
            Self::ReservationPending => "reservation_pending",
            Self::ReservationUpdated => "reservation_updated",
            Self::ReservationCancelled => "reservation_cancelled",
            Self::ReservationRefused => "reservation_refused",
        }
    }

    /// Message announcing that a reservation entered `status`, if guests are told about it.
    #[must_use]
    pub const fn for_status(status: ReservationStatus) -> Option<Self> {
        match status {
            ReservationStatus::Confirmed => Some(Self::ReservationConfirmed),
            ReservationStatus::Pending => Some(Self::ReservationPending),
            ReservationStatus::Cancelled => Some(Self::ReservationCancelled),
            ReservationStatus::Refused => Some(Self::ReservationRefused),
            ReservationStatus::CardPlaced
            | ReservationStatus::Seated
            | ReservationStatus::Completed
            | ReservationStatus::NoShow
            | ReservationStatus::Incident => None,
        }
    }
}

impl FromStr for NotificationKind {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reservation_confirmed" => Ok(Self::ReservationConfirmed),
            "reservation_pending" => Ok(Self::ReservationPending),
            "reservation_updated" => Ok(Self::ReservationUpdated),
            "reservation_cancelled" => Ok(Self::ReservationCancelled),
            "reservation_refused" => Ok(Self::ReservationRefused),
            _ => Err(BookingError::Storage(format!("Invalid notification kind: {s}"))),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue-side uniqueness key: `{kind}:{reservationId}:{version}`.
///
/// Including the version means every accepted mutation gets its own key, while
/// a retried enqueue for the same mutation collides.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// Key for a message about a given reservation version.
    #[must_use]
    pub fn for_reservation(kind: NotificationKind, id: ReservationId, version: Version) -> Self {
        Self(format!("{}:{id}:{version}", kind.as_str()))
    }

    /// Wrap a stored key.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data needed to render a guest message, captured at enqueue time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Reservation concerned
    pub reservation_id: ReservationId,
    /// Owning restaurant
    pub restaurant_id: RestaurantId,
    /// Destination address; jobs without one fail on delivery
    pub recipient: Option<String>,
    /// Name to greet
    pub guest_name: String,
    /// Two-letter language code
    pub language: String,
    /// Slot booked
    pub slot_key: SlotKey,
    /// Guests
    pub party_size: u32,
    /// Status at enqueue time
    pub status: ReservationStatus,
    /// Reservation version the message describes
    pub version: Version,
    /// Manage token to embed as a self-service link
    pub manage_token: Option<String>,
}

/// Enqueue request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewNotification {
    /// Uniqueness key
    pub dedupe_key: DedupeKey,
    /// Message kind
    pub kind: NotificationKind,
    /// Render data
    pub payload: NotificationPayload,
}

/// A queued, delivered or abandoned notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    /// Identity
    pub id: NotificationJobId,
    /// Uniqueness key
    pub dedupe_key: DedupeKey,
    /// Message kind
    pub kind: NotificationKind,
    /// Render data
    pub payload: NotificationPayload,
    /// Delivery state
    pub status: JobStatus,
    /// Failed delivery attempts so far
    pub attempt_count: u32,
    /// Not claimable before this instant
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Error code of the last failed attempt
    pub last_error: Option<String>,
    /// When the current claim was taken
    pub locked_at: Option<DateTime<Utc>>,
    /// Worker holding the current claim
    pub locked_by: Option<String>,
    /// Transport message id once sent
    pub message_id: Option<String>,
    /// Enqueue time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Delivery time
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationJob {
    /// Fresh queued job for `request`.
    #[must_use]
    pub fn queued(request: NewNotification, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationJobId::new(),
            dedupe_key: request.dedupe_key,
            kind: request.kind,
            payload: request.payload,
            status: JobStatus::Queued,
            attempt_count: 0,
            next_retry_at: None,
            last_error: None,
            locked_at: None,
            locked_by: None,
            message_id: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    /// Whether a worker may claim this job.
    ///
    /// Queued, due, and either unclaimed or claimed before `stuck_before`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>, stuck_before: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued
            && self.next_retry_at.is_none_or(|at| at <= now)
            && self.locked_at.is_none_or(|at| at < stuck_before)
    }

    /// Queued and currently claimed by `worker_id`.
    #[must_use]
    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Queued && self.locked_by.as_deref() == Some(worker_id)
    }
}

/// Result of [`NotificationQueue::enqueue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was stored
    Created(NotificationJob),
    /// A job with this dedupe key already existed (in any status) and is returned unchanged
    Existing(NotificationJob),
}

impl EnqueueOutcome {
    /// The stored job.
    #[must_use]
    pub const fn job(&self) -> &NotificationJob {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }

    /// Whether this call created the job.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Batch claim parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Claimant
    pub worker_id: String,
    /// Current time
    pub now: DateTime<Utc>,
    /// Batch size
    pub limit: usize,
    /// Claims taken before this instant are considered abandoned
    pub stuck_before: DateTime<Utc>,
}

/// Outcome of a failed delivery attempt, computed by the worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    /// Attempts including this one
    pub attempt_count: u32,
    /// Transport error code
    pub error_code: String,
    /// Next eligible instant; `None` when terminal
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Move to `failed`
    pub terminal: bool,
}

/// Per-status job counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting for delivery
    pub queued: u64,
    /// Delivered jobs
    pub sent: u64,
    /// Abandoned jobs
    pub failed: u64,
}

/// Durable notification outbox.
///
/// # Claims
///
/// `claim_due` must hand each job to at most one worker at a time: the claim
/// (`locked_at`, `locked_by`) is committed before the jobs are returned.
pub trait NotificationQueue: Send + Sync {
    /// Insert a queued job unless one with the same dedupe key exists.
    fn enqueue(
        &self,
        request: NewNotification,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EnqueueOutcome>>;

    /// Claim up to `limit` claimable jobs, oldest first.
    fn claim_due(&self, request: ClaimRequest) -> BoxFuture<'_, Result<Vec<NotificationJob>>>;

    /// Mark a job sent. Returns `false` unless it is still queued and claimed
    /// by `worker_id`.
    fn mark_sent<'a>(
        &'a self,
        id: NotificationJobId,
        worker_id: &'a str,
        message_id: Option<String>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Record a failed attempt and release the claim. Returns `false` unless the
    /// job is still queued and claimed by `worker_id`, so a worker whose claim
    /// was taken over cannot overwrite the new holder's attempt count.
    fn record_failure<'a>(
        &'a self,
        id: NotificationJobId,
        worker_id: &'a str,
        failure: FailureRecord,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Fetch a job.
    fn get(&self, id: NotificationJobId) -> BoxFuture<'_, Result<Option<NotificationJob>>>;

    /// Fetch a job by dedupe key.
    fn find_by_dedupe_key<'a>(
        &'a self,
        key: &'a DedupeKey,
    ) -> BoxFuture<'a, Result<Option<NotificationJob>>>;

    /// Jobs per status.
    fn count_by_status(&self) -> BoxFuture<'_, Result<QueueStats>>;

    /// Delete `failed` jobs last touched before `cutoff`.
    fn purge_failed_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<u64>>;
}

/// Rendered message handed to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination address
    pub recipient: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Transport accepted the message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider message id, when the provider returns one
    pub message_id: Option<String>,
}

/// Transport rejected the message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed: {error_code}")]
pub struct DeliveryFailure {
    /// Short machine-readable reason
    pub error_code: String,
}

impl DeliveryFailure {
    /// Build a failure from any code.
    #[must_use]
    pub fn new(error_code: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
        }
    }
}

/// External "send" operation.
///
/// Never called from inside a ledger transaction.
pub trait NotificationTransport: Send + Sync {
    /// Deliver one message.
    fn send<'a>(
        &'a self,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, std::result::Result<DeliveryReceipt, DeliveryFailure>>;
}
