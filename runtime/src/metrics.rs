//! Prometheus metrics for the booking engine.
//!
//! - Booking outcomes (created, replayed, rejected by code)
//! - Notification delivery (sent, retried, abandoned, latency)
//! - Outbox depth
//!
//! # Example
//!
//! ```rust,no_run
//! use tablebook_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let text = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tablebook_core::error::BookingError;
use tablebook_core::notification::{NotificationKind, QueueStats};
use tablebook_core::types::ReservationStatus;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address the service exposes it on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; the handle then stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Address the metrics endpoint should be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("booking_created_total", "Reservations created, by initial status");
    describe_counter!("booking_group_inquiries_total", "Large-party requests routed to group inquiries");
    describe_counter!("booking_updated_total", "Reservations modified");
    describe_counter!("booking_cancelled_total", "Reservations cancelled");
    describe_counter!("booking_transitions_total", "Staff status changes, by target status");
    describe_counter!("booking_replayed_total", "Requests answered from the idempotency cache");
    describe_counter!("booking_rejected_total", "Rejected booking requests, by error code");

    describe_counter!("notification_enqueued_total", "Notification jobs created");
    describe_counter!("notification_sent_total", "Notifications delivered");
    describe_counter!("notification_retry_scheduled_total", "Failed deliveries with a retry scheduled");
    describe_counter!("notification_failed_total", "Notifications abandoned after the last attempt");
    describe_histogram!("notification_delivery_duration_seconds", "Render and send time per job");
    describe_gauge!("notification_queue_depth", "Jobs per status at the last sweep");

    describe_histogram!("ledger_slot_lock_wait_seconds", "Time spent waiting for a slot lock");
}

/// Booking workflow recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// A reservation was created.
    pub fn record_created(status: ReservationStatus) {
        counter!("booking_created_total", "status" => status.as_str()).increment(1);
    }

    /// A group inquiry was recorded.
    pub fn record_group_inquiry() {
        counter!("booking_group_inquiries_total").increment(1);
    }

    /// A reservation was modified.
    pub fn record_updated() {
        counter!("booking_updated_total").increment(1);
    }

    /// A reservation was cancelled.
    pub fn record_cancelled() {
        counter!("booking_cancelled_total").increment(1);
    }

    /// Staff moved a reservation to `to`.
    pub fn record_transition(to: ReservationStatus) {
        counter!("booking_transitions_total", "to" => to.as_str()).increment(1);
    }

    /// A cached result was replayed.
    pub fn record_replay(operation: &'static str) {
        counter!("booking_replayed_total", "operation" => operation).increment(1);
    }

    /// A request was rejected.
    pub fn record_rejection(operation: &'static str, error: &BookingError) {
        counter!("booking_rejected_total", "operation" => operation, "code" => error.code())
            .increment(1);
    }
}

/// Outbox recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// A job was created.
    pub fn record_enqueued(kind: NotificationKind) {
        counter!("notification_enqueued_total", "kind" => kind.as_str()).increment(1);
    }

    /// A job was delivered.
    pub fn record_sent(kind: NotificationKind, duration: Duration) {
        counter!("notification_sent_total", "kind" => kind.as_str()).increment(1);
        histogram!("notification_delivery_duration_seconds").record(duration.as_secs_f64());
    }

    /// A delivery failed and will be retried.
    pub fn record_retry(duration: Duration) {
        counter!("notification_retry_scheduled_total").increment(1);
        histogram!("notification_delivery_duration_seconds").record(duration.as_secs_f64());
    }

    /// A job was abandoned.
    pub fn record_failed(kind: NotificationKind) {
        counter!("notification_failed_total", "kind" => kind.as_str()).increment(1);
    }

    /// Queue depth snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_depth(stats: &QueueStats) {
        gauge!("notification_queue_depth", "status" => "queued").set(stats.queued as f64);
        gauge!("notification_queue_depth", "status" => "sent").set(stats.sent as f64);
        gauge!("notification_queue_depth", "status" => "failed").set(stats.failed as f64);
    }
}
