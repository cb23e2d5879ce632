//! Notification delivery worker.
//!
//! Drains the outbox in batches: claim, render, send, record. Several workers
//! may run against the same queue; the claim guarantees a job is held by at
//! most one of them, and claims older than `stuck_after` are taken over.
//!
//! A job is tried until it is sent or has failed `max_attempts` times. A job
//! that cannot be rendered (no recipient, unreadable payload) fails at once.
//! Delivery
//! is at-least-once: a worker that crashes after the transport accepted a
//! message but before recording it will see the job retried.

use crate::metrics::NotificationMetrics;
use crate::render::MessageRenderer;
use crate::retry::BackoffPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tablebook_core::environment::Clock;
use tablebook_core::error::Result;
use tablebook_core::idempotency::IdempotencyStore;
use tablebook_core::notification::{
    ClaimRequest, NotificationJob, NotificationQueue, NotificationTransport, QueueStats,
};
use tokio::sync::watch;

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Identity written into claims
    pub worker_id: String,
    /// Jobs per claim
    pub batch_size: usize,
    /// Sleep between empty polls
    pub poll_interval: Duration,
    /// Claims older than this are considered abandoned
    pub stuck_after: Duration,
    /// Failed jobs are purged after this long
    pub failed_retention: Duration,
    /// Time between maintenance sweeps
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            batch_size: 25,
            poll_interval: Duration::from_secs(5),
            stuck_after: Duration::from_secs(10 * 60),
            failed_retention: Duration::from_secs(90 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// What one batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Jobs claimed
    pub claimed: usize,
    /// Delivered
    pub sent: usize,
    /// Failed, retry scheduled
    pub retried: usize,
    /// Failed for good
    pub failed: usize,
}

/// What a maintenance sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired idempotency records removed
    pub idempotency_purged: u64,
    /// Failed jobs removed
    pub failed_jobs_purged: u64,
    /// Queue depth after the sweep
    pub stats: QueueStats,
}

/// Outbox consumer.
pub struct NotificationWorker {
    queue: Arc<dyn NotificationQueue>,
    transport: Arc<dyn NotificationTransport>,
    idempotency: Arc<dyn IdempotencyStore>,
    renderer: MessageRenderer,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl NotificationWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        transport: Arc<dyn NotificationTransport>,
        idempotency: Arc<dyn IdempotencyStore>,
        renderer: MessageRenderer,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            idempotency,
            renderer,
            policy: BackoffPolicy::default(),
            clock,
            config,
        }
    }

    /// Replace the retry schedule.
    #[must_use]
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Claim and process one batch.
    ///
    /// # Errors
    ///
    /// Only the claim itself can fail the batch; per-job failures are recorded
    /// on the job.
    #[tracing::instrument(skip_all, fields(worker_id = %self.config.worker_id))]
    pub async fn run_once(&self) -> Result<BatchReport> {
        let now = self.clock.now();
        let stuck_before = before(now, self.config.stuck_after);
        let jobs = self
            .queue
            .claim_due(ClaimRequest {
                worker_id: self.config.worker_id.clone(),
                now,
                limit: self.config.batch_size,
                stuck_before,
            })
            .await?;

        let mut report = BatchReport {
            claimed: jobs.len(),
            ..BatchReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }
        tracing::debug!(claimed = jobs.len(), "Claimed notification jobs");

        for job in jobs {
            match self.deliver(&job).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Retry) => report.retried += 1,
                Ok(Delivery::Failed) => report.failed += 1,
                Err(e) => {
                    // Claim stays in place and is taken over once stale.
                    tracing::error!(job_id = %job.id, error = %e, "Could not record delivery result");
                },
            }
        }
        Ok(report)
    }

    async fn deliver(&self, job: &NotificationJob) -> Result<Delivery> {
        let started = Instant::now();
        let sent = match self.renderer.render(job) {
            Ok(message) => self.transport.send(&message).await.map_err(|f| (f, false)),
            Err(failure) => Err((failure, true)),
        };
        let elapsed = started.elapsed();
        let now = self.clock.now();

        match sent {
            Ok(receipt) => {
                if self
                    .queue
                    .mark_sent(job.id, &self.config.worker_id, receipt.message_id, now)
                    .await?
                {
                    NotificationMetrics::record_sent(job.kind, elapsed);
                    tracing::info!(
                        job_id = %job.id,
                        kind = %job.kind,
                        dedupe_key = %job.dedupe_key,
                        "Notification sent"
                    );
                } else {
                    tracing::warn!(job_id = %job.id, "Notification claim was lost before the job was marked sent");
                }
                Ok(Delivery::Sent)
            },
            Err((failure, permanent)) => {
                let record = if permanent {
                    BackoffPolicy::give_up(job.attempt_count, failure.error_code.clone())
                } else {
                    self.policy
                        .after_failure(job.attempt_count, failure.error_code.clone(), now)
                };
                let terminal = record.terminal;
                let attempt = record.attempt_count;
                let next_retry_at = record.next_retry_at;
                if !self
                    .queue
                    .record_failure(job.id, &self.config.worker_id, record, now)
                    .await?
                {
                    tracing::warn!(job_id = %job.id, "Notification claim was taken over, failure not recorded");
                    return Ok(Delivery::Retry);
                }

                if terminal {
                    NotificationMetrics::record_failed(job.kind);
                    tracing::error!(
                        job_id = %job.id,
                        dedupe_key = %job.dedupe_key,
                        attempt,
                        error_code = %failure.error_code,
                        "Notification abandoned"
                    );
                    Ok(Delivery::Failed)
                } else {
                    NotificationMetrics::record_retry(elapsed);
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        error_code = %failure.error_code,
                        next_retry_at = ?next_retry_at,
                        "Notification delivery failed, retry scheduled"
                    );
                    Ok(Delivery::Retry)
                }
            },
        }
    }

    /// Purge expired idempotency records and old failed jobs, report queue depth.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let idempotency_purged = self.idempotency.purge_expired(now).await?;
        let failed_jobs_purged = self
            .queue
            .purge_failed_before(before(now, self.config.failed_retention))
            .await?;
        let stats = self.queue.count_by_status().await?;

        NotificationMetrics::record_depth(&stats);
        tracing::info!(
            idempotency_purged,
            failed_jobs_purged,
            queued = stats.queued,
            sent = stats.sent,
            failed = stats.failed,
            "Maintenance sweep complete"
        );

        Ok(SweepReport {
            idempotency_purged,
            failed_jobs_purged,
            stats,
        })
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// Full batches are followed immediately by the next claim; otherwise the
    /// worker sleeps for `poll_interval`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.config.worker_id, "Notification worker started");
        let mut sweep = tokio::time::interval(self.config.sweep_interval);

        while !*shutdown.borrow() {
            let pause = match self.run_once().await {
                Ok(report) if report.claimed >= self.config.batch_size => Duration::ZERO,
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    tracing::error!(error = %e, "Claiming notification jobs failed");
                    self.config.poll_interval
                },
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {},
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Maintenance sweep failed");
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
            }
        }
        tracing::info!(worker_id = %self.config.worker_id, "Notification worker stopped");
    }
}

enum Delivery {
    Sent,
    Retry,
    Failed,
}

fn before(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
