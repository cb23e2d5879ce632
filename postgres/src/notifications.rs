//! Notification outbox.

use crate::{corrupt, from_db_count, storage, to_db_count};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tablebook_core::error::{BookingError, Result};
use tablebook_core::notification::{
    ClaimRequest, DedupeKey, EnqueueOutcome, FailureRecord, JobStatus, NewNotification,
    NotificationJob, NotificationQueue, QueueStats,
};
use tablebook_core::types::NotificationJobId;

const JOB_COLUMNS: &str = "id, dedupe_key, kind, payload, status, attempt_count, next_retry_at, \
     last_error, locked_at, locked_by, message_id, created_at, updated_at, sent_at";

/// `PostgreSQL` implementation of [`NotificationQueue`].
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so workers polling at the same time
/// split the due jobs between them instead of queueing on each other's rows.
///
/// # Example
///
/// ```no_run
/// use tablebook_postgres::PgNotificationQueue;
/// use tablebook_core::notification::NotificationQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = PgNotificationQueue::new(pool);
/// let stats = queue.count_by_status().await?;
/// println!("{} queued, {} failed", stats.queued, stats.failed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgNotificationQueue {
    pool: PgPool,
}

impl PgNotificationQueue {
    /// Create a queue over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl NotificationQueue for PgNotificationQueue {
    fn enqueue(
        &self,
        request: NewNotification,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EnqueueOutcome>> {
        Box::pin(async move {
            let job = NotificationJob::queued(request, now);
            let payload = serde_json::to_value(&job.payload)
                .map_err(|e| BookingError::Storage(format!("payload encoding failed: {e}")))?;

            let inserted = sqlx::query(
                r"
                INSERT INTO notification_jobs
                    (id, dedupe_key, kind, payload, status, attempt_count, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, 0, $6, $6)
                ON CONFLICT (dedupe_key) DO NOTHING
                RETURNING id
                ",
            )
            .bind(*job.id.as_uuid())
            .bind(job.dedupe_key.as_str())
            .bind(job.kind.as_str())
            .bind(payload)
            .bind(job.status.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            if inserted.is_some() {
                return Ok(EnqueueOutcome::Created(job));
            }

            let existing = self.find_by_dedupe_key(&job.dedupe_key).await?.ok_or_else(|| {
                BookingError::Storage(format!("job {} vanished after conflict", job.dedupe_key))
            })?;
            Ok(EnqueueOutcome::Existing(existing))
        })
    }

    fn claim_due(&self, request: ClaimRequest) -> BoxFuture<'_, Result<Vec<NotificationJob>>> {
        Box::pin(async move {
            let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
            let sql = format!(
                r"
                UPDATE notification_jobs
                SET locked_at = $1, locked_by = $2, updated_at = $1
                WHERE id IN (
                    SELECT id FROM notification_jobs
                    WHERE status = 'queued'
                      AND (next_retry_at IS NULL OR next_retry_at <= $1)
                      AND (locked_at IS NULL OR locked_at < $3)
                    ORDER BY created_at ASC
                    LIMIT $4
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {JOB_COLUMNS}
                "
            );

            let rows = sqlx::query(&sql)
                .bind(request.now)
                .bind(&request.worker_id)
                .bind(request.stuck_before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

            let mut jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
            jobs.sort_by_key(|job| job.created_at);

            if !jobs.is_empty() {
                tracing::debug!(worker_id = %request.worker_id, claimed = jobs.len(), "Claimed notification jobs");
            }
            Ok(jobs)
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
            let result = sqlx::query(
                r"
                UPDATE notification_jobs
                SET status = 'sent',
                    message_id = $2,
                    sent_at = $3,
                    updated_at = $3,
                    locked_at = NULL,
                    locked_by = NULL
                WHERE id = $1 AND status = 'queued' AND locked_by = $4
                ",
            )
            .bind(*id.as_uuid())
            .bind(message_id)
            .bind(now)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
            Ok(result.rows_affected() == 1)
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
            let status = if failure.terminal {
                JobStatus::Failed
            } else {
                JobStatus::Queued
            };

            let result = sqlx::query(
                r"
                UPDATE notification_jobs
                SET status = $2,
                    attempt_count = $3,
                    last_error = $4,
                    next_retry_at = $5,
                    updated_at = $6,
                    locked_at = NULL,
                    locked_by = NULL
                WHERE id = $1 AND status = 'queued' AND locked_by = $7
                ",
            )
            .bind(*id.as_uuid())
            .bind(status.as_str())
            .bind(to_db_count(failure.attempt_count, "attempt_count")?)
            .bind(&failure.error_code)
            .bind(failure.next_retry_at)
            .bind(now)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn get(&self, id: NotificationJobId) -> BoxFuture<'_, Result<Option<NotificationJob>>> {
        Box::pin(async move {
            let sql = format!("SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = $1");
            let row = sqlx::query(&sql)
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
            row.as_ref().map(row_to_job).transpose()
        })
    }

    fn find_by_dedupe_key<'a>(
        &'a self,
        key: &'a DedupeKey,
    ) -> BoxFuture<'a, Result<Option<NotificationJob>>> {
        Box::pin(async move {
            let sql = format!("SELECT {JOB_COLUMNS} FROM notification_jobs WHERE dedupe_key = $1");
            let row = sqlx::query(&sql)
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
            row.as_ref().map(row_to_job).transpose()
        })
    }

    fn count_by_status(&self) -> BoxFuture<'_, Result<QueueStats>> {
        Box::pin(async move {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT status, COUNT(*) FROM notification_jobs GROUP BY status",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

            let mut stats = QueueStats::default();
            for (status, count) in rows {
                let count = u64::try_from(count).unwrap_or_default();
                match status.parse::<JobStatus>().map_err(|e| corrupt("status", &e))? {
                    JobStatus::Queued => stats.queued = count,
                    JobStatus::Sent => stats.sent = count,
                    JobStatus::Failed => stats.failed = count,
                }
            }
            Ok(stats)
        })
    }

    fn purge_failed_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM notification_jobs WHERE status = 'failed' AND updated_at < $1",
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            let purged = result.rows_affected();
            if purged > 0 {
                tracing::info!(purged, %cutoff, "Purged failed notification jobs");
            }
            Ok(purged)
        })
    }
}

fn row_to_job(row: &PgRow) -> Result<NotificationJob> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let payload = serde_json::from_value(row.get("payload"))
        .map_err(|e| BookingError::Storage(format!("invalid payload in database: {e}")))?;

    Ok(NotificationJob {
        id: NotificationJobId::from_uuid(row.get("id")),
        dedupe_key: DedupeKey::from_raw(row.get::<String, _>("dedupe_key")),
        kind: kind.parse().map_err(|e| corrupt("kind", &e))?,
        payload,
        status: status.parse().map_err(|e| corrupt("status", &e))?,
        attempt_count: from_db_count(row.get("attempt_count"), "attempt_count")?,
        next_retry_at: row.get("next_retry_at"),
        last_error: row.get("last_error"),
        locked_at: row.get("locked_at"),
        locked_by: row.get("locked_by"),
        message_id: row.get("message_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sent_at: row.get("sent_at"),
    })
}
