//! Idempotency records.

use crate::storage;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};
use tablebook_core::error::Result;
use tablebook_core::idempotency::{
    IdempotencyCheck, IdempotencyRecord, IdempotencyStore, RequestHash, StoreOutcome,
};

/// `PostgreSQL` implementation of [`IdempotencyStore`].
///
/// `store` is a single `INSERT ... ON CONFLICT DO UPDATE ... WHERE expired`
/// statement: a concurrent writer blocks on the conflicting row, re-checks the
/// condition against the committed winner and inserts nothing, then reads the
/// winner's result back.
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl IdempotencyStore for PgIdempotencyStore {
    fn check<'a>(
        &'a self,
        key: &'a str,
        request_hash: &'a RequestHash,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<IdempotencyCheck>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT request_hash, result_data, created_at, expires_at
                FROM idempotency_records
                WHERE key = $1
                ",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            Ok(row.map_or(IdempotencyCheck::NotFound, |row| {
                let record = IdempotencyRecord {
                    key: key.to_string(),
                    request_hash: RequestHash::from_hex(row.get::<String, _>("request_hash")),
                    result_data: row.get("result_data"),
                    created_at: row.get("created_at"),
                    expires_at: row.get("expires_at"),
                };
                record.check(request_hash, now)
            }))
        })
    }

    fn store(&self, record: IdempotencyRecord) -> BoxFuture<'_, Result<StoreOutcome>> {
        Box::pin(async move {
            let inserted = sqlx::query(
                r"
                INSERT INTO idempotency_records (key, request_hash, result_data, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (key) DO UPDATE
                SET request_hash = EXCLUDED.request_hash,
                    result_data = EXCLUDED.result_data,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_records.expires_at <= EXCLUDED.created_at
                RETURNING key
                ",
            )
            .bind(&record.key)
            .bind(record.request_hash.as_str())
            .bind(&record.result_data)
            .bind(record.created_at)
            .bind(record.expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            if inserted.is_some() {
                return Ok(StoreOutcome::Stored);
            }

            let (request_hash, result_data): (String, serde_json::Value) = sqlx::query_as(
                "SELECT request_hash, result_data FROM idempotency_records WHERE key = $1",
            )
            .bind(&record.key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

            tracing::debug!(key = %record.key, "Idempotency key already stored by another writer");
            Ok(StoreOutcome::AlreadyStored {
                request_hash: RequestHash::from_hex(request_hash),
                result_data,
            })
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            Ok(result.rows_affected())
        })
    }
}
