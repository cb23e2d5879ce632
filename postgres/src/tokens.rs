//! Manage tokens.

use crate::{corrupt, storage};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tablebook_core::error::Result;
use tablebook_core::token::{ManageToken, ManageTokenStore};
use tablebook_core::types::ReservationId;

/// `PostgreSQL` implementation of [`ManageTokenStore`].
///
/// Issuance for one reservation is serialised with a transaction-scoped
/// advisory lock so two concurrent issuers agree on a single live token.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ManageTokenStore for PgTokenStore {
    fn insert_or_get(
        &self,
        candidate: ManageToken,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<ManageToken>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage)?;

            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(candidate.reservation_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;

            let live = sqlx::query(
                r"
                SELECT token, reservation_id, purpose, expires_at, used_at, created_at
                FROM manage_tokens
                WHERE reservation_id = $1 AND purpose = $2
                  AND used_at IS NULL AND expires_at > $3
                ORDER BY created_at DESC
                LIMIT 1
                ",
            )
            .bind(*candidate.reservation_id.as_uuid())
            .bind(candidate.purpose.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

            if let Some(row) = live {
                return row_to_token(&row);
            }

            sqlx::query(
                r"
                INSERT INTO manage_tokens (token, reservation_id, purpose, expires_at, used_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(&candidate.token)
            .bind(*candidate.reservation_id.as_uuid())
            .bind(candidate.purpose.as_str())
            .bind(candidate.expires_at)
            .bind(candidate.used_at)
            .bind(candidate.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            tx.commit().await.map_err(storage)?;
            Ok(candidate)
        })
    }

    fn find<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<ManageToken>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT token, reservation_id, purpose, expires_at, used_at, created_at
                FROM manage_tokens
                WHERE token = $1
                ",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
            row.as_ref().map(row_to_token).transpose()
        })
    }

    fn mark_used<'a>(&'a self, token: &'a str, now: DateTime<Utc>) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE manage_tokens SET used_at = $2 WHERE token = $1 AND used_at IS NULL",
            )
            .bind(token)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
            Ok(result.rows_affected() == 1)
        })
    }
}

fn row_to_token(row: &PgRow) -> Result<ManageToken> {
    let purpose: String = row.get("purpose");
    Ok(ManageToken {
        token: row.get("token"),
        reservation_id: ReservationId::from_uuid(row.get("reservation_id")),
        purpose: purpose.parse().map_err(|e| corrupt("purpose", &e))?,
        expires_at: row.get("expires_at"),
        used_at: row.get("used_at"),
        created_at: row.get("created_at"),
    })
}
