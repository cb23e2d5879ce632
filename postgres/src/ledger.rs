//! Slot catalog and reservation ledger.
//!
//! Capacity-changing mutations serialise on the slot row: the transaction
//! takes `SELECT ... FOR UPDATE` on `slots`, reads overrides and occupants,
//! runs the pure `plan_*` decision, and writes only if it succeeds. Under
//! `READ COMMITTED` every read after the lock sees the previous holder's
//! committed seats.
//!
//! Lock order is always reservation row first, then slot row, so concurrent
//! updates moving bookings between two slots cannot deadlock.

use crate::{corrupt, from_db_count, storage, to_db_count};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Instant;
use tablebook_core::capacity::{
    Occupancy, OverrideOrigin, SlotAvailability, SlotConfig, SlotOverride,
};
use tablebook_core::error::{BookingError, Result};
use tablebook_core::ledger::{
    NewReservation, ReservationChange, ReservationLedger, SlotCatalog, SlotSnapshot,
    needs_capacity, plan_assign_tables, plan_cancel, plan_create, plan_transition, plan_update,
};
use tablebook_core::tenant::BookingPolicy;
use tablebook_core::types::{
    ClientId, ContactDetails, PartyComposition, Reservation, ReservationId, ReservationStatus,
    RestaurantId, SlotKey, Version,
};

macro_rules! select_reservations {
    ($tail:literal) => {
        concat!(
            "SELECT id, restaurant_id, slot_key, adults, children, babies, status, version, ",
            "client_id, first_name, last_name, email, phone, language, note, source, table_ids, ",
            "created_at, updated_at, cancelled_at, refused_at, seated_at, completed_at, noshow_at ",
            "FROM reservations ",
            $tail
        )
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotRead {
    /// Plain read for queries
    Shared,
    /// Row lock held until the transaction ends
    Exclusive,
}

/// `PostgreSQL` implementation of [`SlotCatalog`] and [`ReservationLedger`].
///
/// # Example
///
/// ```no_run
/// use tablebook_postgres::PgLedger;
/// use tablebook_core::ledger::ReservationLedger;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PgLedger::new(pool);
/// let availability = ledger
///     .slot_availability(tablebook_core::types::RestaurantId::new(), "2025-06-14#dinner#19:30".parse()?)
///     .await?;
/// println!("{} seats left", availability.remaining_capacity);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a ledger over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SlotCatalog for PgLedger {
    fn upsert_slot(
        &self,
        restaurant_id: RestaurantId,
        config: SlotConfig,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let max_group_size = config
                .max_group_size
                .map(|max| to_db_count(max, "maxGroupSize"))
                .transpose()?;

            sqlx::query(
                r"
                INSERT INTO slots (restaurant_id, slot_key, is_open, capacity, max_group_size)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (restaurant_id, slot_key) DO UPDATE
                SET is_open = EXCLUDED.is_open,
                    capacity = EXCLUDED.capacity,
                    max_group_size = EXCLUDED.max_group_size,
                    updated_at = now()
                ",
            )
            .bind(*restaurant_id.as_uuid())
            .bind(config.slot_key.to_string())
            .bind(config.is_open)
            .bind(to_db_count(config.capacity, "capacity")?)
            .bind(max_group_size)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            tracing::debug!(slot_key = %config.slot_key, capacity = config.capacity, "Slot saved");
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
            let origin = over.origin.unwrap_or(OverrideOrigin::Manual);
            let capacity = over
                .capacity
                .map(|c| to_db_count(c, "capacity"))
                .transpose()?;
            let max_group_size = over
                .max_group_size
                .map(|max| to_db_count(max, "maxGroupSize"))
                .transpose()?;

            sqlx::query(
                r"
                INSERT INTO slot_overrides
                    (restaurant_id, slot_key, origin, is_open, capacity, max_group_size)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (restaurant_id, slot_key, origin) DO UPDATE
                SET is_open = EXCLUDED.is_open,
                    capacity = EXCLUDED.capacity,
                    max_group_size = EXCLUDED.max_group_size,
                    updated_at = now()
                ",
            )
            .bind(*restaurant_id.as_uuid())
            .bind(slot_key.to_string())
            .bind(origin.as_str())
            .bind(over.is_open)
            .bind(capacity)
            .bind(max_group_size)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            tracing::debug!(%slot_key, origin = origin.as_str(), "Slot override saved");
            Ok(())
        })
    }

    fn get_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Option<SlotConfig>>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT is_open, capacity, max_group_size
                FROM slots
                WHERE restaurant_id = $1 AND slot_key = $2
                ",
            )
            .bind(*restaurant_id.as_uuid())
            .bind(slot_key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

            row.map(|row| row_to_slot_config(&row, slot_key)).transpose()
        })
    }
}

impl ReservationLedger for PgLedger {
    fn create<'a>(
        &'a self,
        new: NewReservation,
        policy: &'a BookingPolicy,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Reservation>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let slot = read_slot(
                &mut tx,
                new.restaurant_id,
                new.slot_key,
                None,
                SlotRead::Exclusive,
            )
            .await?;
            let reservation = plan_create(new, &slot, policy, now)?;
            save(&mut tx, &reservation).await?;
            tx.commit().await.map_err(storage)?;

            tracing::debug!(
                reservation_id = %reservation.id,
                slot_key = %reservation.slot_key,
                status = reservation.status.as_str(),
                "Reservation inserted"
            );
            Ok(reservation)
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
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let current = lock_reservation(&mut tx, id).await?;
            let slot = read_slot(
                &mut tx,
                current.restaurant_id,
                change.slot_key,
                Some(id),
                SlotRead::Exclusive,
            )
            .await?;
            let next = plan_update(&current, change, &slot, policy, now)?;
            save(&mut tx, &next).await?;
            tx.commit().await.map_err(storage)?;
            Ok(next)
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
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let current = lock_reservation(&mut tx, id).await?;
            let slot = if needs_capacity(current.status, to) {
                Some(
                    read_slot(
                        &mut tx,
                        current.restaurant_id,
                        current.slot_key,
                        Some(id),
                        SlotRead::Exclusive,
                    )
                    .await?,
                )
            } else {
                None
            };
            let next = plan_transition(&current, expected_version, to, slot.as_ref(), now)?;
            save(&mut tx, &next).await?;
            tx.commit().await.map_err(storage)?;
            Ok(next)
        })
    }

    fn cancel(
        &self,
        id: ReservationId,
        expected_version: Option<Version>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reservation>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let current = lock_reservation(&mut tx, id).await?;
            let next = plan_cancel(&current, expected_version, now)?;
            save(&mut tx, &next).await?;
            tx.commit().await.map_err(storage)?;
            Ok(next)
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
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let current = lock_reservation(&mut tx, id).await?;
            let next = plan_assign_tables(&current, expected_version, table_ids, now)?;
            save(&mut tx, &next).await?;
            tx.commit().await.map_err(storage)?;
            Ok(next)
        })
    }

    fn get(&self, id: ReservationId) -> BoxFuture<'_, Result<Option<Reservation>>> {
        Box::pin(async move {
            let row = sqlx::query(select_reservations!("WHERE id = $1"))
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
            row.as_ref().map(row_to_reservation).transpose()
        })
    }

    fn slot_availability(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<SlotAvailability>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(storage)?;
            let slot = read_slot(&mut conn, restaurant_id, slot_key, None, SlotRead::Shared).await?;
            Ok(slot.availability())
        })
    }

    fn list_for_slot(
        &self,
        restaurant_id: RestaurantId,
        slot_key: SlotKey,
    ) -> BoxFuture<'_, Result<Vec<Reservation>>> {
        Box::pin(async move {
            let rows = sqlx::query(select_reservations!(
                "WHERE restaurant_id = $1 AND slot_key = $2 ORDER BY created_at ASC, id ASC"
            ))
            .bind(*restaurant_id.as_uuid())
            .bind(slot_key.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
            rows.iter().map(row_to_reservation).collect()
        })
    }
}

async fn read_slot(
    conn: &mut PgConnection,
    restaurant_id: RestaurantId,
    slot_key: SlotKey,
    exclude: Option<ReservationId>,
    mode: SlotRead,
) -> Result<SlotSnapshot> {
    let sql = match mode {
        SlotRead::Shared => {
            "SELECT is_open, capacity, max_group_size FROM slots \
             WHERE restaurant_id = $1 AND slot_key = $2"
        },
        SlotRead::Exclusive => {
            "SELECT is_open, capacity, max_group_size FROM slots \
             WHERE restaurant_id = $1 AND slot_key = $2 FOR UPDATE"
        },
    };

    let started = Instant::now();
    let row = sqlx::query(sql)
        .bind(*restaurant_id.as_uuid())
        .bind(slot_key.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| BookingError::not_found("slot", slot_key))?;
    if mode == SlotRead::Exclusive {
        metrics::histogram!("ledger_slot_lock_wait_seconds").record(started.elapsed().as_secs_f64());
    }
    let config = row_to_slot_config(&row, slot_key)?;

    let override_rows = sqlx::query(
        r"
        SELECT origin, is_open, capacity, max_group_size
        FROM slot_overrides
        WHERE restaurant_id = $1 AND slot_key = $2
        ",
    )
    .bind(*restaurant_id.as_uuid())
    .bind(slot_key.to_string())
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;
    let overrides = override_rows
        .iter()
        .map(row_to_override)
        .collect::<Result<Vec<_>>>()?;

    let occupant_rows = sqlx::query(
        r"
        SELECT status, adults, children, babies
        FROM reservations
        WHERE restaurant_id = $1 AND slot_key = $2 AND ($3::uuid IS NULL OR id <> $3)
        ",
    )
    .bind(*restaurant_id.as_uuid())
    .bind(slot_key.to_string())
    .bind(exclude.map(|id| *id.as_uuid()))
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;
    let occupants = occupant_rows
        .iter()
        .map(|row| {
            let status: String = row.get("status");
            Ok(Occupancy {
                status: status.parse().map_err(|e| corrupt("status", &e))?,
                party_size: row_to_party(row)?.size(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SlotSnapshot {
        config,
        overrides,
        occupants,
    })
}

async fn lock_reservation(conn: &mut PgConnection, id: ReservationId) -> Result<Reservation> {
    let row = sqlx::query(select_reservations!("WHERE id = $1 FOR UPDATE"))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| BookingError::not_found("reservation", id))?;
    row_to_reservation(&row)
}

async fn save(conn: &mut PgConnection, reservation: &Reservation) -> Result<()> {
    let version = i64::try_from(reservation.version.value())
        .map_err(|_| BookingError::Storage(format!("version {} overflows", reservation.version)))?;

    sqlx::query(
        r"
        INSERT INTO reservations (
            id, restaurant_id, slot_key, adults, children, babies, status, version,
            client_id, first_name, last_name, email, phone, language, note, source, table_ids,
            created_at, updated_at, cancelled_at, refused_at, seated_at, completed_at, noshow_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
        )
        ON CONFLICT (id) DO UPDATE
        SET slot_key = EXCLUDED.slot_key,
            adults = EXCLUDED.adults,
            children = EXCLUDED.children,
            babies = EXCLUDED.babies,
            status = EXCLUDED.status,
            version = EXCLUDED.version,
            language = EXCLUDED.language,
            note = EXCLUDED.note,
            table_ids = EXCLUDED.table_ids,
            updated_at = EXCLUDED.updated_at,
            cancelled_at = EXCLUDED.cancelled_at,
            refused_at = EXCLUDED.refused_at,
            seated_at = EXCLUDED.seated_at,
            completed_at = EXCLUDED.completed_at,
            noshow_at = EXCLUDED.noshow_at
        ",
    )
    .bind(*reservation.id.as_uuid())
    .bind(*reservation.restaurant_id.as_uuid())
    .bind(reservation.slot_key.to_string())
    .bind(to_db_count(reservation.party.adults, "adults")?)
    .bind(to_db_count(reservation.party.children, "children")?)
    .bind(to_db_count(reservation.party.babies, "babies")?)
    .bind(reservation.status.as_str())
    .bind(version)
    .bind(*reservation.client_id.as_uuid())
    .bind(&reservation.contact.first_name)
    .bind(&reservation.contact.last_name)
    .bind(&reservation.contact.email)
    .bind(&reservation.contact.phone)
    .bind(&reservation.language)
    .bind(&reservation.note)
    .bind(reservation.source.as_str())
    .bind(&reservation.table_ids)
    .bind(reservation.created_at)
    .bind(reservation.updated_at)
    .bind(reservation.cancelled_at)
    .bind(reservation.refused_at)
    .bind(reservation.seated_at)
    .bind(reservation.completed_at)
    .bind(reservation.noshow_at)
    .execute(&mut *conn)
    .await
    .map_err(storage)?;

    Ok(())
}

fn row_to_slot_config(row: &PgRow, slot_key: SlotKey) -> Result<SlotConfig> {
    let max_group_size: Option<i32> = row.get("max_group_size");
    Ok(SlotConfig {
        slot_key,
        is_open: row.get("is_open"),
        capacity: from_db_count(row.get("capacity"), "capacity")?,
        max_group_size: max_group_size
            .map(|max| from_db_count(max, "max_group_size"))
            .transpose()?,
    })
}

fn row_to_override(row: &PgRow) -> Result<SlotOverride> {
    let origin: String = row.get("origin");
    let origin = match origin.as_str() {
        "manual" => OverrideOrigin::Manual,
        "period" => OverrideOrigin::Period,
        other => {
            return Err(BookingError::Storage(format!(
                "invalid override origin in database: {other}"
            )));
        },
    };
    let capacity: Option<i32> = row.get("capacity");
    let max_group_size: Option<i32> = row.get("max_group_size");

    Ok(SlotOverride {
        origin: Some(origin),
        is_open: row.get("is_open"),
        capacity: capacity.map(|c| from_db_count(c, "capacity")).transpose()?,
        max_group_size: max_group_size
            .map(|max| from_db_count(max, "max_group_size"))
            .transpose()?,
    })
}

fn row_to_party(row: &PgRow) -> Result<PartyComposition> {
    Ok(PartyComposition {
        adults: from_db_count(row.get("adults"), "adults")?,
        children: from_db_count(row.get("children"), "children")?,
        babies: from_db_count(row.get("babies"), "babies")?,
    })
}

fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
    let slot_key: String = row.get("slot_key");
    let status: String = row.get("status");
    let source: String = row.get("source");
    let version: i64 = row.get("version");
    let version = u64::try_from(version)
        .map_err(|_| BookingError::Storage(format!("negative version in database: {version}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.get("id")),
        restaurant_id: RestaurantId::from_uuid(row.get("restaurant_id")),
        slot_key: slot_key.parse().map_err(|e| corrupt("slot_key", &e))?,
        party: row_to_party(row)?,
        status: status.parse().map_err(|e| corrupt("status", &e))?,
        version: Version::new(version),
        client_id: ClientId::from_uuid(row.get("client_id")),
        contact: ContactDetails {
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            phone: row.get("phone"),
        },
        language: row.get("language"),
        note: row.get("note"),
        source: source.parse().map_err(|e| corrupt("source", &e))?,
        table_ids: row.get("table_ids"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        cancelled_at: row.get("cancelled_at"),
        refused_at: row.get("refused_at"),
        seated_at: row.get("seated_at"),
        completed_at: row.get("completed_at"),
        noshow_at: row.get("noshow_at"),
    })
}
