//! Client directory and group inquiries.

use crate::{storage, to_db_count};
use futures::future::BoxFuture;
use sqlx::PgPool;
use tablebook_core::collaborators::{
    ClientDirectory, GroupInquiry, GroupInquiryStore, normalize_email, normalize_phone,
};
use tablebook_core::error::Result;
use tablebook_core::types::{ClientId, ContactDetails, GroupInquiryId, RestaurantId};
use uuid::Uuid;

/// Clients keyed by restaurant and normalised phone.
///
/// A repeat guest keeps their id; the latest name wins and a missing email
/// never erases a known one.
#[derive(Clone)]
pub struct PgClientDirectory {
    pool: PgPool,
}

impl PgClientDirectory {
    /// Create a directory over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ClientDirectory for PgClientDirectory {
    fn upsert_by_phone<'a>(
        &'a self,
        restaurant_id: RestaurantId,
        contact: &'a ContactDetails,
    ) -> BoxFuture<'a, Result<ClientId>> {
        Box::pin(async move {
            let (id,): (Uuid,) = sqlx::query_as(
                r"
                INSERT INTO clients (id, restaurant_id, phone, email, first_name, last_name)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (restaurant_id, phone) DO UPDATE
                SET email = COALESCE(EXCLUDED.email, clients.email),
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    updated_at = now()
                RETURNING id
                ",
            )
            .bind(*ClientId::new().as_uuid())
            .bind(*restaurant_id.as_uuid())
            .bind(normalize_phone(&contact.phone))
            .bind(normalize_email(contact.email.as_deref()))
            .bind(contact.first_name.trim())
            .bind(contact.last_name.trim())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

            Ok(ClientId::from_uuid(id))
        })
    }
}

/// Group inquiry log.
#[derive(Clone)]
pub struct PgGroupInquiryStore {
    pool: PgPool,
}

impl PgGroupInquiryStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl GroupInquiryStore for PgGroupInquiryStore {
    fn create(&self, inquiry: GroupInquiry) -> BoxFuture<'_, Result<GroupInquiry>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO group_inquiries (
                    id, restaurant_id, slot_key, party_size, first_name, last_name,
                    email, phone, note, language, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(*inquiry.id.as_uuid())
            .bind(*inquiry.restaurant_id.as_uuid())
            .bind(inquiry.slot_key.to_string())
            .bind(to_db_count(inquiry.party_size, "partySize")?)
            .bind(&inquiry.contact.first_name)
            .bind(&inquiry.contact.last_name)
            .bind(&inquiry.contact.email)
            .bind(&inquiry.contact.phone)
            .bind(&inquiry.note)
            .bind(&inquiry.language)
            .bind(inquiry.created_at)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

            tracing::info!(
                inquiry_id = %inquiry.id,
                slot_key = %inquiry.slot_key,
                party_size = inquiry.party_size,
                "Group inquiry recorded"
            );
            Ok(inquiry)
        })
    }

    fn discard(&self, id: GroupInquiryId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM group_inquiries WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            tracing::info!(inquiry_id = %id, "Duplicate group inquiry discarded");
            Ok(())
        })
    }
}
