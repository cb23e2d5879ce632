//! `PostgreSQL` storage for the Tablebook reservation engine.
//!
//! Every storage port from `tablebook-core` has a sqlx-backed implementation
//! here:
//!
//! - [`PgLedger`]: slot catalog and reservation ledger; capacity checks run
//!   under a row lock on the slot
//! - [`PgIdempotencyStore`]: first-writer-wins result cache
//! - [`PgTokenStore`]: manage tokens
//! - [`PgNotificationQueue`]: durable outbox claimed with `FOR UPDATE SKIP LOCKED`
//! - [`PgClientDirectory`] and [`PgGroupInquiryStore`]
//!
//! # Example
//!
//! ```no_run
//! use tablebook_postgres::PgStores;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/tablebook").await?;
//! tablebook_postgres::migrate(&pool).await?;
//! let stores = PgStores::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};
use std::sync::Arc;
use tablebook_core::error::BookingError;

mod clients;
mod idempotency;
mod ledger;
mod notifications;
mod tokens;

pub use clients::{PgClientDirectory, PgGroupInquiryStore};
pub use idempotency::PgIdempotencyStore;
pub use ledger::PgLedger;
pub use notifications::PgNotificationQueue;
pub use tokens::PgTokenStore;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations.
///
/// # Errors
///
/// Returns [`MigrateError`] if a migration fails or the history is inconsistent.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// All adapters over one pool.
#[derive(Clone)]
pub struct PgStores {
    /// Slot catalog and reservation ledger
    pub ledger: Arc<PgLedger>,
    /// Idempotency records
    pub idempotency: Arc<PgIdempotencyStore>,
    /// Manage tokens
    pub tokens: Arc<PgTokenStore>,
    /// Outbox
    pub notifications: Arc<PgNotificationQueue>,
    /// Client directory
    pub clients: Arc<PgClientDirectory>,
    /// Group inquiries
    pub group_inquiries: Arc<PgGroupInquiryStore>,
}

impl PgStores {
    /// Build every adapter on `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(PgLedger::new(pool.clone())),
            idempotency: Arc::new(PgIdempotencyStore::new(pool.clone())),
            tokens: Arc::new(PgTokenStore::new(pool.clone())),
            notifications: Arc::new(PgNotificationQueue::new(pool.clone())),
            clients: Arc::new(PgClientDirectory::new(pool.clone())),
            group_inquiries: Arc::new(PgGroupInquiryStore::new(pool)),
        }
    }
}

#[allow(clippy::needless_pass_by_value)] // Used as `map_err(storage)`
pub(crate) fn storage(error: sqlx::Error) -> BookingError {
    BookingError::Storage(error.to_string())
}

pub(crate) fn to_db_count(value: u32, column: &str) -> Result<i32, BookingError> {
    i32::try_from(value)
        .map_err(|_| BookingError::invalid_input(column, format!("{value} is out of range")))
}

pub(crate) fn from_db_count(value: i32, column: &str) -> Result<u32, BookingError> {
    u32::try_from(value)
        .map_err(|_| BookingError::Storage(format!("negative {column} in database: {value}")))
}

/// Values read back from the database were validated on the way in; a parse
/// failure here means the row was written by something else.
pub(crate) fn corrupt(column: &str, error: &BookingError) -> BookingError {
    BookingError::Storage(format!("invalid {column} in database: {error}"))
}
