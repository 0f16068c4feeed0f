//! Per-type run lock
//!
//! Runs of the same record type are serialised with a session-level Postgres
//! advisory lock held on a dedicated connection. A second run blocks in
//! [`TypeLock::acquire`] until the first releases, so runs queue rather than
//! fail. The connection is closed instead of returned to the pool when the
//! guard drops, which releases the lock even on error paths.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::{debug, info};

use crate::registry::RecordType;

/// First half of every advisory lock key taken by the importer
pub const LOCK_NAMESPACE: i32 = 0x4653_5447;

/// Held advisory lock for one record type
pub struct TypeLock {
    conn: PoolConnection<Postgres>,
    record_type: RecordType,
}

impl TypeLock {
    /// Block until the lock for `record_type` is held
    pub async fn acquire(pool: &PgPool, record_type: RecordType) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        conn.close_on_drop();

        debug!(record_type = %record_type, "Waiting for type lock");
        sqlx::query("SELECT pg_advisory_lock($1, $2)")
            .bind(LOCK_NAMESPACE)
            .bind(record_type.lock_key())
            .execute(&mut *conn)
            .await?;

        info!(record_type = %record_type, "Acquired type lock");
        Ok(Self { conn, record_type })
    }

    /// Take the lock only if no other run holds it
    pub async fn try_acquire(
        pool: &PgPool,
        record_type: RecordType,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        conn.close_on_drop();

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
            .bind(LOCK_NAMESPACE)
            .bind(record_type.lock_key())
            .fetch_one(&mut *conn)
            .await?;

        Ok(acquired.then_some(Self { conn, record_type }))
    }

    /// Release the lock explicitly; dropping the guard also releases it
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_unlock($1, $2)")
            .bind(LOCK_NAMESPACE)
            .bind(self.record_type.lock_key())
            .execute(&mut *self.conn)
            .await?;

        debug!(record_type = %self.record_type, "Released type lock");
        Ok(())
    }
}
