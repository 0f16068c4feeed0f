//! Reconciliation deleter
//!
//! Removes authoritative records named by deletion-flagged staging rows. A
//! row whose key matches nothing is a reconciliation miss: recorded against
//! the row, never fatal.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};

use crate::batch::{mark_failed, mark_processed, processed_marker, Phase, PendingRows};
use crate::error::ImportResult;
use crate::registry::TypeDescriptor;
use crate::schema::StagingRecord;
use crate::sql::{bind_value, quote_ident};

/// Counters of one delete phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteStats {
    pub rows_read: u64,
    pub rows_deleted: u64,
    pub rows_missing: u64,
    pub batches_committed: u64,
}

#[instrument(skip(pool, descriptor), fields(record_type = %descriptor.record_type))]
pub async fn process_deletes(
    pool: &PgPool,
    descriptor: &TypeDescriptor,
    source_id: i64,
    batch_size: usize,
) -> ImportResult<DeleteStats> {
    let mut stats = DeleteStats::default();
    let mut pending = PendingRows::new(pool, descriptor, Phase::Delete, source_id, batch_size);
    let statement = format!(
        "DELETE FROM {} WHERE {} = $1",
        quote_ident(descriptor.table),
        quote_ident(&descriptor.key_field().column())
    );

    loop {
        let batch = pending.next_batch().await?;
        if batch.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let deleted = delete_batch(&mut *tx, descriptor, &statement, source_id, &batch).await?;
        tx.commit().await?;

        let missing = batch.len() as u64 - deleted;
        stats.rows_read += batch.len() as u64;
        stats.rows_deleted += deleted;
        stats.rows_missing += missing;
        stats.batches_committed += 1;

        debug!(
            source_id,
            batch = stats.batches_committed,
            rows = batch.len(),
            deleted,
            missing,
            "Committed delete batch"
        );
    }

    info!(
        source_id,
        rows_read = stats.rows_read,
        rows_deleted = stats.rows_deleted,
        rows_missing = stats.rows_missing,
        batches = stats.batches_committed,
        "Delete phase complete"
    );
    Ok(stats)
}

/// Error payload of a deletion that matched nothing
pub fn missing_key_payload(descriptor: &TypeDescriptor) -> serde_json::Value {
    serde_json::json!({ "message": format!("{} does not exist", descriptor.key_field().name) })
}

async fn delete_batch(
    conn: &mut PgConnection,
    descriptor: &TypeDescriptor,
    statement: &str,
    source_id: i64,
    batch: &[StagingRecord],
) -> ImportResult<u64> {
    let marker = processed_marker();
    let key_field = descriptor.key_field();
    let mut deleted = Vec::with_capacity(batch.len());

    for record in batch {
        let key = match key_field.coerce(record.value(descriptor.key_index())) {
            Ok(key) => key,
            Err(e) => {
                let payload = serde_json::json!({
                    "message": format!("{}: {}", e.field, e.message),
                });
                mark_failed(conn, descriptor, source_id, record.id, &payload, marker).await?;
                continue;
            },
        };

        let result = bind_value(sqlx::query(statement), key).execute(&mut *conn).await?;
        if result.rows_affected() > 0 {
            deleted.push(record.id);
        } else {
            mark_failed(conn, descriptor, source_id, record.id, &missing_key_payload(descriptor), marker)
                .await?;
        }
    }

    mark_processed(conn, descriptor, &deleted, marker).await?;
    Ok(deleted.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RecordType;

    #[test]
    fn test_missing_key_payload_names_key_field() {
        assert_eq!(
            missing_key_payload(RecordType::Area.descriptor()),
            serde_json::json!({ "message": "ExternalIdentifier does not exist" })
        );
        assert_eq!(
            missing_key_payload(RecordType::Strain.descriptor()),
            serde_json::json!({ "message": "StrainId does not exist" })
        );
    }
}
