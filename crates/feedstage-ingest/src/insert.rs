//! Batch validator and inserter
//!
//! Validates pending insert candidates and upserts the valid ones into the
//! authoritative table. Row failures are recorded and skipped; a database
//! failure aborts the run, keeping every batch committed before it.

use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::batch::{mark_failed, mark_processed, processed_marker, Phase, PendingRows};
use crate::error::ImportResult;
use crate::registry::TypeDescriptor;
use crate::schema::{StagingRecord, ValidRecord};
use crate::sql::{ident_list, push_value, quote_ident};

/// Counters of one insert phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertStats {
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub batches_committed: u64,
}

#[instrument(skip(pool, descriptor), fields(record_type = %descriptor.record_type))]
pub async fn process_inserts(
    pool: &PgPool,
    descriptor: &TypeDescriptor,
    source_id: i64,
    batch_size: usize,
) -> ImportResult<InsertStats> {
    let mut stats = InsertStats::default();
    let mut pending = PendingRows::new(pool, descriptor, Phase::Insert, source_id, batch_size);

    loop {
        let batch = pending.next_batch().await?;
        if batch.is_empty() {
            break;
        }

        let mut tx = pool.begin().await?;
        let outcome = insert_batch(&mut *tx, descriptor, source_id, &batch).await?;
        tx.commit().await?;

        stats.rows_read += batch.len() as u64;
        stats.rows_inserted += outcome.inserted;
        stats.rows_failed += outcome.failed;
        stats.batches_committed += 1;

        debug!(
            source_id,
            batch = stats.batches_committed,
            rows = batch.len(),
            inserted = outcome.inserted,
            failed = outcome.failed,
            "Committed insert batch"
        );
    }

    info!(
        source_id,
        rows_read = stats.rows_read,
        rows_inserted = stats.rows_inserted,
        rows_failed = stats.rows_failed,
        batches = stats.batches_committed,
        "Insert phase complete"
    );
    Ok(stats)
}

#[derive(Debug, Default)]
struct BatchOutcome {
    inserted: u64,
    failed: u64,
}

async fn insert_batch(
    conn: &mut PgConnection,
    descriptor: &TypeDescriptor,
    source_id: i64,
    batch: &[StagingRecord],
) -> ImportResult<BatchOutcome> {
    let marker = processed_marker();
    let mut outcome = BatchOutcome::default();
    let mut valid = Vec::with_capacity(batch.len());
    let mut succeeded = Vec::with_capacity(batch.len());

    for record in batch {
        match descriptor.schema.validate(record) {
            Ok(row) => {
                valid.push(row);
                succeeded.push(record.id);
            },
            Err(errors) => {
                mark_failed(conn, descriptor, source_id, record.id, &errors.to_json()?, marker).await?;
                outcome.failed += 1;
            },
        }
    }

    upsert(conn, descriptor, dedupe_by_key(valid, descriptor.key_index())).await?;
    mark_processed(conn, descriptor, &succeeded, marker).await?;

    outcome.inserted = succeeded.len() as u64;
    Ok(outcome)
}

/// Keep the last row for every key so one statement never touches a key twice
fn dedupe_by_key(rows: Vec<ValidRecord>, key_index: usize) -> Vec<ValidRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<ValidRecord> = Vec::with_capacity(rows.len());

    for row in rows {
        let key = row.values.get(key_index).map(ToString::to_string).unwrap_or_default();
        match positions.get(&key) {
            Some(&at) => unique[at] = row,
            None => {
                positions.insert(key, unique.len());
                unique.push(row);
            },
        }
    }
    unique
}

/// Multi-row `INSERT ... ON CONFLICT (key) DO UPDATE`
async fn upsert(
    conn: &mut PgConnection,
    descriptor: &TypeDescriptor,
    rows: Vec<ValidRecord>,
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let columns = descriptor.schema.columns();
    let key = descriptor.key_field().column();

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(descriptor.table),
        ident_list(&columns)
    ));

    builder.push_values(rows.iter(), |mut b, row| {
        for value in &row.values {
            push_value(&mut b, value);
        }
    });

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| **c != key)
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();
    builder.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        quote_ident(&key),
        updates.join(", ")
    ));

    builder.build().execute(conn).await?;
    Ok(())
}
