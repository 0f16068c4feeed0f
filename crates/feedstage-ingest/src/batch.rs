//! Pending-row batches
//!
//! Both reconciliation phases read with [`PendingRows`] on the pool and write
//! through one transaction per batch. The reader pages by `id`, so rows marked
//! by an earlier batch never shift the window of the next one.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tracing::trace;

use crate::registry::TypeDescriptor;
use crate::schema::StagingRecord;
use crate::sql::{ident_list, quote_ident};

/// Rows per batch when no configuration is given
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// Trims exactly `schema::FLAG_PADDING`, so both phases agree with `parse_deletion_flag`
const DELETION_FLAGGED: &str = "LOWER(BTRIM(COALESCE(isdeleted, ''), E' \\t\\r\\n')) = 'true'";
const NOT_DELETION_FLAGGED: &str =
    "LOWER(BTRIM(COALESCE(isdeleted, ''), E' \\t\\r\\n')) <> 'true'";

/// Which pending rows a reader selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Insert,
    Delete,
}

impl Phase {
    fn predicate(self) -> &'static str {
        match self {
            Phase::Insert => NOT_DELETION_FLAGGED,
            Phase::Delete => DELETION_FLAGGED,
        }
    }
}

/// Marker value for rows processed now
pub fn processed_marker() -> i64 {
    Utc::now().timestamp()
}

/// Keyset-paginated reader of one Source's pending staging rows
pub struct PendingRows<'a> {
    pool: &'a PgPool,
    statement: String,
    source_id: i64,
    batch_size: i64,
    width: usize,
    last_id: i64,
    exhausted: bool,
}

impl<'a> PendingRows<'a> {
    pub fn new(
        pool: &'a PgPool,
        descriptor: &TypeDescriptor,
        phase: Phase,
        source_id: i64,
        batch_size: usize,
    ) -> Self {
        let columns = descriptor.schema.columns();
        let statement = format!(
            "SELECT id, {}, isdeleted FROM {} \
             WHERE source_id = $1 AND processed_at = 0 AND {} AND id > $2 \
             ORDER BY id LIMIT $3",
            ident_list(&columns),
            quote_ident(descriptor.staging_table),
            phase.predicate(),
        );

        Self {
            pool,
            statement,
            source_id,
            batch_size: i64::try_from(batch_size.max(1)).unwrap_or(i64::MAX),
            width: columns.len(),
            last_id: 0,
            exhausted: false,
        }
    }

    /// Next batch in id order; empty once every pending row was returned
    pub async fn next_batch(&mut self) -> Result<Vec<StagingRecord>, sqlx::Error> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&self.statement)
            .bind(self.source_id)
            .bind(self.last_id)
            .bind(self.batch_size)
            .fetch_all(self.pool)
            .await?;

        let records = rows
            .iter()
            .map(|row| StagingRecord::from_row(row, self.width))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(last) = records.last() {
            self.last_id = last.id;
        }
        if (records.len() as i64) < self.batch_size {
            self.exhausted = true;
        }

        trace!(source_id = self.source_id, rows = records.len(), last_id = self.last_id, "Fetched pending batch");
        Ok(records)
    }
}

/// Record a row-level failure: marker, row errors and a CsvError entry
pub async fn mark_failed(
    conn: &mut PgConnection,
    descriptor: &TypeDescriptor,
    source_id: i64,
    record_id: i64,
    errors: &serde_json::Value,
    marker: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "UPDATE {} SET processed_at = $1, errors = $2 WHERE id = $3",
        quote_ident(descriptor.staging_table)
    ))
    .bind(marker)
    .bind(errors)
    .bind(record_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO csv_errors (source_id, record_id, errors) VALUES ($1, $2, $3)")
        .bind(source_id)
        .bind(record_id)
        .bind(errors)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Set the marker of every successfully processed row in one statement
pub async fn mark_processed(
    conn: &mut PgConnection,
    descriptor: &TypeDescriptor,
    ids: &[i64],
    marker: i64,
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(&format!(
        "UPDATE {} SET processed_at = $1 WHERE id = ANY($2)",
        quote_ident(descriptor.staging_table)
    ))
    .bind(marker)
    .bind(ids)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_predicates_partition() {
        assert!(Phase::Insert.predicate().contains("<> 'true'"));
        assert!(Phase::Delete.predicate().contains("= 'true'"));
    }

    #[test]
    fn test_predicates_trim_flag_padding() {
        for phase in [Phase::Insert, Phase::Delete] {
            let predicate = phase.predicate();
            for c in crate::schema::FLAG_PADDING {
                let escaped = c.escape_default().to_string();
                assert!(predicate.contains(&escaped), "{phase:?} does not trim {escaped}");
            }
        }
    }

    #[test]
    fn test_processed_marker_is_nonzero() {
        assert!(processed_marker() > 0);
    }
}
