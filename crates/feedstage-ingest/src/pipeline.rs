//! Pipeline orchestrator
//!
//! Sequences one run: type lock, staging, processing stamp, insert phase,
//! delete phase, unlock. The phases always run in that order and every await
//! happens in program order; throughput comes from COPY and multi-row upserts.

use serde::Serialize;
use sqlx::PgPool;
use tokio::io::AsyncRead;
use tracing::{info, instrument};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::delete::{process_deletes, DeleteStats};
use crate::error::{ImportError, ImportResult};
use crate::insert::{process_inserts, InsertStats};
use crate::lock::TypeLock;
use crate::registry::RecordType;
use crate::source::{get_source, has_source_error, mark_processing_started, SourceMetadata};
use crate::staging::{stage, Dialect};

/// Per-run options
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub metadata: SourceMetadata,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            metadata: SourceMetadata::default(),
        }
    }
}

impl ImportOptions {
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            metadata: SourceMetadata::for_file(filename),
            ..Default::default()
        }
    }

    fn dialect(&self) -> Dialect {
        Dialect { delimiter: self.delimiter, quote: self.quote }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub source_id: i64,
    /// Rows copied into staging; zero for a resumed run
    pub rows_staged: u64,
    pub inserts: InsertStats,
    pub deletes: DeleteStats,
}

/// Entry point for importing feeds
#[derive(Debug, Clone)]
pub struct Pipeline {
    pool: PgPool,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stage a feed and reconcile it into the authoritative table
    ///
    /// Row-level validation failures and reconciliation misses are reported
    /// through the stats, not as errors.
    #[instrument(skip(self, reader, options), fields(record_type = %record_type))]
    pub async fn run<R>(
        &self,
        record_type: RecordType,
        reader: R,
        options: &ImportOptions,
    ) -> ImportResult<RunReport>
    where
        R: AsyncRead + Unpin,
    {
        let lock = TypeLock::acquire(&self.pool, record_type).await?;

        let result = async {
            let staged =
                stage(&self.pool, record_type, reader, options.dialect(), &options.metadata).await?;
            self.reconcile(record_type, staged.source_id, staged.rows_loaded).await
        }
        .await;

        let released = lock.release().await;
        let report = result?;
        released?;

        info!(
            source_id = report.source_id,
            rows_staged = report.rows_staged,
            inserted = report.inserts.rows_inserted,
            failed = report.inserts.rows_failed,
            deleted = report.deletes.rows_deleted,
            missing = report.deletes.rows_missing,
            "Import complete"
        );
        Ok(report)
    }

    /// Process the rows of an existing Source that are still pending
    ///
    /// Used after a crash between batches. Sources whose ingestion failed have
    /// nothing staged and are refused.
    #[instrument(skip(self))]
    pub async fn resume(&self, source_id: i64) -> ImportResult<RunReport> {
        let source = get_source(&self.pool, source_id)
            .await?
            .ok_or(ImportError::SourceNotFound(source_id))?;

        if has_source_error(&self.pool, source_id).await? {
            return Err(ImportError::SourceFailed(source_id));
        }

        let record_type: RecordType = source.record_type.parse()?;
        let lock = TypeLock::acquire(&self.pool, record_type).await?;

        let result = self.reconcile(record_type, source_id, 0).await;

        let released = lock.release().await;
        let report = result?;
        released?;

        info!(
            source_id,
            inserted = report.inserts.rows_inserted,
            failed = report.inserts.rows_failed,
            deleted = report.deletes.rows_deleted,
            missing = report.deletes.rows_missing,
            "Resume complete"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        record_type: RecordType,
        source_id: i64,
        rows_staged: u64,
    ) -> ImportResult<RunReport> {
        let descriptor = record_type.descriptor();

        mark_processing_started(&self.pool, source_id).await?;
        let inserts = process_inserts(&self.pool, descriptor, source_id, self.batch_size).await?;
        let deletes = process_deletes(&self.pool, descriptor, source_id, self.batch_size).await?;

        Ok(RunReport {
            source_id,
            rows_staged,
            inserts,
            deletes,
        })
    }
}
