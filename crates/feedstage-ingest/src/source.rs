//! Source tracking
//!
//! A `Source` is the provenance record of one ingestion run. It is written
//! before any CSV byte is read and committed on its own, so it survives every
//! later failure.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};

use crate::registry::RecordType;

/// Audit metadata supplied with a feed
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub filename: String,
    pub submitted_by: String,
    /// Defaults to today (UTC)
    pub submitted_date: Option<NaiveDate>,
    pub number_of_records: i64,
}

impl SourceMetadata {
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }
}

/// Provenance record of one ingestion run
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Source {
    pub id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub record_type: String,
    pub filename: String,
    pub submitted_by: String,
    pub submitted_date: NaiveDate,
    pub number_of_records: i64,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Create the Source row for a new run and commit it
pub async fn begin_source(
    pool: &PgPool,
    record_type: RecordType,
    metadata: &SourceMetadata,
) -> Result<i64, sqlx::Error> {
    let submitted_date = metadata
        .submitted_date
        .unwrap_or_else(|| Utc::now().date_naive());

    let source_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sources (type, filename, submitted_by, submitted_date, number_of_records)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(record_type.tag())
    .bind(&metadata.filename)
    .bind(&metadata.submitted_by)
    .bind(submitted_date)
    .bind(metadata.number_of_records)
    .fetch_one(pool)
    .await?;

    debug!(source_id, record_type = %record_type, filename = %metadata.filename, "Created source");
    Ok(source_id)
}

/// Record the run-level failure of a Source; at most one is kept
pub async fn record_source_error(
    pool: &PgPool,
    source_id: i64,
    message: &str,
) -> Result<(), sqlx::Error> {
    warn!(source_id, error = message, "Recording source error");

    sqlx::query(
        r#"
        INSERT INTO source_errors (source_id, errors)
        VALUES ($1, $2)
        ON CONFLICT (source_id) DO NOTHING
        "#,
    )
    .bind(source_id)
    .bind(serde_json::json!({ "message": message }))
    .execute(pool)
    .await?;

    Ok(())
}

/// Stamp the start of reconciliation; a resumed run keeps the first stamp
pub async fn mark_processing_started(pool: &PgPool, source_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sources SET processed_at = COALESCE(processed_at, NOW()) WHERE id = $1")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_source(pool: &PgPool, source_id: i64) -> Result<Option<Source>, sqlx::Error> {
    sqlx::query_as::<_, Source>(
        r#"
        SELECT id, type, filename, submitted_by, submitted_date,
               number_of_records, processed_at, created_at
        FROM sources
        WHERE id = $1
        "#,
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await
}

pub async fn has_source_error(pool: &PgPool, source_id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM source_errors WHERE source_id = $1)")
        .bind(source_id)
        .fetch_one(pool)
        .await
}
