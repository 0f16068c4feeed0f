//! Export CSV errors query
//!
//! Builds the `<basename>_errors.csv` attachment for one source: every staged
//! column of each rejected row, followed by the error payload as JSON text.

use feedstage_ingest::sql::quote_ident;
use feedstage_ingest::RecordType;
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::path::Path;

/// Query to export the CSV errors of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportCsvErrorsQuery {
    pub source_id: i64,
}

/// Rendered attachment
#[derive(Debug, Clone)]
pub struct CsvErrorExport {
    pub filename: String,
    pub rows: usize,
    pub body: Vec<u8>,
}

/// Error type for export query
#[derive(Debug, thiserror::Error)]
pub enum ExportCsvErrorsError {
    #[error("Source {0} not found")]
    SourceNotFound(i64),

    #[error("Source {source_id} has unsupported type '{record_type}'")]
    UnsupportedType { source_id: i64, record_type: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to finish CSV: {0}")]
    Io(#[from] std::io::Error),
}

impl Request<Result<CsvErrorExport, ExportCsvErrorsError>> for ExportCsvErrorsQuery {}

/// Attachment name derived from the source's original filename
pub fn export_filename(source_id: i64, filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("source_{source_id}"));
    format!("{stem}_errors.csv")
}

pub async fn handle(
    pool: PgPool,
    query: ExportCsvErrorsQuery,
) -> Result<CsvErrorExport, ExportCsvErrorsError> {
    let source: Option<(String, String)> =
        sqlx::query_as("SELECT type, filename FROM sources WHERE id = $1")
            .bind(query.source_id)
            .fetch_optional(&pool)
            .await?;
    let (tag, filename) = source.ok_or(ExportCsvErrorsError::SourceNotFound(query.source_id))?;

    let record_type: RecordType = tag.parse().map_err(|_| ExportCsvErrorsError::UnsupportedType {
        source_id: query.source_id,
        record_type: tag.clone(),
    })?;
    let descriptor = record_type.descriptor();
    let columns = descriptor.staging_columns();

    let select_list: Vec<String> = columns.iter().map(|c| format!("t.{}", quote_ident(c))).collect();
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}, e.errors::text AS errors
        FROM {} t
        JOIN csv_errors e ON t.id = e.record_id
        WHERE e.source_id = $1
        ORDER BY e.id
        "#,
        select_list.join(", "),
        quote_ident(descriptor.staging_table),
    ))
    .bind(query.source_id)
    .fetch_all(&pool)
    .await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = columns.clone();
    header.push("errors".to_string());
    writer.write_record(&header)?;

    for row in &rows {
        let mut record = Vec::with_capacity(header.len());
        for i in 0..header.len() {
            let value: Option<String> = row.try_get(i)?;
            record.push(value.unwrap_or_default());
        }
        writer.write_record(&record)?;
    }

    let body = writer.into_inner().map_err(|e| e.into_error())?;

    tracing::debug!(source_id = query.source_id, rows = rows.len(), "Exported CSV errors");

    Ok(CsvErrorExport {
        filename: export_filename(query.source_id, &filename),
        rows: rows.len(),
        body,
    })
}
