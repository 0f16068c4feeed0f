//! Error types for the import pipeline
//!
//! Only run-level failures are errors here. Row validation failures and
//! reconciliation misses are recorded as `CsvError` rows and never abort a run.

use thiserror::Error;

/// Result alias for pipeline operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Failures while bulk-loading a CSV stream into staging
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("CSV stream is empty: no header line")]
    MissingHeader,

    #[error("Unknown column '{column}' for {record_type} feeds")]
    UnknownColumn { record_type: String, column: String },

    #[error("Invalid CSV dialect: {0}")]
    InvalidDialect(String),

    #[error("Malformed CSV header: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read CSV stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bulk copy into staging failed: {0}")]
    Copy(#[from] sqlx::Error),
}

/// Run-level pipeline error
#[derive(Error, Debug)]
pub enum ImportError {
    /// Staging failed; the Source exists and carries a SourceError
    #[error("Ingestion failed for source {source_id}: {source}")]
    Ingestion {
        source_id: i64,
        #[source]
        source: IngestionError,
    },

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Unknown record type '{0}'")]
    UnknownType(String),

    #[error("Source {0} not found")]
    SourceNotFound(i64),

    #[error("Source {0} failed during ingestion and cannot be resumed")]
    SourceFailed(i64),

    #[error("Failed to serialize error payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
