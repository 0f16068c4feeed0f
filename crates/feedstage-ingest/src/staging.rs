//! Staging loader
//!
//! Streams a raw CSV feed into the record type's staging table with a single
//! `COPY ... FROM STDIN`, then stamps the new rows with their Source and the
//! pending marker. Either every row of the feed is staged or none is.

use sqlx::{PgConnection, PgPool};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ImportError, ImportResult, IngestionError};
use crate::registry::{RecordType, TypeDescriptor};
use crate::source::{begin_source, record_source_error, SourceMetadata};
use crate::sql::{ident_list, quote_char_literal, quote_ident};

const UTF8_BOM: &str = "\u{feff}";

/// Single-byte CSV dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for Dialect {
    fn default() -> Self {
        Self { delimiter: b',', quote: b'"' }
    }
}

impl Dialect {
    pub fn validate(&self) -> Result<(), IngestionError> {
        for (name, byte) in [("delimiter", self.delimiter), ("quote", self.quote)] {
            if !byte.is_ascii() || byte == b'\n' || byte == b'\r' {
                return Err(IngestionError::InvalidDialect(format!(
                    "{name} must be a single ASCII character other than a line break"
                )));
            }
        }
        if self.delimiter == self.quote {
            return Err(IngestionError::InvalidDialect(
                "delimiter and quote must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Read a header line into lower-cased column names
    pub fn parse_header(&self, line: &[u8]) -> Result<Vec<String>, IngestionError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .from_reader(line);

        let record = match reader.records().next() {
            Some(record) => record?,
            None => return Err(IngestionError::MissingHeader),
        };

        let columns: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = if i == 0 { name.trim_start_matches(UTF8_BOM) } else { name };
                name.trim().to_lowercase()
            })
            .collect();

        if columns.iter().all(String::is_empty) {
            return Err(IngestionError::MissingHeader);
        }
        Ok(columns)
    }

    fn copy_statement(&self, table: &str, columns: &[String]) -> String {
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER {}, QUOTE {})",
            quote_ident(table),
            ident_list(columns),
            quote_char_literal(char::from(self.delimiter)),
            quote_char_literal(char::from(self.quote)),
        )
    }
}

/// Outcome of a successful staging load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedSource {
    pub source_id: i64,
    pub rows_loaded: u64,
}

/// Create the Source and stage the feed under it
///
/// On any failure after the Source exists, the staging transaction is rolled
/// back and a SourceError is recorded before the error is returned.
#[instrument(skip_all, fields(record_type = %record_type, filename = %metadata.filename))]
pub async fn stage<R>(
    pool: &PgPool,
    record_type: RecordType,
    reader: R,
    dialect: Dialect,
    metadata: &SourceMetadata,
) -> ImportResult<StagedSource>
where
    R: AsyncRead + Unpin,
{
    let source_id = begin_source(pool, record_type, metadata).await?;

    match load(pool, record_type.descriptor(), source_id, reader, dialect).await {
        Ok(rows_loaded) => {
            info!(source_id, rows_loaded, "Staged CSV feed");
            Ok(StagedSource { source_id, rows_loaded })
        },
        Err(source) => {
            let recorded = record_source_error(pool, source_id, &source.to_string()).await;
            Err(ingestion_failure(source_id, source, recorded))
        },
    }
}

/// The ingestion error wins even when recording it fails
fn ingestion_failure(
    source_id: i64,
    source: IngestionError,
    recorded: Result<(), sqlx::Error>,
) -> ImportError {
    if let Err(e) = recorded {
        error!(source_id, error = %e, ingestion_error = %source, "Failed to record SourceError");
    }
    ImportError::Ingestion { source_id, source }
}

async fn load<R>(
    pool: &PgPool,
    descriptor: &TypeDescriptor,
    source_id: i64,
    reader: R,
    dialect: Dialect,
) -> Result<u64, IngestionError>
where
    R: AsyncRead + Unpin,
{
    dialect.validate()?;

    let mut reader = BufReader::new(reader);
    let mut header = Vec::new();
    if reader.read_until(b'\n', &mut header).await? == 0 {
        return Err(IngestionError::MissingHeader);
    }

    let columns = dialect.parse_header(&header)?;
    let allowed = descriptor.staging_columns();
    if let Some(unknown) = columns.iter().find(|c| !allowed.contains(c)) {
        return Err(IngestionError::UnknownColumn {
            record_type: descriptor.record_type.to_string(),
            column: unknown.clone(),
        });
    }
    debug!(source_id, columns = ?columns, "Parsed CSV header");

    // Dropping the transaction on any early return rolls the copy back
    let mut tx = pool.begin().await?;

    let statement = dialect.copy_statement(descriptor.staging_table, &columns);
    let rows_loaded = copy_rows(&mut *tx, &statement, &mut reader).await?;

    sqlx::query(&format!(
        "UPDATE {} SET source_id = $1, processed_at = 0 WHERE source_id IS NULL",
        quote_ident(descriptor.staging_table)
    ))
    .bind(source_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(rows_loaded)
}

async fn copy_rows<R>(
    conn: &mut PgConnection,
    statement: &str,
    reader: &mut R,
) -> Result<u64, IngestionError>
where
    R: AsyncRead + Unpin,
{
    let mut copy = conn.copy_in_raw(statement).await?;

    let streamed = copy.read_from(reader).await.map(|_| ());
    match streamed {
        Ok(()) => Ok(copy.finish().await?),
        Err(e) => {
            if let Err(abort) = copy.abort(e.to_string()).await {
                warn!(error = %abort, "Server rejected COPY abort");
            }
            Err(IngestionError::Copy(e))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_lowercases() {
        let columns = Dialect::default()
            .parse_header(b"CreatedBy,ExternalIdentifier,IsDeleted\r\n")
            .unwrap();
        assert_eq!(columns, vec!["createdby", "externalidentifier", "isdeleted"]);
    }

    #[test]
    fn test_parse_header_with_dialect() {
        let dialect = Dialect { delimiter: b';', quote: b'\'' };
        let columns = dialect.parse_header(b"'Name';'Area;Id'\n").unwrap();
        assert_eq!(columns, vec!["name", "area;id"]);
    }

    #[test]
    fn test_parse_header_strips_bom() {
        let columns = Dialect::default()
            .parse_header("\u{feff}Name,AreaId\n".as_bytes())
            .unwrap();
        assert_eq!(columns, vec!["name", "areaid"]);
    }

    #[test]
    fn test_blank_header_is_missing() {
        assert!(matches!(
            Dialect::default().parse_header(b"\n"),
            Err(IngestionError::MissingHeader)
        ));
    }

    #[test]
    fn test_ingestion_error_survives_failed_recording() {
        let err = ingestion_failure(7, IngestionError::MissingHeader, Err(sqlx::Error::PoolClosed));
        assert!(matches!(
            err,
            ImportError::Ingestion { source_id: 7, source: IngestionError::MissingHeader }
        ));
    }

    #[test]
    fn test_dialect_validation() {
        assert!(Dialect::default().validate().is_ok());
        assert!(Dialect { delimiter: b'\t', quote: b'"' }.validate().is_ok());
        assert!(Dialect { delimiter: b',', quote: b',' }.validate().is_err());
        assert!(Dialect { delimiter: b'\n', quote: b'"' }.validate().is_err());
        assert!(Dialect { delimiter: 0xE9, quote: b'"' }.validate().is_err());
    }

    #[test]
    fn test_copy_statement() {
        let statement = Dialect { delimiter: b'\t', quote: b'"' }
            .copy_statement("area_csv", &["name".to_string(), "isdeleted".to_string()]);
        assert_eq!(
            statement,
            "COPY \"area_csv\" (\"name\", \"isdeleted\") FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t', QUOTE E'\"')"
        );
    }
}
