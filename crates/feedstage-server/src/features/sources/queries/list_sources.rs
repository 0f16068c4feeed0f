//! List sources query
//!
//! Sources newest first, each with its run-level error (if any) and whether
//! any of its rows produced a CSV error.

use chrono::{DateTime, NaiveDate, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Query to list sources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSourcesQuery {
    /// Limit number of results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Offset for pagination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Source list item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SourceListItem {
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
    pub source_errors: Option<serde_json::Value>,
    pub has_csv_errors: bool,
}

/// Response for list sources query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSourcesResponse {
    pub sources: Vec<SourceListItem>,
    pub total: i64,
}

/// Error type for list sources query
#[derive(Debug, thiserror::Error)]
pub enum ListSourcesError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<ListSourcesResponse, ListSourcesError>> for ListSourcesQuery {}

/// Columns shared by the list and get queries
pub(crate) const SOURCE_SELECT: &str = r#"
    SELECT s.id, s.type, s.filename, s.submitted_by, s.submitted_date,
           s.number_of_records, s.processed_at, s.created_at,
           se.errors AS source_errors,
           EXISTS(SELECT 1 FROM csv_errors ce WHERE ce.source_id = s.id) AS has_csv_errors
    FROM sources s
    LEFT JOIN source_errors se ON se.source_id = s.id
"#;

pub async fn handle(
    pool: PgPool,
    query: ListSourcesQuery,
) -> Result<ListSourcesResponse, ListSourcesError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000); // Max 1000
    let offset = query.offset.unwrap_or(0).max(0);

    let sources = sqlx::query_as::<_, SourceListItem>(&format!(
        "{SOURCE_SELECT} ORDER BY s.id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
        .fetch_one(&pool)
        .await?;

    Ok(ListSourcesResponse { sources, total })
}
