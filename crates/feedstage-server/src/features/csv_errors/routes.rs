//! CSV error routes

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use sqlx::PgPool;

use super::queries::{export_csv_errors::handle as handle_export, ExportCsvErrorsError, ExportCsvErrorsQuery};
use crate::error::AppError;

/// Raw query string; a missing or non-numeric id is treated as an unknown source
#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub source_id: Option<String>,
}

/// Create CSV error routes
pub fn csv_errors_routes() -> Router<PgPool> {
    Router::new().route("/download", get(download_csv_errors))
}

/// Download the rejected rows of a source as CSV
///
/// GET /csv-errors/download?source_id=42
async fn download_csv_errors(
    State(db): State<PgPool>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let source_id = params
        .source_id
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::NotFound("Source not found".to_string()))?;

    let export = handle_export(db, ExportCsvErrorsQuery { source_id })
        .await
        .map_err(|e| match e {
            ExportCsvErrorsError::SourceNotFound(id) => AppError::NotFound(format!("Source {id} not found")),
            ExportCsvErrorsError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        })?;

    tracing::info!(source_id, rows = export.rows, filename = %export.filename, "Serving CSV error export");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.filename.replace('"', "")),
            ),
        ],
        export.body,
    )
        .into_response())
}
