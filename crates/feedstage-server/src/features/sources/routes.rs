//! Source routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use super::queries::{
    get_source::handle as handle_get_source, list_sources::handle as handle_list_sources,
    GetSourceError, GetSourceQuery, ListSourcesQuery,
};
use crate::error::AppError;

/// Create source routes
pub fn sources_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_sources))
        .route("/:id", get(get_source))
}

/// List sources, newest first
///
/// GET /sources?limit=50&offset=0
async fn list_sources(
    State(db): State<PgPool>,
    Query(query): Query<ListSourcesQuery>,
) -> Result<Response, AppError> {
    let response = handle_list_sources(db, query).await.map_err(|e| {
        tracing::error!("Failed to list sources: {:?}", e);
        AppError::Internal("Failed to list sources".to_string())
    })?;

    Ok((StatusCode::OK, Json(json!(response))).into_response())
}

/// Get a specific source by id
///
/// GET /sources/:id
async fn get_source(
    State(db): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    match handle_get_source(db, GetSourceQuery { id }).await {
        Ok(source) => Ok((StatusCode::OK, Json(json!(source))).into_response()),
        Err(GetSourceError::NotFound(id)) => Err(AppError::NotFound(format!("Source {id} not found"))),
        Err(GetSourceError::Database(e)) => Err(AppError::Database(e)),
    }
}
