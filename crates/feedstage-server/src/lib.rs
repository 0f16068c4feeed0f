//! Feedstage Admin Server
//!
//! Read-only HTTP view over the import tables: ingestion runs, their
//! run-level failures, and CSV exports of rejected rows.

pub mod error;
pub mod features;
pub mod middleware;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

/// Build the application router with all routes and middleware
pub fn app(db: PgPool) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(db.clone())
        .nest("/api/v1", features::router(db))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
}

/// Health check handler
async fn health_check(State(db): State<PgPool>) -> Result<Response, StatusCode> {
    match feedstage_ingest::db::health_check(&db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
