//! Feature modules implementing the admin API
//!
//! Each feature is a vertical slice with its own queries and routes. The
//! admin API is read-only, so there are no commands.
//!
//! # Features
//!
//! - **sources**: ingestion runs and their run-level errors
//! - **csv_errors**: CSV export of the rows a run rejected
//!
//! Queries implement the mediator `Request` marker and expose a
//! `handle(pool, query)` function called by the routes.

pub mod csv_errors;
pub mod sources;

use axum::Router;
use sqlx::PgPool;

/// Creates the API router with all feature routes mounted
///
/// - `/sources` - Source listing and lookup
/// - `/csv-errors` - CSV error export
pub fn router(db: PgPool) -> Router<()> {
    Router::new()
        .nest("/sources", sources::sources_routes().with_state(db.clone()))
        .nest("/csv-errors", csv_errors::csv_errors_routes().with_state(db))
}
