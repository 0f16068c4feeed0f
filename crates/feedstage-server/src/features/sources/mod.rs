//! Sources feature module
//!
//! Read-only listing of ingestion runs and their run-level errors.

pub mod queries;
pub mod routes;

pub use routes::sources_routes;
