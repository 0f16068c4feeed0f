//! CSV errors feature module
//!
//! Export of the rows a run rejected, with their staged values and the error
//! payload, as a CSV attachment.

pub mod queries;
pub mod routes;

pub use routes::csv_errors_routes;
