//! Source queries

pub mod get_source;
pub mod list_sources;

pub use get_source::{GetSourceError, GetSourceQuery};
pub use list_sources::{ListSourcesError, ListSourcesQuery, ListSourcesResponse, SourceListItem};
