//! Get source query

use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::list_sources::{SourceListItem, SOURCE_SELECT};

/// Query to fetch one source by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSourceQuery {
    pub id: i64,
}

/// Error type for get source query
#[derive(Debug, thiserror::Error)]
pub enum GetSourceError {
    #[error("Source {0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<SourceListItem, GetSourceError>> for GetSourceQuery {}

pub async fn handle(pool: PgPool, query: GetSourceQuery) -> Result<SourceListItem, GetSourceError> {
    sqlx::query_as::<_, SourceListItem>(&format!("{SOURCE_SELECT} WHERE s.id = $1"))
        .bind(query.id)
        .fetch_optional(&pool)
        .await?
        .ok_or(GetSourceError::NotFound(query.id))
}
