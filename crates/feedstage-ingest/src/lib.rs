//! Feedstage Ingest Library
//!
//! Staged import of bulk CSV feeds into PostgreSQL.
//!
//! A run copies the raw feed into a per-type staging table, validates every
//! staged row against the type's schema, upserts the valid rows into the
//! authoritative table and applies the deletions the feed requests. Progress
//! lives in the staging rows themselves (`processed_at = 0` means pending),
//! so an interrupted run can be resumed from its last committed batch.
//!
//! # Supported Record Types
//!
//! - **area**: licensee areas, keyed by `ExternalIdentifier`
//! - **strain**: strains, keyed by `StrainId`
//!
//! # Example
//!
//! ```no_run
//! use feedstage_ingest::{ImportOptions, Pipeline, RecordType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgresql://localhost/feedstage").await?;
//!     let file = tokio::fs::File::open("areas.csv").await?;
//!
//!     let report = Pipeline::new(pool)
//!         .run(RecordType::Area, file, &ImportOptions::for_file("areas.csv"))
//!         .await?;
//!     println!("source {} imported", report.source_id);
//!     Ok(())
//! }
//! ```
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod batch;
pub mod db;
pub mod delete;
pub mod error;
pub mod insert;
pub mod lock;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod source;
pub mod sql;
pub mod staging;

pub use delete::DeleteStats;
pub use error::{ImportError, ImportResult, IngestionError};
pub use insert::InsertStats;
pub use pipeline::{ImportOptions, Pipeline, RunReport};
pub use registry::{RecordType, TypeDescriptor};
pub use source::{Source, SourceMetadata};
