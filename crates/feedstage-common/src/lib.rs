//! Feedstage Common Library
//!
//! Shared configuration, logging, and error handling for the feedstage workspace.
//!
//! # Overview
//!
//! - **Configuration**: layered TOML/environment configuration for every binary
//! - **Logging**: tracing subscriber setup (console, rolling files, JSON)
//! - **Errors**: the workspace-level error and result types
//!
//! # Example
//!
//! ```no_run
//! use feedstage_common::config::Config;
//! use feedstage_common::logging::init_logging;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     init_logging(&config.logging)?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FeedstageError, Result};
