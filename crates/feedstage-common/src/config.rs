//! Configuration management
//!
//! Layering, lowest precedence first:
//! 1. built-in defaults (the constants below)
//! 2. an optional TOML file passed with `--config`
//! 3. `FEEDSTAGE__SECTION__KEY` environment variables (e.g. `FEEDSTAGE__IMPORT__BATCH_SIZE`)
//! 4. `DATABASE_URL` and the `LOG_*` variables

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FeedstageError, Result};
use crate::logging::LogConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://postgres@localhost:5432/feedstage";

/// Default maximum database connections in the pool.
///
/// An import run needs two: one for the per-type lock, one for batches.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Rows fetched, validated and committed together.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default CSV field delimiter.
pub const DEFAULT_DELIMITER: &str = ",";

/// Default CSV quote character.
pub const DEFAULT_QUOTE: &str = "\"";

/// Default admin server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default admin server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

const ENV_PREFIX: &str = "FEEDSTAGE";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub server: ServerConfig,
    pub logging: LogConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub delimiter: String,
    pub quote: String,
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: DEFAULT_DELIMITER.to_string(),
            quote: DEFAULT_QUOTE.to_string(),
        }
    }
}

impl ImportConfig {
    /// Delimiter as the single byte the CSV dialect needs
    pub fn delimiter_byte(&self) -> Result<u8> {
        single_ascii_byte("import.delimiter", &self.delimiter)
    }

    /// Quote character as a single byte
    pub fn quote_byte(&self) -> Result<u8> {
        single_ascii_byte("import.quote", &self.quote)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        config.logging = config
            .logging
            .with_env_overrides()
            .map_err(|e| FeedstageError::config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(FeedstageError::config("Database URL cannot be empty"));
        }

        if self.database.max_connections < 2 {
            return Err(FeedstageError::config(
                "Database max_connections must be at least 2 (lock + batch connections)",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(FeedstageError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.import.batch_size == 0 {
            return Err(FeedstageError::config("Import batch_size must be greater than 0"));
        }

        self.import.delimiter_byte()?;
        self.import.quote_byte()?;

        if self.server.port == 0 {
            return Err(FeedstageError::config("Server port must be greater than 0"));
        }

        Ok(())
    }
}

/// Parse a one-character dialect setting into its byte
pub fn single_ascii_byte(name: &str, value: &str) -> Result<u8> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'\n' && *byte != b'\r' => Ok(*byte),
        _ => Err(FeedstageError::config(format!(
            "{name} must be a single ASCII character, got {value:?}"
        ))),
    }
}
