//! Loader configuration

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::extract::DEFAULT_CHUNK_SIZE;
use crate::transform::Strictness;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cnpj";

/// Default maximum database connections in the pool.
///
/// The pipeline is sequential; one connection copies, one writes the audit.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default root of the per-competence archive directories.
pub const DEFAULT_DATA_DIR: &str = "data/raw";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub strictness: Strictness,
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let strictness = match std::env::var("CNPJ_STRICTNESS") {
            Ok(s) => s.parse().map_err(IngestError::Config)?,
            Err(_) => Strictness::default(),
        };

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            data_dir: std::env::var("CNPJ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            chunk_size: std::env::var("CNPJ_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            strictness,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(IngestError::Config("Chunk size must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// Open the connection pool
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.database.max_connections)
            .acquire_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .connect(&self.database.url)
            .await?;

        Ok(pool)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            strictness: Strictness::default(),
        }
    }
}
