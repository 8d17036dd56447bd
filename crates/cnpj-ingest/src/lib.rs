//! CNPJ Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! ETL pipeline for the open CNPJ registry extracts. Each competence (`YYYY-MM`)
//! is a directory of zip archives; every archive is classified, streamed in
//! chunks, normalized, and bulk-copied into PostgreSQL with one audit record
//! per archive.
//!
//! # Pipeline
//!
//! - [`layout`]: column order, date columns and destination table per kind
//! - [`classifier`]: archive file name to entity kind
//! - [`extract`]: streaming chunks out of an archive
//! - [`transform`]: per-chunk normalization
//! - [`loader`]: `COPY ... FROM STDIN` per chunk
//! - [`orchestrator`]: one archive end to end
//! - [`audit`]: the `cnpj_carga_log` table
//! - [`runner`]: competences and their archives, in order
//!
//! # Example
//!
//! ```no_run
//! use cnpj_ingest::{
//!     BatchRunner, IngestConfig, LoadOptions, LoadOrchestrator, PgAuditLog, PgCopyTarget,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pool = config.connect().await?;
//!
//!     let orchestrator =
//!         LoadOrchestrator::new(PgCopyTarget::new(pool.clone()), PgAuditLog::new(pool));
//!     let summary = BatchRunner::new(orchestrator, &config.data_dir)
//!         .with_options(LoadOptions::default())
//!         .run(&["2024-05".parse()?])
//!         .await?;
//!
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod classifier;
pub mod clear;
pub mod config;
pub mod error;
pub mod extract;
pub mod layout;
pub mod loader;
pub mod orchestrator;
pub mod runner;
pub mod transform;

pub use audit::{AuditLog, AuditRecord, LoadStatus, PgAuditLog};
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use layout::EntityKind;
pub use loader::{BulkLoader, CopyTarget, PgCopyTarget};
pub use orchestrator::{FileReport, LoadContext, LoadOptions, LoadOrchestrator};
pub use runner::{BatchRunner, RunSummary};
pub use transform::Strictness;

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
