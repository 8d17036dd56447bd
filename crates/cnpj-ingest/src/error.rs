//! Ingestion error types
//!
//! Variants follow the pipeline's failure taxonomy: some end a single archive
//! (`Unrecognized`, `Archive`, `EmptyArchive`), some only skip one chunk
//! (`Transform`, `Copy`, `Database` during a copy), and `Audit` ends the run
//! because an archive can no longer be guaranteed its audit record.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unrecognized archive kind for {0}")]
    Unrecognized(String),

    #[error("Failed to open archive {archive}: {message}")]
    Archive { archive: String, message: String },

    #[error("No data member found in {0}")]
    EmptyArchive(String),

    #[error("Failed to decode {archive}: {message}")]
    Decode { archive: String, message: String },

    #[error("Transform error in column {column}: {message}")]
    Transform { column: String, message: String },

    #[error("COPY into {table} failed: {source}")]
    Copy {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
