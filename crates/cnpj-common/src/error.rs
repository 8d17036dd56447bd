//! Error types shared across the CNPJ crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared types and utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid competence '{0}': expected YYYY-MM")]
    InvalidCompetence(String),
}
