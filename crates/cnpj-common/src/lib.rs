//! CNPJ Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the CNPJ workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Competence**: the `YYYY-MM` snapshot period every versioned row carries
//! - **Logging**: centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use cnpj_common::{Competence, Result};
//!
//! fn parse_period(raw: &str) -> Result<Competence> {
//!     let competence: Competence = raw.parse()?;
//!     println!("Loading period {}", competence);
//!     Ok(competence)
//! }
//! ```

pub mod competence;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use competence::Competence;
pub use error::{CommonError, Result};
