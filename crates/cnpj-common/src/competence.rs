//! Competence period (`YYYY-MM`)
//!
//! Each registry snapshot is published for one calendar month. The textual form
//! is stored verbatim in the `competencia` column of versioned tables and is
//! also the name of the per-period directory under the raw data dir, so it must
//! sort lexicographically in chronological order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// A validated `YYYY-MM` competence period
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Competence(String);

impl Competence {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Competence {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 7
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);

        if !well_formed {
            return Err(CommonError::InvalidCompetence(s.to_string()));
        }

        match s[5..].parse::<u8>() {
            Ok(1..=12) => Ok(Self(s.to_string())),
            _ => Err(CommonError::InvalidCompetence(s.to_string())),
        }
    }
}

impl TryFrom<String> for Competence {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Competence> for String {
    fn from(value: Competence) -> Self {
        value.0
    }
}

impl AsRef<str> for Competence {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Competence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
