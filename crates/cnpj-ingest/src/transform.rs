//! Per-chunk normalization
//!
//! Rules, applied to every row in order:
//!
//! 1. Non-date columns are trimmed and uppercased; an empty result is NULL.
//! 2. Partner identifiers of individuals are masked as `***XXXXXX**`.
//! 3. Date columns: empty, `0` and `00000000` are NULL, `YYYYMMDD` becomes
//!    `YYYY-MM-DD`, anything else is NULL (or an error in strict mode).
//! 4. Versioned kinds get the competence appended as a trailing column.
//!
//! The transformer never drops rows: the output has exactly as many rows as the
//! input chunk.

use chrono::NaiveDate;
use cnpj_common::Competence;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, Result};
use crate::extract::RawChunk;
use crate::layout::{EntityKind, Layout};

const PARTNER_KIND_COLUMN: &str = "identificador_socio";
const PARTNER_ID_COLUMN: &str = "cnpj_cpf_socio";
const MASKED_ID_LEN: usize = 11;

/// How malformed values are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Bad dates become NULL and bad identifiers pass through unmasked
    #[default]
    Lenient,
    /// Bad dates and identifiers fail the chunk
    Strict,
}

impl std::str::FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Strictness::Lenient),
            "strict" => Ok(Strictness::Strict),
            _ => Err(format!("Invalid strictness: {s}")),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strictness::Lenient => f.write_str("lenient"),
            Strictness::Strict => f.write_str("strict"),
        }
    }
}

/// Partner type carried by `identificador_socio`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerKind {
    Individual,
    LegalEntity,
    Foreign,
}

impl PartnerKind {
    pub fn from_code(code: &str) -> Option<Self> {
        // Code 1 is masked as an individual (PF) although the published layout
        // lists 2 for PF. Confirm with the data owner before changing this.
        match code {
            "1" => Some(PartnerKind::Individual),
            "2" => Some(PartnerKind::LegalEntity),
            "3" => Some(PartnerKind::Foreign),
            _ => None,
        }
    }
}

/// A transformed chunk ready for the bulk loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanChunk {
    pub index: usize,
    /// Destination columns, competence included for versioned kinds
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CleanChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trim, uppercase, empty to NULL
pub fn normalize_string(raw: &str) -> Option<String> {
    let value = raw.trim().to_uppercase();
    (!value.is_empty()).then_some(value)
}

fn is_null_date(value: &str) -> bool {
    matches!(value, "" | "0" | "00000000")
}

fn parse_yyyymmdd(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = value[..4].parse().ok()?;
    let month: u32 = value[4..6].parse().ok()?;
    let day: u32 = value[6..].parse().ok()?;
    if year < 1 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Reparse a `YYYYMMDD` field as ISO `YYYY-MM-DD`
///
/// Sentinels and anything that does not parse become `None`.
pub fn parse_date(raw: &str) -> Option<String> {
    let value = raw.trim();
    if is_null_date(value) {
        return None;
    }
    parse_yyyymmdd(value).map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date_strict(column: &str, raw: &str) -> Result<Option<String>> {
    let value = raw.trim();
    if is_null_date(value) {
        return Ok(None);
    }
    parse_yyyymmdd(value)
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| IngestError::Transform {
            column: column.to_string(),
            message: format!("'{value}' is not a YYYYMMDD date"),
        })
}

/// Mask an individual's identifier, keeping characters 4 to 9
///
/// Values that are not exactly 11 characters after trimming are returned
/// trimmed but unmasked. Applying this to an already masked value masks it
/// again, so callers must only feed it raw input.
pub fn mask_identifier(raw: &str) -> String {
    let value = raw.trim();
    let chars: Vec<char> = value.chars().collect();
    if chars.len() != MASKED_ID_LEN {
        return value.to_string();
    }
    let visible: String = chars[3..9].iter().collect();
    format!("***{visible}**")
}

struct ColumnPlan {
    is_date: Vec<bool>,
    partner: Option<(usize, usize)>,
}

impl ColumnPlan {
    fn for_layout(layout: &Layout) -> Self {
        let is_date = layout
            .columns
            .iter()
            .map(|column| layout.is_date_column(column))
            .collect();

        let partner = match layout.kind {
            EntityKind::Partner => layout
                .column_index(PARTNER_KIND_COLUMN)
                .zip(layout.column_index(PARTNER_ID_COLUMN)),
            _ => None,
        };

        Self { is_date, partner }
    }
}

/// Apply the normalization rules to one raw chunk
pub fn transform_chunk(
    chunk: RawChunk,
    kind: EntityKind,
    competence: &Competence,
    strictness: Strictness,
) -> Result<CleanChunk> {
    let layout = kind.layout();
    let plan = ColumnPlan::for_layout(layout);
    let strict = strictness == Strictness::Strict;
    let competence_value = (!layout.domain).then(|| competence.to_string());

    let mut rows = Vec::with_capacity(chunk.rows.len());

    for raw in chunk.rows {
        let mut row: Vec<Option<String>> = Vec::with_capacity(layout.width() + 1);

        for (position, value) in raw.iter().enumerate() {
            let is_date = plan.is_date.get(position).copied().unwrap_or(false);
            let cleaned = if !is_date {
                normalize_string(value)
            } else if strict {
                parse_date_strict(layout.columns[position], value)?
            } else {
                parse_date(value)
            };
            row.push(cleaned);
        }

        if let Some((kind_idx, id_idx)) = plan.partner {
            let partner_kind = row
                .get(kind_idx)
                .and_then(|code| code.as_deref())
                .and_then(PartnerKind::from_code);

            if partner_kind == Some(PartnerKind::Individual) {
                if let Some(Some(identifier)) = row.get_mut(id_idx) {
                    if strict && identifier.chars().count() != MASKED_ID_LEN {
                        return Err(IngestError::Transform {
                            column: PARTNER_ID_COLUMN.to_string(),
                            message: format!(
                                "individual identifier '{identifier}' is not {MASKED_ID_LEN} characters"
                            ),
                        });
                    }
                    *identifier = mask_identifier(identifier);
                }
            }
        }

        if let Some(ref value) = competence_value {
            row.push(Some(value.clone()));
        }

        rows.push(row);
    }

    Ok(CleanChunk {
        index: chunk.index,
        columns: layout.insert_columns(),
        rows,
    })
}
