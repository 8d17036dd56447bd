//! Per-archive load audit
//!
//! Every archive attempt gets one record in `cnpj_carga_log`. It is created as
//! `STARTED` before any data is touched and finalized once the archive is done,
//! so a record left in `STARTED` marks an interrupted run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnpj_common::Competence;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Error messages persisted per record
pub const MAX_STORED_ERRORS: usize = 10;

/// Error messages shown to the operator per archive
pub const ERROR_EXCERPT: usize = 3;

/// Default number of records returned by [`PgAuditLog::recent`]
pub const DEFAULT_AUDIT_QUERY_LIMIT: i64 = 20;

/// Maximum number of records returned by [`PgAuditLog::recent`]
pub const MAX_AUDIT_QUERY_LIMIT: i64 = 1000;

/// Outcome of one archive load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Started,
    Success,
    Partial,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    /// Final status from the rows loaded and the errors collected
    pub fn classify(rows: u64, errors: usize) -> Self {
        match (rows, errors) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "PARTIAL" => Ok(Self::Partial),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown load status: {s}")),
        }
    }
}

/// Stored audit record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub arquivo: String,
    pub competencia: String,
    pub qtd_registros: i64,
    pub status: String,
    pub inicio: DateTime<Utc>,
    pub fim: Option<DateTime<Utc>>,
    pub erro: Option<String>,
}

impl AuditRecord {
    pub fn status(&self) -> Option<LoadStatus> {
        self.status.parse().ok()
    }

    /// A record never finalized belongs to an interrupted run
    pub fn is_incomplete(&self) -> bool {
        self.status() == Some(LoadStatus::Started)
    }
}

/// Values written when an audit record is finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditCompletion {
    pub rows: u64,
    pub status: LoadStatus,
    pub errors: Vec<String>,
}

impl AuditCompletion {
    /// Stored error text: at most [`MAX_STORED_ERRORS`] messages, one per line
    pub fn error_text(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .take(MAX_STORED_ERRORS)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Persistent store of audit records
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Create a `STARTED` record, returning its id
    async fn start(&self, archive: &str, competence: &Competence) -> Result<i64>;

    /// Finalize a record with its loaded row count, status and errors
    async fn finish(&self, id: i64, completion: &AuditCompletion) -> Result<()>;
}

/// [`AuditLog`] stored in PostgreSQL
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent records first, optionally for one competence
    pub async fn recent(
        &self,
        limit: i64,
        competence: Option<&Competence>,
    ) -> Result<Vec<AuditRecord>> {
        let limit = limit.clamp(1, MAX_AUDIT_QUERY_LIMIT);

        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, arquivo, competencia, qtd_registros, status, inicio, fim, erro
            FROM cnpj_carga_log
            WHERE ($1::text IS NULL OR competencia = $1::text)
            ORDER BY inicio DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(competence.map(Competence::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = records.len(), "Queried audit records");

        Ok(records)
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn start(&self, archive: &str, competence: &Competence) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO cnpj_carga_log (arquivo, competencia, qtd_registros, status, inicio)
            VALUES ($1, $2, 0, $3, NOW())
            RETURNING id
            "#,
        )
        .bind(archive)
        .bind(competence.as_str())
        .bind(LoadStatus::Started.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IngestError::Audit(format!("failed to start record for {archive}: {e}")))?;

        debug!(audit_id = id, arquivo = archive, "Created audit record");

        Ok(id)
    }

    async fn finish(&self, id: i64, completion: &AuditCompletion) -> Result<()> {
        let rows = i64::try_from(completion.rows).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE cnpj_carga_log
            SET qtd_registros = $2, status = $3, fim = NOW(), erro = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(rows)
        .bind(completion.status.as_str())
        .bind(completion.error_text())
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::Audit(format!("failed to finalize record {id}: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(IngestError::Audit(format!("audit record {id} not found")));
        }

        debug!(audit_id = id, status = %completion.status, "Finalized audit record");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(LoadStatus::classify(10, 0), LoadStatus::Success);
        assert_eq!(LoadStatus::classify(0, 0), LoadStatus::Success);
        assert_eq!(LoadStatus::classify(10, 1), LoadStatus::Partial);
        assert_eq!(LoadStatus::classify(0, 1), LoadStatus::Failed);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            LoadStatus::Started,
            LoadStatus::Success,
            LoadStatus::Partial,
            LoadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<LoadStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<LoadStatus>().is_err());
        assert_eq!(serde_json::to_string(&LoadStatus::Partial).unwrap(), "\"PARTIAL\"");
    }

    #[test]
    fn test_error_text_is_capped() {
        let completion = AuditCompletion {
            rows: 0,
            status: LoadStatus::Failed,
            errors: (0..15).map(|i| format!("e{i}")).collect(),
        };
        let text = completion.error_text().unwrap();
        assert_eq!(text.lines().count(), MAX_STORED_ERRORS);
        assert!(text.starts_with("e0\ne1"));
        assert!(!text.contains("e10"));
    }

    #[test]
    fn test_no_errors_stores_null() {
        let completion = AuditCompletion {
            rows: 5,
            status: LoadStatus::Success,
            errors: vec![],
        };
        assert_eq!(completion.error_text(), None);
    }

    #[test]
    fn test_started_record_is_incomplete() {
        let mut record = AuditRecord {
            id: 1,
            arquivo: "Empresas0.zip".to_string(),
            competencia: "2024-05".to_string(),
            qtd_registros: 0,
            status: "STARTED".to_string(),
            inicio: Utc::now(),
            fim: None,
            erro: None,
        };
        assert!(record.is_incomplete());

        record.status = "SUCCESS".to_string();
        assert!(!record.is_incomplete());
    }
}
