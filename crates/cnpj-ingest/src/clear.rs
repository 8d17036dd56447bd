//! Explicit bulk-clear operations
//!
//! Neither operation is ever run by a load. `clear` truncates whole tables;
//! `purge` removes one competence from the versioned tables in small batches,
//! each in its own transaction, so no long row-lock is held on a large table.

use cnpj_common::Competence;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::error::{IngestError, Result};
use crate::layout::{self, EntityKind, AUDIT_TABLE};
use crate::loader::{quote_ident, CopyTarget};

/// Default number of rows deleted per purge transaction
pub const DEFAULT_PURGE_BATCH_SIZE: i64 = 50_000;

/// Outcome of truncating one table
#[derive(Debug)]
pub struct TableOutcome {
    pub table: &'static str,
    pub result: Result<()>,
}

/// Tables a clear touches
///
/// Versioned tables come first so dependents are emptied before the code
/// lists they reference.
pub fn clear_plan(domain_only: bool, include_audit: bool) -> Vec<&'static str> {
    let mut tables = Vec::new();
    if !domain_only {
        tables.extend(layout::tables(false));
    }
    tables.extend(layout::tables(true));
    if include_audit {
        tables.push(AUDIT_TABLE);
    }
    tables
}

/// Truncate every table of `tables`, continuing past failures
pub async fn clear_tables<T: CopyTarget>(target: &T, tables: &[&'static str]) -> Vec<TableOutcome> {
    let mut outcomes = Vec::with_capacity(tables.len());

    for &table in tables {
        let result = target.truncate(table).await;
        match &result {
            Ok(()) => info!(table, "Table truncated"),
            Err(e) => error!(table, error = %e, "Failed to truncate table"),
        }
        outcomes.push(TableOutcome { table, result });
    }

    outcomes
}

/// Rows deleted per table by a purge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeStats {
    pub table: &'static str,
    pub deleted: u64,
    pub batches: u64,
}

/// Delete one competence's rows from the versioned tables, in batches
///
/// `kind` restricts the purge to one versioned kind. Each batch commits on its
/// own; an interrupted purge leaves the remaining rows for the next run.
pub async fn purge_competence(
    pool: &PgPool,
    competence: &Competence,
    kind: Option<EntityKind>,
    batch_size: i64,
) -> Result<Vec<PurgeStats>> {
    if batch_size <= 0 {
        return Err(IngestError::Config("Batch size must be greater than 0".to_string()));
    }

    let tables: Vec<&'static str> = match kind {
        Some(kind) if kind.is_domain() => {
            return Err(IngestError::Config(format!(
                "{kind} is a domain kind with no competence; use clear instead"
            )));
        },
        Some(kind) => vec![kind.layout().table],
        None => layout::tables(false).collect(),
    };

    let mut stats = Vec::with_capacity(tables.len());
    for table in tables {
        stats.push(purge_table(pool, table, competence, batch_size).await?);
    }

    Ok(stats)
}

async fn purge_table(
    pool: &PgPool,
    table: &'static str,
    competence: &Competence,
    batch_size: i64,
) -> Result<PurgeStats> {
    let table_ident = quote_ident(table);
    let sql = format!(
        "DELETE FROM {table_ident} WHERE ctid IN (\
         SELECT ctid FROM {table_ident} WHERE competencia = $1 LIMIT $2)"
    );

    let mut deleted = 0u64;
    let mut batches = 0u64;

    loop {
        let mut tx = pool.begin().await?;
        let result = sqlx::query(&sql)
            .bind(competence.as_str())
            .bind(batch_size)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let affected = result.rows_affected();
        if affected == 0 {
            break;
        }

        deleted += affected;
        batches += 1;
        debug!(table, batch = batches, deleted, "Purge batch committed");
    }

    info!(table, competencia = %competence, deleted, "Competence purged");

    Ok(PurgeStats {
        table,
        deleted,
        batches,
    })
}
