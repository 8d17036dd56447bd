//! Bulk loading through PostgreSQL `COPY`
//!
//! A clean chunk is serialized into a tab-delimited text buffer and sent with
//! one `COPY ... FROM STDIN` per chunk, committed on its own:
//!
//! ```text
//! COPY cnpj_cnae (codigo, descricao) FROM STDIN WITH (FORMAT text, DELIMITER E'\t', NULL '')
//! ```
//!
//! An empty field is NULL. The transformer collapses empty strings to NULL, so
//! no real value is ever serialized as an empty field.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::transform::CleanChunk;

/// Upper bound for a single CopyData message
const COPY_SEND_BUFFER: usize = 1024 * 1024;

/// Destination of bulk copies
///
/// The connection is held only for one call: a chunk's copy and its commit.
#[async_trait]
pub trait CopyTarget: Send + Sync {
    /// Run `statement` feeding it `payload`; returns the rows the store reports
    async fn copy_in(&self, table: &str, statement: &str, payload: Vec<u8>) -> Result<u64>;

    /// `TRUNCATE ... CASCADE` on one table
    async fn truncate(&self, table: &str) -> Result<()>;
}

/// [`CopyTarget`] backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgCopyTarget {
    pool: PgPool,
}

impl PgCopyTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CopyTarget for PgCopyTarget {
    async fn copy_in(&self, table: &str, statement: &str, payload: Vec<u8>) -> Result<u64> {
        let copy_err = |source: sqlx::Error| IngestError::Copy {
            table: table.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(copy_err)?;

        let mut copy = tx.copy_in_raw(statement).await.map_err(copy_err)?;
        for part in payload.chunks(COPY_SEND_BUFFER) {
            let sent = copy.send(part).await.map(|_| ());
            if let Err(e) = sent {
                // Abort the COPY so the connection returns to the pool in a clean state
                if let Err(abort_err) = copy.abort(e.to_string()).await {
                    debug!(error = %abort_err, "COPY abort reported an error");
                }
                return Err(copy_err(e));
            }
        }
        let copied = copy.finish().await.map_err(copy_err)?;

        tx.commit().await.map_err(copy_err)?;
        Ok(copied)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", quote_ident(table)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Serializes chunks and hands them to a [`CopyTarget`]
pub struct BulkLoader<T> {
    target: T,
}

impl<T: CopyTarget> BulkLoader<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Copy one chunk into `table` and commit
    ///
    /// Returns the number of rows sent. A store that silently discards rows is
    /// not detected here beyond a warning.
    pub async fn load(&self, table: &str, chunk: &CleanChunk) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }

        let statement = copy_statement(table, &chunk.columns);
        let payload = encode_copy_text(chunk);
        let sent = chunk.len() as u64;

        let copied = self.target.copy_in(table, &statement, payload).await?;
        if copied != sent {
            warn!(
                table,
                chunk = chunk.index,
                sent,
                copied,
                "Store reported a different row count than was sent"
            );
        }

        debug!(table, chunk = chunk.index, rows = sent, "Chunk copied");
        Ok(sent)
    }

    pub async fn truncate(&self, table: &str) -> Result<()> {
        self.target.truncate(table).await
    }
}

/// Double-quote an identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Build the `COPY ... FROM STDIN` statement for a column list
pub fn copy_statement(table: &str, columns: &[&str]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text, DELIMITER E'\\t', NULL '')",
        quote_ident(table),
        column_list
    )
}

/// Serialize a chunk for `COPY` text format: tab-separated, NULL as empty
pub fn encode_copy_text(chunk: &CleanChunk) -> Vec<u8> {
    // Rows of one kind are similar in size; the first one sizes the buffer
    let row_estimate = chunk.rows.first().map_or(0, |row| {
        row.iter()
            .map(|value| value.as_ref().map_or(0, String::len) + 1)
            .sum::<usize>()
    });
    let mut buf = Vec::with_capacity(row_estimate * chunk.len());

    for row in &chunk.rows {
        for (position, value) in row.iter().enumerate() {
            if position > 0 {
                buf.push(b'\t');
            }
            if let Some(text) = value {
                escape_copy_text(text, &mut buf);
            }
        }
        buf.push(b'\n');
    }

    buf
}

/// Escape special characters for COPY text format
fn escape_copy_text(s: &str, buf: &mut Vec<u8>) {
    for c in s.chars() {
        match c {
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\t' => buf.extend_from_slice(b"\\t"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            _ => {
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            },
        }
    }
}
