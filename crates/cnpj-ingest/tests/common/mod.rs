//! Shared fixtures for the pipeline tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cnpj_common::Competence;
use cnpj_ingest::audit::{AuditCompletion, AuditLog, LoadStatus};
use cnpj_ingest::{CopyTarget, IngestError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One COPY received by [`MemoryCopyTarget`]
#[derive(Debug, Clone)]
pub struct CopyCall {
    pub table: String,
    pub statement: String,
    pub lines: Vec<String>,
}

#[derive(Default)]
struct CopyState {
    calls: usize,
    copies: Vec<CopyCall>,
    truncated: Vec<String>,
    tables: HashMap<String, Vec<String>>,
}

/// In-memory copy target holding each table's rows as COPY text lines
#[derive(Default)]
pub struct MemoryCopyTarget {
    state: Mutex<CopyState>,
    fail_on_call: Option<usize>,
}

impl MemoryCopyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th copy (1-based)
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_call: Some(n),
            ..Self::default()
        }
    }

    pub fn rows_in(&self, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.tables.get(table).cloned().unwrap_or_default()
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.state.lock().unwrap().copies.clone()
    }

    pub fn truncated(&self) -> Vec<String> {
        self.state.lock().unwrap().truncated.clone()
    }
}

#[async_trait]
impl CopyTarget for MemoryCopyTarget {
    async fn copy_in(&self, table: &str, statement: &str, payload: Vec<u8>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if self.fail_on_call == Some(state.calls) {
            return Err(IngestError::Copy {
                table: table.to_string(),
                source: sqlx::Error::Protocol("injected copy failure".to_string()),
            });
        }

        let text = String::from_utf8(payload).unwrap();
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let copied = lines.len() as u64;

        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(lines.iter().cloned());
        state.copies.push(CopyCall {
            table: table.to_string(),
            statement: statement.to_string(),
            lines,
        });

        Ok(copied)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.truncated.push(table.to_string());
        state.tables.remove(table);
        Ok(())
    }
}

/// One audit record kept by [`MemoryAuditLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub id: i64,
    pub archive: String,
    pub competence: String,
    pub status: LoadStatus,
    pub rows: u64,
    pub erro: Option<String>,
    pub finish_calls: usize,
}

#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<MemoryRecord>>,
    fail_on_start: bool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            fail_on_start: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<MemoryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn start(&self, archive: &str, competence: &Competence) -> Result<i64> {
        if self.fail_on_start {
            return Err(IngestError::Audit("audit store unavailable".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        let id = records.len() as i64 + 1;
        records.push(MemoryRecord {
            id,
            archive: archive.to_string(),
            competence: competence.to_string(),
            status: LoadStatus::Started,
            rows: 0,
            erro: None,
            finish_calls: 0,
        });
        Ok(id)
    }

    async fn finish(&self, id: i64, completion: &AuditCompletion) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| IngestError::Audit(format!("audit record {id} not found")))?;

        record.status = completion.status;
        record.rows = completion.rows;
        record.erro = completion.error_text();
        record.finish_calls += 1;
        Ok(())
    }
}

pub fn competence(raw: &str) -> Competence {
    raw.parse().unwrap()
}

const DATA_MEMBER: &str = "K3241.K03200Y0.D40511.DATA";

fn write_member(path: &Path, options: zip::write::SimpleFileOptions, lines: &[String]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    writer.start_file(DATA_MEMBER, options).unwrap();
    for line in lines {
        writer.write_all(line.as_bytes()).unwrap();
        writer.write_all(b"\n").unwrap();
    }
    writer.finish().unwrap();
}

/// Write a zip at `dir/name` with one data member holding `lines`
pub fn write_archive(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    write_member(&path, zip::write::SimpleFileOptions::default(), lines);
    path
}

/// Write an uncompressed zip, then uppercase the first `marker` in its data
///
/// The member reads normally until its end, where the checksum no longer
/// matches and the read fails.
pub fn write_corrupted_archive(dir: &Path, name: &str, lines: &[String], marker: &str) -> PathBuf {
    let path = dir.join(name);
    let stored =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    write_member(&path, stored, lines);

    let mut bytes = std::fs::read(&path).unwrap();
    let at = bytes
        .windows(marker.len())
        .position(|window| window == marker.as_bytes())
        .unwrap();
    bytes[at..at + marker.len()].make_ascii_uppercase();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Write a zip with no members at all
pub fn write_empty_archive(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    zip::ZipWriter::new(File::create(&path).unwrap()).finish().unwrap();
    path
}

/// Join fields the way the registry publishes them: quoted, `;` separated
pub fn record(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(";")
}

/// A 30-field establishment line for `cnpj_basico`
pub fn establishment(cnpj_basico: &str) -> String {
    let mut fields = vec![""; 30];
    fields[0] = cnpj_basico;
    fields[1] = "0001";
    fields[2] = "91";
    fields[3] = "1";
    fields[4] = "padaria central";
    fields[5] = "02";
    fields[6] = "20050103";
    fields[7] = "00";
    fields[9] = "105";
    fields[10] = "19990615";
    fields[11] = "1091102";
    fields[13] = "RUA";
    fields[14] = "das flores";
    fields[19] = "SP";
    fields[20] = "7107";
    fields[29] = "00000000";
    record(&fields)
}

/// A 7-field company line
pub fn company(cnpj_basico: &str, name: &str) -> String {
    record(&[cnpj_basico, name, "2062", "49", "1000,00", "01", ""])
}
