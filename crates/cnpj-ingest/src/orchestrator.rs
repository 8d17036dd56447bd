//! Per-archive load orchestration
//!
//! Drives one archive through classify, replace policy, extract, then a
//! transform-and-load loop over its chunks, and records one audit entry:
//!
//! ```text
//! STARTED ──> SUCCESS   no errors
//!         ├─> PARTIAL   rows loaded, some errors
//!         └─> FAILED    no rows loaded, some errors
//! ```
//!
//! Only an audit failure propagates as `Err`; every other failure is recorded
//! against the archive and the caller moves on to the next one.

use cnpj_common::Competence;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::audit::{AuditCompletion, AuditLog, LoadStatus, ERROR_EXCERPT};
use crate::classifier::classify_or_err;
use crate::error::Result;
use crate::extract::{DataArchive, DEFAULT_CHUNK_SIZE};
use crate::layout::EntityKind;
use crate::loader::{BulkLoader, CopyTarget};
use crate::transform::{transform_chunk, Strictness};

/// Options shared by every archive of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Apply the replace policy before loading
    pub replace: bool,
    pub strictness: Strictness,
    pub chunk_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            replace: false,
            strictness: Strictness::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Explicit per-competence context handed to the orchestrator
///
/// Owns the span every event of the competence is recorded under.
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub competence: Competence,
    pub options: LoadOptions,
    span: Span,
}

impl LoadContext {
    pub fn new(competence: Competence, options: LoadOptions) -> Self {
        let span = info_span!("load", competencia = %competence);
        Self {
            competence,
            options,
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Result of loading one archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub archive: String,
    pub kind: Option<EntityKind>,
    pub rows: u64,
    pub status: LoadStatus,
    /// Every error collected, in order; the audit record keeps the first ten
    pub errors: Vec<String>,
    /// Malformed source lines skipped while decoding
    pub dropped_rows: usize,
}

impl FileReport {
    /// First few errors, for immediate operator display
    pub fn error_excerpt(&self) -> &[String] {
        &self.errors[..self.errors.len().min(ERROR_EXCERPT)]
    }
}

#[derive(Default)]
struct FileProgress {
    kind: Option<EntityKind>,
    rows: u64,
    errors: Vec<String>,
    dropped_rows: usize,
}

/// Loads archives one at a time through a [`BulkLoader`] and an [`AuditLog`]
pub struct LoadOrchestrator<T, A> {
    loader: BulkLoader<T>,
    audit: A,
}

impl<T: CopyTarget, A: AuditLog> LoadOrchestrator<T, A> {
    pub fn new(target: T, audit: A) -> Self {
        Self {
            loader: BulkLoader::new(target),
            audit,
        }
    }

    pub fn loader(&self) -> &BulkLoader<T> {
        &self.loader
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// Load one archive end to end
    ///
    /// Exactly one audit record is created and finalized per call. The record
    /// stays `STARTED` only if finalizing it fails, which is returned as an
    /// error.
    pub async fn load_file(&self, ctx: &LoadContext, path: &Path) -> Result<FileReport> {
        let archive = archive_name(path);
        let span = info_span!(parent: ctx.span(), "file", arquivo = %archive);

        self.load_and_audit(ctx, path, archive).instrument(span).await
    }

    async fn load_and_audit(
        &self,
        ctx: &LoadContext,
        path: &Path,
        archive: String,
    ) -> Result<FileReport> {
        let audit_id = self.audit.start(&archive, &ctx.competence).await?;

        let progress = self.process(ctx, path, &archive).await;
        let status = LoadStatus::classify(progress.rows, progress.errors.len());

        let completion = AuditCompletion {
            rows: progress.rows,
            status,
            errors: progress.errors,
        };
        self.audit.finish(audit_id, &completion).await?;

        match status {
            LoadStatus::Success => {
                info!(rows = completion.rows, dropped = progress.dropped_rows, "Archive loaded")
            },
            _ => warn!(
                rows = completion.rows,
                errors = completion.errors.len(),
                status = %status,
                "Archive loaded with errors"
            ),
        }

        Ok(FileReport {
            archive,
            kind: progress.kind,
            rows: completion.rows,
            status,
            errors: completion.errors,
            dropped_rows: progress.dropped_rows,
        })
    }

    async fn process(&self, ctx: &LoadContext, path: &Path, archive: &str) -> FileProgress {
        let mut progress = FileProgress::default();

        let kind = match classify_or_err(archive) {
            Ok(kind) => kind,
            Err(e) => {
                error!(error = %e, "Skipping archive");
                progress.errors.push(e.to_string());
                return progress;
            },
        };
        progress.kind = Some(kind);
        let layout = kind.layout();

        if ctx.options.replace {
            if layout.domain {
                if let Err(e) = self.loader.truncate(layout.table).await {
                    let message = format!("Failed to truncate {}: {e}", layout.table);
                    error!(table = layout.table, error = %e, "Replace failed");
                    progress.errors.push(message);
                    return progress;
                }
                info!(table = layout.table, "Truncated domain table");
            } else {
                warn!(
                    table = layout.table,
                    "Replace is not applied to versioned tables; clear or purge the competence explicitly if needed"
                );
            }
        }

        let mut data = match DataArchive::open(path) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "Failed to open archive");
                progress.errors.push(e.to_string());
                return progress;
            },
        };

        let mut chunks = match data.chunks(layout.width(), ctx.options.chunk_size) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(error = %e, "Failed to open data member");
                progress.errors.push(e.to_string());
                return progress;
            },
        };

        let mut next_index = 0;
        for item in &mut chunks {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    let message = format!("Chunk {next_index} of {archive}: {e}");
                    error!(chunk = next_index, error = %e, "Archive stream ended early");
                    progress.errors.push(message);
                    break;
                },
            };
            let index = raw.index;
            next_index = index + 1;

            let loaded = match transform_chunk(raw, kind, &ctx.competence, ctx.options.strictness) {
                Ok(clean) => self.loader.load(layout.table, &clean).await,
                Err(e) => Err(e),
            };

            match loaded {
                Ok(rows) => progress.rows += rows,
                Err(e) => {
                    let message = format!("Chunk {index} of {archive}: {e}");
                    error!(chunk = index, error = %e, "Chunk skipped");
                    progress.errors.push(message);
                },
            }
        }

        progress.dropped_rows = chunks.dropped_rows();
        progress
    }
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn report(errors: usize) -> FileReport {
        FileReport {
            archive: "Socios0.zip".to_string(),
            kind: Some(EntityKind::Partner),
            rows: 0,
            status: LoadStatus::Failed,
            errors: (0..errors).map(|i| format!("error {i}")).collect(),
            dropped_rows: 0,
        }
    }

    #[test]
    fn test_error_excerpt_is_bounded() {
        assert_eq!(report(0).error_excerpt().len(), 0);
        assert_eq!(report(2).error_excerpt().len(), 2);
        assert_eq!(report(7).error_excerpt(), &["error 0", "error 1", "error 2"]);
    }

    #[test]
    fn test_default_options() {
        let options = LoadOptions::default();
        assert!(!options.replace);
        assert_eq!(options.strictness, Strictness::Lenient);
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_archive_name_is_the_file_name() {
        assert_eq!(archive_name(Path::new("data/raw/2024-05/Cnaes.zip")), "Cnaes.zip");
    }
}
