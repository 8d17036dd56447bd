//! Batch runs over competence directories
//!
//! The data directory holds one subdirectory per competence:
//!
//! ```text
//! data/raw/
//! ├── 2024-04/
//! │   ├── Cnaes.zip
//! │   ├── Empresas0.zip
//! │   └── ...
//! └── 2024-05/
//! ```
//!
//! Competences run in ascending order, archives within a competence in sorted
//! file-name order, one at a time.

use cnpj_common::Competence;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Instrument};

use crate::audit::{AuditLog, LoadStatus};
use crate::error::{IngestError, Result};
use crate::loader::CopyTarget;
use crate::orchestrator::{FileReport, LoadContext, LoadOptions, LoadOrchestrator};

/// Competence subdirectories of `data_dir`, ascending
///
/// Entries whose name is not a valid `YYYY-MM` are ignored.
pub fn discover_competences(data_dir: &Path) -> Result<Vec<Competence>> {
    let mut competences = Vec::new();

    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(competence) = name.to_str().and_then(|n| n.parse::<Competence>().ok()) {
            competences.push(competence);
        }
    }

    competences.sort();
    Ok(competences)
}

/// `*.zip` files of one directory, sorted by file name
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip && path.is_file() {
            archives.push(path);
        }
    }

    archives.sort();
    Ok(archives)
}

/// Reports of one competence
#[derive(Debug, Clone, Serialize)]
pub struct CompetenceReport {
    pub competence: Competence,
    pub files: Vec<FileReport>,
}

impl CompetenceReport {
    pub fn rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows).sum()
    }

    pub fn errors(&self) -> usize {
        self.files.iter().map(|f| f.errors.len()).sum()
    }
}

/// Totals of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub competences: Vec<CompetenceReport>,
    /// Competences requested but skipped (missing directory or no archives)
    pub skipped: Vec<Competence>,
}

impl RunSummary {
    pub fn files(&self) -> usize {
        self.competences.iter().map(|c| c.files.len()).sum()
    }

    pub fn rows(&self) -> u64 {
        self.competences.iter().map(CompetenceReport::rows).sum()
    }

    pub fn errors(&self) -> usize {
        self.competences.iter().map(CompetenceReport::errors).sum()
    }

    pub fn count(&self, status: LoadStatus) -> usize {
        self.competences
            .iter()
            .flat_map(|c| &c.files)
            .filter(|f| f.status == status)
            .count()
    }

    /// No archive ended `FAILED` or `PARTIAL`
    pub fn is_clean(&self) -> bool {
        self.count(LoadStatus::Failed) == 0 && self.count(LoadStatus::Partial) == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Load Summary:\n\
             - Competences loaded: {}\n\
             - Competences skipped: {}\n\
             - Files processed: {}\n\
             - Rows loaded: {}\n\
             - Errors: {}\n\
             - Success: {}\n\
             - Partial: {}\n\
             - Failed: {}",
            self.competences.len(),
            self.skipped.len(),
            self.files(),
            self.rows(),
            self.errors(),
            self.count(LoadStatus::Success),
            self.count(LoadStatus::Partial),
            self.count(LoadStatus::Failed),
        )
    }
}

/// Runs competences sequentially through one [`LoadOrchestrator`]
pub struct BatchRunner<T, A> {
    orchestrator: LoadOrchestrator<T, A>,
    data_dir: PathBuf,
    options: LoadOptions,
    show_progress: bool,
}

impl<T: CopyTarget, A: AuditLog> BatchRunner<T, A> {
    pub fn new(orchestrator: LoadOrchestrator<T, A>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            data_dir: data_dir.into(),
            options: LoadOptions::default(),
            show_progress: false,
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Draw a progress bar per competence on stderr
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn orchestrator(&self) -> &LoadOrchestrator<T, A> {
        &self.orchestrator
    }

    /// Every competence directory found under the data directory
    pub async fn run_all(&self) -> Result<RunSummary> {
        let competences = discover_competences(&self.data_dir)?;
        if competences.is_empty() {
            return Err(IngestError::Config(format!(
                "No competence directories found in {}",
                self.data_dir.display()
            )));
        }
        self.run(&competences).await
    }

    /// The given competences, in order
    ///
    /// Stops early only on an error that is fatal to the run.
    pub async fn run(&self, competences: &[Competence]) -> Result<RunSummary> {
        info!(
            competences = competences.len(),
            data_dir = %self.data_dir.display(),
            "Starting load"
        );

        let mut summary = RunSummary::default();
        for competence in competences {
            match self.run_competence(competence).await? {
                Some(report) => summary.competences.push(report),
                None => summary.skipped.push(competence.clone()),
            }
        }

        info!(
            files = summary.files(),
            rows = summary.rows(),
            errors = summary.errors(),
            "Load finished"
        );

        Ok(summary)
    }

    /// One competence; `None` when it has nothing to load
    pub async fn run_competence(
        &self,
        competence: &Competence,
    ) -> Result<Option<CompetenceReport>> {
        let ctx = LoadContext::new(competence.clone(), self.options);
        let dir = self.data_dir.join(competence.as_str());

        self.load_competence(&ctx, &dir)
            .instrument(ctx.span().clone())
            .await
    }

    async fn load_competence(
        &self,
        ctx: &LoadContext,
        dir: &Path,
    ) -> Result<Option<CompetenceReport>> {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Competence directory not found");
            return Ok(None);
        }

        let archives = list_archives(dir)?;
        if archives.is_empty() {
            warn!(dir = %dir.display(), "No archives in competence directory");
            return Ok(None);
        }

        info!(files = archives.len(), "Loading competence");

        let pb = self.progress_bar(archives.len() as u64, &ctx.competence);
        let mut files = Vec::with_capacity(archives.len());

        for path in &archives {
            let report = self.orchestrator.load_file(ctx, path).await?;

            for message in report.error_excerpt() {
                warn!(arquivo = %report.archive, "{}", message);
            }

            pb.inc(1);
            files.push(report);
        }
        pb.finish_and_clear();

        Ok(Some(CompetenceReport {
            competence: ctx.competence.clone(),
            files,
        }))
    }

    fn progress_bar(&self, len: u64, competence: &Competence) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(competence.to_string());
        pb
    }
}
