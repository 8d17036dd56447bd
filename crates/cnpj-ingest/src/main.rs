//! CNPJ Ingest - load the open CNPJ extracts into PostgreSQL

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig, LogLevel};
use cnpj_common::Competence;
use cnpj_ingest::audit::DEFAULT_AUDIT_QUERY_LIMIT;
use cnpj_ingest::clear::{clear_plan, clear_tables, purge_competence, DEFAULT_PURGE_BATCH_SIZE};
use cnpj_ingest::{
    BatchRunner, EntityKind, IngestConfig, LoadOptions, LoadOrchestrator, PgAuditLog,
    PgCopyTarget, Strictness, MIGRATOR,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about = "CNPJ open data loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one or every competence from the data directory
    Load(LoadArgs),

    /// Truncate the CNPJ tables
    Clear {
        /// Only the code-list tables
        #[arg(long)]
        domain_only: bool,

        /// Also truncate the load audit table
        #[arg(long)]
        include_audit: bool,

        /// Confirm the truncate
        #[arg(long)]
        yes: bool,
    },

    /// Delete one competence from the versioned tables in small batches
    Purge {
        #[arg(long, value_name = "YYYY-MM")]
        competencia: Competence,

        /// Restrict to one versioned kind (company, establishment, partner, simplified_tax_regime)
        #[arg(long)]
        kind: Option<EntityKind>,

        /// Rows deleted per transaction
        #[arg(long, default_value_t = DEFAULT_PURGE_BATCH_SIZE)]
        batch_size: i64,

        /// Confirm the delete
        #[arg(long)]
        yes: bool,
    },

    /// List recent load audit records
    Audit {
        #[arg(long, default_value_t = DEFAULT_AUDIT_QUERY_LIMIT)]
        limit: i64,

        #[arg(long, value_name = "YYYY-MM")]
        competencia: Option<Competence>,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false, id = "target")]
struct LoadSelection {
    /// Competence to load
    #[arg(long, value_name = "YYYY-MM")]
    competencia: Option<Competence>,

    /// Every competence directory under the data directory
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[command(flatten)]
    selection: LoadSelection,

    /// Truncate domain tables before loading them
    #[arg(long)]
    replace: bool,

    /// Fail chunks on malformed dates and identifiers
    #[arg(long)]
    strict: bool,

    #[arg(long, env = "CNPJ_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "CNPJ_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cnpj-ingest")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Load(args) => {
            if let Some(dir) = args.data_dir {
                config.data_dir = dir;
            }
            if let Some(size) = args.chunk_size {
                config.chunk_size = size;
            }
            if args.strict {
                config.strictness = Strictness::Strict;
            }
            config.validate()?;

            let pool = config.connect().await.context("Failed to connect to database")?;
            let options = LoadOptions {
                replace: args.replace,
                strictness: config.strictness,
                chunk_size: config.chunk_size,
            };

            let orchestrator =
                LoadOrchestrator::new(PgCopyTarget::new(pool.clone()), PgAuditLog::new(pool));
            let runner = BatchRunner::new(orchestrator, &config.data_dir)
                .with_options(options)
                .with_progress(!args.json);

            let summary = match args.selection.competencia {
                Some(competence) if !args.selection.all => runner.run(&[competence]).await?,
                _ => runner.run_all().await?,
            };

            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
        },
        Command::Clear {
            domain_only,
            include_audit,
            yes,
        } => {
            if !yes {
                bail!("Refusing to truncate tables without --yes");
            }

            let pool = config.connect().await.context("Failed to connect to database")?;
            let tables = clear_plan(domain_only, include_audit);
            warn!(tables = tables.len(), "Truncating CNPJ tables");

            let outcomes = clear_tables(&PgCopyTarget::new(pool), &tables).await;
            let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(()) => println!("truncated  {}", outcome.table),
                    Err(e) => println!("failed     {}: {e}", outcome.table),
                }
            }

            if !failed.is_empty() {
                bail!("{} of {} tables could not be truncated", failed.len(), outcomes.len());
            }
        },
        Command::Purge {
            competencia,
            kind,
            batch_size,
            yes,
        } => {
            if !yes {
                bail!("Refusing to delete competence {competencia} without --yes");
            }

            let pool = config.connect().await.context("Failed to connect to database")?;
            let stats = purge_competence(&pool, &competencia, kind, batch_size).await?;
            for s in &stats {
                println!("{:<22} {:>12} rows in {} batches", s.table, s.deleted, s.batches);
            }
        },
        Command::Audit { limit, competencia } => {
            let pool = config.connect().await.context("Failed to connect to database")?;
            let records = PgAuditLog::new(pool).recent(limit, competencia.as_ref()).await?;

            for record in &records {
                let status = if record.is_incomplete() {
                    "incomplete".to_string()
                } else {
                    record.status.clone()
                };
                println!(
                    "{:>6}  {}  {:<24} {:>12}  {:<10} {}",
                    record.id,
                    record.competencia,
                    record.arquivo,
                    record.qtd_registros,
                    status,
                    record.inicio.format("%Y-%m-%d %H:%M:%S"),
                );
                if let Some(erro) = &record.erro {
                    for line in erro.lines() {
                        println!("        {line}");
                    }
                }
            }
        },
        Command::Migrate => {
            let pool = config.connect().await.context("Failed to connect to database")?;
            MIGRATOR.run(&pool).await.context("Failed to run migrations")?;
            info!("Migrations applied");
        },
    }

    Ok(())
}
