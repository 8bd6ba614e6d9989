//! Operator entry point for the resolution engine.
//!
//! Runs one batch job per invocation and prints JSON results on stdout.
//! Exits with status 2 when candidates are left failed or pending.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use storydesk_core::repo::article_repo::{ArticleRepository, LookupPath, SqliteArticleRepository};
use storydesk_core::repo::candidate_repo::{CandidateRepository, SqliteCandidateRepository};
use storydesk_core::{
    default_log_level, init_logging, open_db, Article, ArticleUpdate, Candidate, CandidateBatch,
    ConfigStore, CorpusIndex, IndexError, OpenAiArbiter, PipelineError, PublicationRegenerator,
    ResolutionConfig, ResolutionPipeline, RetryingArbiter,
};

const UNRESOLVED_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(name = "storydesk")]
#[command(about = "Resolve daily candidate batches into canonical news articles")]
#[command(version)]
struct Cli {
    /// SQLite store path
    #[arg(long, env = "STORYDESK_DB", default_value = "storydesk.db", global = true)]
    db: PathBuf,

    /// JSON config file; defaults apply when omitted
    #[arg(long, env = "STORYDESK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "STORYDESK_LOG_DIR", default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[arg(long, env = "STORYDESK_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a new candidate batch for a date
    Ingest {
        #[arg(long)]
        date: NaiveDate,
        /// JSON file: a candidate array or a `{date, candidates}` object
        #[arg(long)]
        batch: PathBuf,
    },

    /// Re-run pending and failed candidates of a date
    Retry {
        #[arg(long)]
        date: NaiveDate,
    },

    /// Drop and rebuild the corpus index from the article store
    RebuildIndex,

    /// Recompute the publication of a date
    Regenerate {
        #[arg(long)]
        date: NaiveDate,
    },

    /// Show an article by id, slug or candidate id
    Show { id: String },

    /// List resolution records of a date
    Audit {
        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Serialize)]
struct ShowResponse {
    via: String,
    article: Article,
    updates: Vec<ArticleUpdate>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    init_logging(&level, &cli.log_dir).map_err(anyhow::Error::msg)?;

    let config = load_config(cli.config.as_deref())?;
    let mut conn = open_db(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?;

    match cli.command {
        Commands::Ingest { date, batch } => {
            let batch = read_batch(&batch, date)?;
            let pipeline = build_pipeline(&conn, &config, date)?;
            let summary = pipeline.ingest_batch(&mut conn, &batch)?;
            print_json(&summary)?;
            Ok(exit_for(summary.has_unresolved()))
        }
        Commands::Retry { date } => {
            let pipeline = build_pipeline(&conn, &config, date)?;
            let summary = pipeline.retry_unresolved(&mut conn, date)?;
            print_json(&summary)?;
            Ok(exit_for(summary.has_unresolved()))
        }
        Commands::RebuildIndex => {
            let (index, report) =
                CorpusIndex::rebuild_from_store(&mut conn, config.index.clone())?;
            index.close();
            print_json(&serde_json::json!({
                "indexed": report.indexed,
                "duration_ms": report.duration_ms as u64,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Regenerate { date } => {
            let outcome = PublicationRegenerator::new().regenerate(&mut conn, date)?;
            print_json(&serde_json::json!({
                "publication": outcome.publication,
                "changed": outcome.changed,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { id } => {
            let articles = SqliteArticleRepository::try_new(&conn)?;
            let Some(resolved) = articles.lookup(&id)? else {
                bail!("no article or resolved candidate matches `{id}`");
            };
            let updates = articles.list_updates(resolved.article.id)?;
            let via = match resolved.via {
                LookupPath::ArticleId => "article_id".to_string(),
                LookupPath::Slug => "slug".to_string(),
                LookupPath::SourceCandidate => "source_candidate".to_string(),
                LookupPath::Redirect {
                    candidate_id,
                    resolution,
                } => format!("redirect:{candidate_id}:{}", resolution.as_str()),
            };
            print_json(&ShowResponse {
                via,
                article: resolved.article,
                updates,
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Audit { date } => {
            let records = SqliteCandidateRepository::try_new(&conn)?.list_for_date(date)?;
            let unresolved = records
                .iter()
                .any(|record| record.resolution.is_none());
            print_json(&records)?;
            Ok(exit_for(unresolved))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ResolutionConfig> {
    match path {
        Some(path) => Ok(ConfigStore::load(path)?.current().clone()),
        None => Ok(ResolutionConfig::default()),
    }
}

fn build_pipeline(
    conn: &storydesk_core::db::Connection,
    config: &ResolutionConfig,
    date: NaiveDate,
) -> Result<ResolutionPipeline<RetryingArbiter<OpenAiArbiter>>> {
    let index = CorpusIndex::open(conn, config.index.clone()).map_err(|err| match err {
        IndexError::Corrupted { detail } => PipelineError::IndexCorrupted { date, detail },
        other => PipelineError::Index(other),
    })?;
    let arbiter = RetryingArbiter::new(
        OpenAiArbiter::from_settings(&config.arbitration.endpoint)?,
        config.arbitration.retry.clone(),
    );
    info!(
        "event=pipeline_ready module=cli status=ok date={date} high={} low={}",
        config.thresholds.high, config.thresholds.low
    );
    Ok(ResolutionPipeline::new(index, config, arbiter))
}

fn read_batch(path: &Path, date: NaiveDate) -> Result<CandidateBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing batch file {}", path.display()))?;

    if value.is_array() {
        let candidates: Vec<Candidate> = serde_json::from_value(value)
            .with_context(|| format!("decoding candidates in {}", path.display()))?;
        return Ok(CandidateBatch::new(date, candidates));
    }

    let batch: CandidateBatch = serde_json::from_value(value)
        .with_context(|| format!("decoding batch in {}", path.display()))?;
    if batch.date != date {
        bail!(
            "batch file {} is dated {}, but --date is {date}",
            path.display(),
            batch.date
        );
    }
    Ok(batch)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_for(unresolved: bool) -> ExitCode {
    if unresolved {
        ExitCode::from(UNRESOLVED_EXIT_CODE)
    } else {
        ExitCode::SUCCESS
    }
}
