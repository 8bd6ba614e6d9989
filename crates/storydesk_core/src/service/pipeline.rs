//! Batch resolution pipeline.
//!
//! # Responsibility
//! - Check batch preconditions before any mutation.
//! - Run classify → arbitrate → apply for each candidate in batch order.
//! - Regenerate the date's publication once the batch is done.
//!
//! # Invariants
//! - Candidates are applied one at a time, so later candidates are
//!   classified against articles committed earlier in the same batch.
//! - Arbitration and apply failures stay with their candidate; the rest of
//!   the batch continues.
//! - A date with unresolved candidates cannot be ingested again.

use crate::arbiter::Arbiter;
use crate::config::{ResolutionConfig, Thresholds};
use crate::db::DbError;
use crate::model::candidate::{Candidate, CandidateBatch, CandidateValidationError};
use crate::model::resolution::Resolution;
use crate::repo::candidate_repo::{CandidateRepository, SqliteCandidateRepository, StageOutcome};
use crate::repo::RepoError;
use crate::search::index::{CorpusIndex, IndexError};
use crate::service::applier::{ApplyError, ResolutionApplier};
use crate::service::arbitration::ArbitrationService;
use crate::service::classifier::SimilarityClassifier;
use crate::service::decision::decide_from_score;
use crate::service::publication::{PublicationRegenerator, RegenerationError};
use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Batch-level failure. Per-candidate failures are reported in
/// `BatchSummary::failures` instead.
#[derive(Debug)]
pub enum PipelineError {
    EmptyBatch {
        date: NaiveDate,
    },
    InvalidBatch {
        date: NaiveDate,
        reason: CandidateValidationError,
    },
    UnresolvedCandidates {
        date: NaiveDate,
        count: u64,
    },
    IndexCorrupted {
        date: NaiveDate,
        detail: String,
    },
    Db(DbError),
    Repo(RepoError),
    Index(IndexError),
    Regeneration(RegenerationError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyBatch { date } => write!(f, "batch for {date} contains no candidates"),
            Self::InvalidBatch { date, reason } => write!(f, "invalid batch for {date}: {reason}"),
            Self::UnresolvedCandidates { date, count } => write!(
                f,
                "{count} candidates for {date} are still unresolved; retry them before ingesting again"
            ),
            Self::IndexCorrupted { date, detail } => write!(
                f,
                "corpus index is corrupted, batch for {date} aborted; rebuild the index first: {detail}"
            ),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::Regeneration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidBatch { reason, .. } => Some(reason),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Index(err) => Some(err),
            Self::Regeneration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for PipelineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<RegenerationError> for PipelineError {
    fn from(value: RegenerationError) -> Self {
        Self::Regeneration(value)
    }
}

/// Stage at which a single candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Stage,
    Arbitrate,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateFailure {
    pub candidate_id: String,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationSummary {
    pub article_count: usize,
    pub changed: bool,
}

/// Operator-facing result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub date: NaiveDate,
    pub processed: usize,
    pub already_resolved: usize,
    pub new: usize,
    pub duplicate_auto: usize,
    pub duplicate_confirmed: usize,
    pub merged: usize,
    /// Arbitration failed; status `failed`.
    pub failed: usize,
    /// Apply rolled back; status `pending`.
    pub pending: usize,
    pub failures: Vec<CandidateFailure>,
    pub publication: Option<PublicationSummary>,
    /// Earlier dates regenerated because a merge changed an article's severity.
    pub refreshed_dates: Vec<NaiveDate>,
}

impl BatchSummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            processed: 0,
            already_resolved: 0,
            new: 0,
            duplicate_auto: 0,
            duplicate_confirmed: 0,
            merged: 0,
            failed: 0,
            pending: 0,
            failures: Vec::new(),
            publication: None,
            refreshed_dates: Vec::new(),
        }
    }

    pub fn resolved(&self) -> usize {
        self.new + self.duplicate_auto + self.duplicate_confirmed + self.merged
    }

    /// Whether any candidate still needs a retry.
    pub fn has_unresolved(&self) -> bool {
        self.failed > 0 || self.pending > 0
    }

    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::New => self.new += 1,
            Resolution::DuplicateAuto => self.duplicate_auto += 1,
            Resolution::DuplicateConfirmed => self.duplicate_confirmed += 1,
            Resolution::MergePending | Resolution::Merged => self.merged += 1,
        }
    }

    fn fail(&mut self, candidate_id: &str, stage: FailureStage, message: String) {
        match stage {
            FailureStage::Arbitrate => self.failed += 1,
            FailureStage::Stage | FailureStage::Apply => self.pending += 1,
        }
        self.failures.push(CandidateFailure {
            candidate_id: candidate_id.to_string(),
            stage,
            message,
        });
    }
}

/// Sequential classify → arbitrate → apply → regenerate driver.
pub struct ResolutionPipeline<A> {
    index: CorpusIndex,
    thresholds: Thresholds,
    arbitration: ArbitrationService<A>,
    regenerator: PublicationRegenerator,
}

impl<A: Arbiter> ResolutionPipeline<A> {
    pub fn new(index: CorpusIndex, config: &ResolutionConfig, arbiter: A) -> Self {
        Self {
            index,
            thresholds: config.thresholds,
            arbitration: ArbitrationService::new(arbiter, config.arbitration.max_matches),
            regenerator: PublicationRegenerator::new(),
        }
    }

    /// Picks up recalibrated thresholds for the next batch.
    pub fn reconfigure(&mut self, config: &ResolutionConfig) {
        self.thresholds = config.thresholds;
        self.arbitration
            .set_max_matches(config.arbitration.max_matches);
    }

    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    pub fn arbiter(&self) -> &A {
        self.arbitration.arbiter()
    }

    pub fn into_index(self) -> CorpusIndex {
        self.index
    }

    /// Resolves a full batch.
    ///
    /// # Errors
    /// Precondition failures abort before anything is written.
    pub fn ingest_batch(
        &self,
        conn: &mut Connection,
        batch: &CandidateBatch,
    ) -> PipelineResult<BatchSummary> {
        let started_at = Instant::now();
        let date = batch.date;
        info!(
            "event=batch_ingest module=pipeline status=start date={date} candidates={}",
            batch.candidates.len()
        );

        let result = self.ingest_inner(conn, batch);
        log_batch_result("batch_ingest", date, started_at, &result);
        result
    }

    /// Re-runs the `pending` and `failed` candidates of `date` in batch order.
    pub fn retry_unresolved(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
    ) -> PipelineResult<BatchSummary> {
        let started_at = Instant::now();
        info!("event=batch_retry module=pipeline status=start date={date}");

        let result = (|| -> PipelineResult<BatchSummary> {
            self.verify_index(conn, date)?;
            let candidates = SqliteCandidateRepository::try_new(conn)?.list_unresolved(date)?;
            let mut summary = BatchSummary::new(date);
            self.process(conn, date, &candidates, &mut summary)?;
            Ok(summary)
        })();
        log_batch_result("batch_retry", date, started_at, &result);
        result
    }

    /// Regenerates the publication of `date` without touching candidates.
    pub fn regenerate(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
    ) -> PipelineResult<PublicationSummary> {
        let outcome = self.regenerator.regenerate(conn, date)?;
        Ok(PublicationSummary {
            article_count: outcome.publication.article_ids.len(),
            changed: outcome.changed,
        })
    }

    fn ingest_inner(
        &self,
        conn: &mut Connection,
        batch: &CandidateBatch,
    ) -> PipelineResult<BatchSummary> {
        let date = batch.date;
        batch.validate().map_err(|reason| match reason {
            CandidateValidationError::EmptyBatch => PipelineError::EmptyBatch { date },
            reason => PipelineError::InvalidBatch { date, reason },
        })?;

        let unresolved = SqliteCandidateRepository::try_new(conn)?.count_unresolved(date)?;
        if unresolved > 0 {
            return Err(PipelineError::UnresolvedCandidates {
                date,
                count: unresolved,
            });
        }
        self.verify_index(conn, date)?;

        let mut summary = BatchSummary::new(date);
        let to_process = {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let candidates = SqliteCandidateRepository::try_new(&tx)?;
            let first_position = candidates.next_position(date)?;
            let mut to_process = Vec::new();
            for (offset, candidate) in batch.candidates.iter().enumerate() {
                match candidates.stage(date, first_position + offset as u32, candidate)? {
                    StageOutcome::Staged => to_process.push(candidate.clone()),
                    StageOutcome::AlreadyResolved(_) => summary.already_resolved += 1,
                    StageOutcome::AlreadyStaged(record) => summary.fail(
                        &candidate.id,
                        FailureStage::Stage,
                        format!(
                            "candidate is already staged for {} and still {}",
                            record.batch_date,
                            record.status.as_str()
                        ),
                    ),
                }
            }
            drop(candidates);
            tx.commit()?;
            to_process
        };

        self.process(conn, date, &to_process, &mut summary)?;
        Ok(summary)
    }

    fn verify_index(&self, conn: &Connection, date: NaiveDate) -> PipelineResult<()> {
        match self.index.verify(conn) {
            Ok(()) => Ok(()),
            Err(IndexError::Corrupted { detail }) => {
                Err(PipelineError::IndexCorrupted { date, detail })
            }
            Err(err) => Err(PipelineError::Index(err)),
        }
    }

    fn process(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
        candidates: &[Candidate],
        summary: &mut BatchSummary,
    ) -> PipelineResult<()> {
        let mut stale_dates = BTreeSet::new();
        for candidate in candidates {
            summary.processed += 1;
            self.process_one(conn, date, candidate, summary, &mut stale_dates)?;
        }

        if summary.resolved() > 0 {
            let outcome = self.regenerator.regenerate(conn, date)?;
            summary.publication = Some(PublicationSummary {
                article_count: outcome.publication.article_ids.len(),
                changed: outcome.changed,
            });
        }
        for stale_date in stale_dates.into_iter().filter(|stale| *stale != date) {
            self.regenerator.regenerate(conn, stale_date)?;
            summary.refreshed_dates.push(stale_date);
        }
        Ok(())
    }

    fn process_one(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
        candidate: &Candidate,
        summary: &mut BatchSummary,
        stale_dates: &mut BTreeSet<NaiveDate>,
    ) -> PipelineResult<()> {
        let classifier = SimilarityClassifier::new(&self.index, self.thresholds);
        let classification = match classifier.classify(conn, candidate) {
            Ok(classification) => classification,
            Err(IndexError::Corrupted { detail }) => {
                return Err(PipelineError::IndexCorrupted { date, detail })
            }
            Err(err) => return Err(PipelineError::Index(err)),
        };

        let decision = match decide_from_score(&classification) {
            Some(decision) => decision,
            None => {
                let decided = match self
                    .arbitration
                    .build_request(conn, candidate, &classification)
                {
                    Ok(request) => self
                        .arbitration
                        .decide(&request, &classification)
                        .map_err(|err| (err.code(), err.to_string())),
                    Err(err) => Err(("request_load", err.to_string())),
                };
                match decided {
                    Ok(decision) => decision,
                    Err((error_code, message)) => {
                        warn!(
                            "event=arbitrate module=pipeline status=error candidate_id={} error_code={error_code} outcome=failed",
                            candidate.id
                        );
                        SqliteCandidateRepository::try_new(conn)?.mark_failed(
                            &candidate.id,
                            classification.tier,
                            classification.score(),
                            &message,
                        )?;
                        summary.fail(&candidate.id, FailureStage::Arbitrate, message);
                        return Ok(());
                    }
                }
            }
        };

        let applier = ResolutionApplier::new(&self.index);
        match applier.apply(conn, date, candidate, &decision) {
            Ok(applied) => {
                stale_dates.extend(applied.severity_changed_on);
                if applied.changed {
                    summary.record(applied.resolution);
                } else {
                    summary.already_resolved += 1;
                }
            }
            Err(err @ ApplyError::AlreadyResolved { .. }) => {
                // Candidate keeps its committed resolution; report the conflict only.
                summary.failures.push(CandidateFailure {
                    candidate_id: candidate.id.clone(),
                    stage: FailureStage::Apply,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                SqliteCandidateRepository::try_new(conn)?
                    .record_apply_error(&candidate.id, &err.to_string())?;
                summary.fail(&candidate.id, FailureStage::Apply, err.to_string());
            }
        }
        Ok(())
    }
}

fn log_batch_result(
    event: &str,
    date: NaiveDate,
    started_at: Instant,
    result: &PipelineResult<BatchSummary>,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(summary) => info!(
            "event={event} module=pipeline status=ok date={date} processed={} new={} duplicate_auto={} duplicate_confirmed={} merged={} failed={} pending={} already_resolved={} duration_ms={duration_ms}",
            summary.processed,
            summary.new,
            summary.duplicate_auto,
            summary.duplicate_confirmed,
            summary.merged,
            summary.failed,
            summary.pending,
            summary.already_resolved
        ),
        Err(err) => warn!(
            "event={event} module=pipeline status=error date={date} duration_ms={duration_ms} error={err}"
        ),
    }
}
