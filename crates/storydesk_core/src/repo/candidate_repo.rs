//! Candidate staging and resolution-record repository.
//!
//! # Responsibility
//! - Stage incoming candidates as `pending` rows.
//! - Record committed resolutions, arbitration failures and apply errors.
//! - Serve audit queries over resolution records.
//!
//! # Invariants
//! - A `resolved` row is never rewritten.
//! - `failed` and `pending` rows keep their original batch position.

use crate::model::article::ArticleId;
use crate::model::candidate::{Candidate, CandidateId};
use crate::model::resolution::{
    CandidateStatus, Resolution, ResolutionReasoning, ResolutionRecord, Tier,
};
use crate::repo::support::{
    ensure_schema_ready, format_date, from_json, now_epoch_ms, parse_date,
    parse_optional_article_id, parse_severity, to_json,
};
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const RECORD_SELECT_SQL: &str = "SELECT
    id,
    batch_date,
    position,
    status,
    resolution,
    tier,
    similarity_score,
    matched_article_id,
    article_id,
    reasoning,
    attempts,
    last_error,
    resolved_at
FROM candidates";

const CANDIDATE_SELECT_SQL: &str = "SELECT
    id,
    batch_date,
    headline,
    summary,
    body,
    severity,
    tags,
    entities,
    sources
FROM candidates";

const MAX_ERROR_CHARS: usize = 500;

/// Result of staging one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Staged,
    /// Same id already committed; re-applying it is a no-op.
    AlreadyResolved(ResolutionRecord),
    /// Same id already waiting for resolution.
    AlreadyStaged(ResolutionRecord),
}

/// Resolution fields written when a candidate commits.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedResolution {
    pub resolution: Resolution,
    pub tier: Tier,
    pub similarity_score: Option<f64>,
    pub matched_article_id: Option<ArticleId>,
    pub article_id: ArticleId,
    pub reasoning: ResolutionReasoning,
}

/// Repository interface for candidate rows.
pub trait CandidateRepository {
    fn stage(&self, date: NaiveDate, position: u32, candidate: &Candidate)
        -> RepoResult<StageOutcome>;
    fn get_record(&self, candidate_id: &str) -> RepoResult<Option<ResolutionRecord>>;
    /// Audit view of every candidate of a date, in batch order.
    fn list_for_date(&self, date: NaiveDate) -> RepoResult<Vec<ResolutionRecord>>;
    /// `pending` and `failed` candidates of a date, in batch order.
    fn list_unresolved(&self, date: NaiveDate) -> RepoResult<Vec<Candidate>>;
    fn count_unresolved(&self, date: NaiveDate) -> RepoResult<u64>;
    /// Next free batch position for `date`.
    fn next_position(&self, date: NaiveDate) -> RepoResult<u32>;
    /// Commits a resolution. Fails with `AlreadyResolved` on a resolved row.
    fn mark_resolved(&self, candidate_id: &str, committed: &CommittedResolution)
        -> RepoResult<()>;
    /// Records an arbitration failure; the candidate becomes `failed`.
    fn mark_failed(&self, candidate_id: &str, tier: Tier, score: Option<f64>, error: &str)
        -> RepoResult<()>;
    /// Records a rolled-back apply; the candidate stays `pending`.
    fn record_apply_error(&self, candidate_id: &str, error: &str) -> RepoResult<()>;
}

/// SQLite-backed candidate repository.
pub struct SqliteCandidateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCandidateRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    fn ensure_unresolved(&self, candidate_id: &str) -> RepoResult<()> {
        match self.get_record(candidate_id)? {
            None => Err(RepoError::NotFound(format!("candidate `{candidate_id}`"))),
            Some(record) if record.status == CandidateStatus::Resolved => {
                Err(RepoError::AlreadyResolved(candidate_id.to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}

impl CandidateRepository for SqliteCandidateRepository<'_> {
    fn stage(
        &self,
        date: NaiveDate,
        position: u32,
        candidate: &Candidate,
    ) -> RepoResult<StageOutcome> {
        if let Some(record) = self.get_record(&candidate.id)? {
            return Ok(match record.status {
                CandidateStatus::Resolved => StageOutcome::AlreadyResolved(record),
                CandidateStatus::Pending | CandidateStatus::Failed => {
                    StageOutcome::AlreadyStaged(record)
                }
            });
        }

        self.conn.execute(
            "INSERT INTO candidates (
                id,
                batch_date,
                position,
                headline,
                summary,
                body,
                severity,
                tags,
                entities,
                sources,
                status,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11);",
            params![
                candidate.id.as_str(),
                format_date(date),
                position,
                candidate.headline.as_str(),
                candidate.summary.as_str(),
                candidate.body.as_str(),
                candidate.severity.as_str(),
                to_json(&candidate.tags)?,
                to_json(&candidate.entities)?,
                to_json(&candidate.sources)?,
                now_epoch_ms(),
            ],
        )?;
        Ok(StageOutcome::Staged)
    }

    fn get_record(&self, candidate_id: &str) -> RepoResult<Option<ResolutionRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{RECORD_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([candidate_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn list_for_date(&self, date: NaiveDate) -> RepoResult<Vec<ResolutionRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{RECORD_SELECT_SQL} WHERE batch_date = ?1 ORDER BY position ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([format_date(date)])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn list_unresolved(&self, date: NaiveDate) -> RepoResult<Vec<Candidate>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{CANDIDATE_SELECT_SQL}
             WHERE batch_date = ?1 AND status IN ('pending', 'failed')
             ORDER BY position ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([format_date(date)])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(parse_candidate_row(row)?);
        }
        Ok(candidates)
    }

    fn count_unresolved(&self, date: NaiveDate) -> RepoResult<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM candidates
             WHERE batch_date = ?1 AND status IN ('pending', 'failed');",
            [format_date(date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn next_position(&self, date: NaiveDate) -> RepoResult<u32> {
        let max: Option<u32> = self
            .conn
            .query_row(
                "SELECT MAX(position) FROM candidates WHERE batch_date = ?1;",
                [format_date(date)],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(max.map_or(0, |value| value + 1))
    }

    fn mark_resolved(
        &self,
        candidate_id: &str,
        committed: &CommittedResolution,
    ) -> RepoResult<()> {
        if committed.resolution == Resolution::MergePending {
            return Err(RepoError::InvalidData(format!(
                "candidate `{candidate_id}` cannot commit with resolution merge_pending"
            )));
        }
        self.ensure_unresolved(candidate_id)?;

        self.conn.execute(
            "UPDATE candidates
             SET
                status = 'resolved',
                resolution = ?2,
                tier = ?3,
                similarity_score = ?4,
                matched_article_id = ?5,
                article_id = ?6,
                reasoning = ?7,
                attempts = attempts + 1,
                last_error = NULL,
                resolved_at = ?8
             WHERE id = ?1 AND status != 'resolved';",
            params![
                candidate_id,
                committed.resolution.as_str(),
                committed.tier.as_str(),
                committed.similarity_score,
                committed.matched_article_id.map(|id| id.to_string()),
                committed.article_id.to_string(),
                to_json(&committed.reasoning)?,
                now_epoch_ms(),
            ],
        )?;
        Ok(())
    }

    fn mark_failed(
        &self,
        candidate_id: &str,
        tier: Tier,
        score: Option<f64>,
        error: &str,
    ) -> RepoResult<()> {
        self.ensure_unresolved(candidate_id)?;
        self.conn.execute(
            "UPDATE candidates
             SET
                status = 'failed',
                tier = ?2,
                similarity_score = ?3,
                attempts = attempts + 1,
                last_error = ?4
             WHERE id = ?1 AND status != 'resolved';",
            params![
                candidate_id,
                tier.as_str(),
                score,
                truncate_error(error)
            ],
        )?;
        Ok(())
    }

    fn record_apply_error(&self, candidate_id: &str, error: &str) -> RepoResult<()> {
        self.ensure_unresolved(candidate_id)?;
        self.conn.execute(
            "UPDATE candidates
             SET
                status = 'pending',
                attempts = attempts + 1,
                last_error = ?2
             WHERE id = ?1 AND status != 'resolved';",
            params![candidate_id, truncate_error(error)],
        )?;
        Ok(())
    }
}

fn truncate_error(error: &str) -> String {
    let normalized = error.replace(['\n', '\r'], " ");
    let mut truncated: String = normalized.chars().take(MAX_ERROR_CHARS).collect();
    if normalized.chars().count() > MAX_ERROR_CHARS {
        truncated.push_str("...");
    }
    truncated
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<ResolutionRecord> {
    let date_text: String = row.get("batch_date")?;
    let status_text: String = row.get("status")?;
    let status = CandidateStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in candidates.status"))
    })?;
    let resolution = match row.get::<_, Option<String>>("resolution")? {
        Some(text) => Some(Resolution::parse(&text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid resolution `{text}` in candidates.resolution"))
        })?),
        None => None,
    };
    let tier = match row.get::<_, Option<String>>("tier")? {
        Some(text) => Some(Tier::parse(&text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid tier `{text}` in candidates.tier"))
        })?),
        None => None,
    };
    let reasoning = match row.get::<_, Option<String>>("reasoning")? {
        Some(text) => Some(from_json(&text, "candidates.reasoning")?),
        None => None,
    };

    Ok(ResolutionRecord {
        candidate_id: row.get("id")?,
        batch_date: parse_date(&date_text, "candidates.batch_date")?,
        position: row.get("position")?,
        status,
        resolution,
        tier,
        similarity_score: row.get("similarity_score")?,
        matched_article_id: parse_optional_article_id(
            row.get("matched_article_id")?,
            "candidates.matched_article_id",
        )?,
        article_id: parse_optional_article_id(row.get("article_id")?, "candidates.article_id")?,
        reasoning,
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        resolved_at: row.get("resolved_at")?,
    })
}

fn parse_candidate_row(row: &Row<'_>) -> RepoResult<Candidate> {
    let date_text: String = row.get("batch_date")?;
    let severity_text: String = row.get("severity")?;
    let tags_text: String = row.get("tags")?;
    let entities_text: String = row.get("entities")?;
    let sources_text: String = row.get("sources")?;

    Ok(Candidate {
        id: row.get::<_, CandidateId>("id")?,
        date: Some(parse_date(&date_text, "candidates.batch_date")?),
        headline: row.get("headline")?,
        summary: row.get("summary")?,
        body: row.get("body")?,
        severity: parse_severity(&severity_text, "candidates.severity")?,
        tags: from_json(&tags_text, "candidates.tags")?,
        entities: from_json(&entities_text, "candidates.entities")?,
        sources: from_json(&sources_text, "candidates.sources")?,
    })
}
