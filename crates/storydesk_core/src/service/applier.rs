//! Resolution applier.
//!
//! # Responsibility
//! - Commit one candidate's decision in a single IMMEDIATE transaction:
//!   article + index entry for NEW, resolution record only for
//!   duplicates, update append for merges.
//!
//! # Invariants
//! - Nothing of a failed apply is visible after rollback.
//! - Re-applying an identical committed resolution is a no-op.
//! - A conflicting re-apply is rejected, never patched.

use crate::db::DbError;
use crate::model::article::{slugify, Article, ArticleId};
use crate::model::candidate::{normalize_tags, Candidate, CandidateId};
use crate::model::resolution::{CandidateStatus, Resolution};
use crate::repo::article_repo::{ArticleRepository, NewArticleUpdate, SqliteArticleRepository};
use crate::repo::candidate_repo::{
    CandidateRepository, CommittedResolution, SqliteCandidateRepository,
};
use crate::repo::support::now_epoch_ms;
use crate::repo::RepoError;
use crate::search::index::{CorpusIndex, IndexError};
use crate::service::decision::{Decision, DecisionAction};
use chrono::NaiveDate;
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ApplyResult<T> = Result<T, ApplyError>;

#[derive(Debug)]
pub enum ApplyError {
    Db(DbError),
    Repo(RepoError),
    Index(IndexError),
    /// Candidate already committed with a different outcome.
    AlreadyResolved {
        candidate_id: CandidateId,
        committed: Resolution,
        attempted: Resolution,
    },
    /// Duplicate or merge target is not a canonical article.
    MissingTarget(ArticleId),
}

impl Display for ApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::AlreadyResolved {
                candidate_id,
                committed,
                attempted,
            } => write!(
                f,
                "candidate `{candidate_id}` is already resolved as {}; refusing {}",
                committed.as_str(),
                attempted.as_str()
            ),
            Self::MissingTarget(id) => write!(f, "target article {id} does not exist"),
        }
    }
}

impl Error for ApplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Index(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ApplyError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for ApplyError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<IndexError> for ApplyError {
    fn from(value: IndexError) -> Self {
        Self::Index(value)
    }
}

/// Result of one apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedResolution {
    pub candidate_id: CandidateId,
    pub resolution: Resolution,
    /// Canonical article the candidate resolves to.
    pub article_id: ArticleId,
    /// Set when a merge appended an update.
    pub update_id: Option<i64>,
    /// Publication date of a merge target whose severity changed.
    pub severity_changed_on: Option<NaiveDate>,
    /// `false` when an identical resolution was already committed.
    pub changed: bool,
}

pub struct ResolutionApplier<'a> {
    index: &'a CorpusIndex,
}

impl<'a> ResolutionApplier<'a> {
    pub fn new(index: &'a CorpusIndex) -> Self {
        Self { index }
    }

    /// Commits `decision` for `candidate` atomically.
    ///
    /// Stages the candidate for `batch_date` first when it was never staged.
    pub fn apply(
        &self,
        conn: &mut Connection,
        batch_date: NaiveDate,
        candidate: &Candidate,
        decision: &Decision,
    ) -> ApplyResult<AppliedResolution> {
        let attempted = decision.resolution().committed();
        let result = (|| -> ApplyResult<AppliedResolution> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let applied = self.apply_in(&tx, batch_date, candidate, decision)?;
            tx.commit()?;
            Ok(applied)
        })();

        match &result {
            Ok(applied) => info!(
                "event=apply module=applier status=ok candidate_id={} resolution={} article_id={} changed={}",
                applied.candidate_id,
                applied.resolution.as_str(),
                applied.article_id,
                applied.changed
            ),
            Err(err) => error!(
                "event=apply module=applier status=error candidate_id={} resolution={} error={err}",
                candidate.id,
                attempted.as_str()
            ),
        }
        result
    }

    fn apply_in(
        &self,
        conn: &Connection,
        batch_date: NaiveDate,
        candidate: &Candidate,
        decision: &Decision,
    ) -> ApplyResult<AppliedResolution> {
        let articles = SqliteArticleRepository::try_new(conn)?;
        let candidates = SqliteCandidateRepository::try_new(conn)?;
        let attempted = decision.resolution().committed();

        match candidates.get_record(&candidate.id)? {
            None => {
                let position = candidates.next_position(batch_date)?;
                candidates.stage(batch_date, position, candidate)?;
            }
            Some(record) if record.status == CandidateStatus::Resolved => {
                let committed = record.resolution.ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "resolved candidate `{}` has no resolution",
                        candidate.id
                    ))
                })?;
                let article_id = record.article_id.ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "resolved candidate `{}` has no article",
                        candidate.id
                    ))
                })?;
                let same_target = decision.target().map_or(true, |target| target == article_id);
                if committed == attempted && same_target {
                    return Ok(AppliedResolution {
                        candidate_id: candidate.id.clone(),
                        resolution: committed,
                        article_id,
                        update_id: None,
                        severity_changed_on: None,
                        changed: false,
                    });
                }
                return Err(ApplyError::AlreadyResolved {
                    candidate_id: candidate.id.clone(),
                    committed,
                    attempted,
                });
            }
            Some(_) => {}
        }

        let (article_id, update_id, severity_changed_on) = match &decision.action {
            DecisionAction::Publish => (
                self.publish(conn, &articles, batch_date, candidate, decision)?,
                None,
                None,
            ),
            DecisionAction::Discard { target, .. } => {
                ensure_target(&articles, *target)?;
                (*target, None, None)
            }
            DecisionAction::Merge { target, content } => {
                let article = ensure_target(&articles, *target)?;
                let mut sources = content.sources.clone();
                if sources.is_empty() {
                    sources = candidate.sources.clone();
                }
                let update = articles.append_update(&NewArticleUpdate {
                    article_id: article.id,
                    source_candidate_id: candidate.id.clone(),
                    update_date: batch_date,
                    summary: content.summary.clone(),
                    content: content.content.clone(),
                    sources,
                    severity: content.severity,
                })?;
                let severity_changed_on = update
                    .severity_change
                    .map(|_| article.publication_date);
                (article.id, Some(update.id), severity_changed_on)
            }
        };

        candidates.mark_resolved(
            &candidate.id,
            &CommittedResolution {
                resolution: attempted,
                tier: decision.tier,
                similarity_score: decision.score,
                matched_article_id: decision.matched_article_id,
                article_id,
                reasoning: decision.reasoning.clone(),
            },
        )?;

        Ok(AppliedResolution {
            candidate_id: candidate.id.clone(),
            resolution: attempted,
            article_id,
            update_id,
            severity_changed_on,
            changed: true,
        })
    }

    fn publish(
        &self,
        conn: &Connection,
        articles: &SqliteArticleRepository<'_>,
        batch_date: NaiveDate,
        candidate: &Candidate,
        decision: &Decision,
    ) -> ApplyResult<ArticleId> {
        let now = now_epoch_ms();
        let article = Article {
            id: Uuid::new_v4(),
            slug: articles.allocate_slug(&slugify(&candidate.headline))?,
            source_candidate_id: candidate.id.clone(),
            publication_date: batch_date,
            headline: candidate.headline.clone(),
            summary: candidate.summary.clone(),
            body: candidate.body.clone(),
            severity: candidate.severity,
            tags: normalize_tags(&candidate.tags),
            entities: candidate.entities.clone(),
            sources: candidate.sources.clone(),
            has_updates: false,
            update_count: 0,
            matched_article_id: decision.matched_article_id,
            similarity_score: decision.score,
            reasoning: Some(decision.reasoning.clone()),
            created_at: now,
            updated_at: now,
        };
        articles.insert_article(&article)?;
        self.index.insert(conn, &article)?;
        Ok(article.id)
    }
}

fn ensure_target(articles: &SqliteArticleRepository<'_>, target: ArticleId) -> ApplyResult<Article> {
    articles
        .get_article(target)?
        .ok_or(ApplyError::MissingTarget(target))
}
