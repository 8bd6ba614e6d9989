//! Arbitration service for the ambiguous tier.
//!
//! # Responsibility
//! - Build the arbiter request from the candidate and its top matches.
//! - Turn a validated verdict into a `Decision`.
//!
//! # Invariants
//! - Only ambiguous classifications are sent to the arbiter.
//! - Any arbiter failure is returned as an error, never as a decision.

use crate::arbiter::{
    Arbiter, ArbitrationError, ArbitrationRequest, ArbitrationResult, MatchedArticle,
};
use crate::model::candidate::Candidate;
use crate::model::resolution::Tier;
use crate::repo::article_repo::{ArticleRepository, SqliteArticleRepository};
use crate::repo::RepoResult;
use crate::service::classifier::Classification;
use crate::service::decision::{decide_from_verdict, Decision};
use rusqlite::Connection;

pub struct ArbitrationService<A> {
    arbiter: A,
    max_matches: usize,
}

impl<A: Arbiter> ArbitrationService<A> {
    pub fn new(arbiter: A, max_matches: usize) -> Self {
        Self {
            arbiter,
            max_matches: max_matches.max(1),
        }
    }

    pub fn arbiter(&self) -> &A {
        &self.arbiter
    }

    pub fn set_max_matches(&mut self, max_matches: usize) {
        self.max_matches = max_matches.max(1);
    }

    /// Loads the strongest matches' text for the arbiter prompt.
    pub fn build_request(
        &self,
        conn: &Connection,
        candidate: &Candidate,
        classification: &Classification,
    ) -> RepoResult<ArbitrationRequest> {
        let articles = SqliteArticleRepository::try_new(conn)?;
        let mut matches = Vec::new();
        for ranked in classification.matches.iter().take(self.max_matches) {
            if let Some(article) = articles.get_article(ranked.article_id)? {
                matches.push(MatchedArticle {
                    article_id: article.id,
                    headline: article.headline,
                    summary: article.summary,
                    body: article.body,
                    score: ranked.score,
                });
            }
        }
        Ok(ArbitrationRequest {
            candidate_id: candidate.id.clone(),
            headline: candidate.headline.clone(),
            summary: candidate.summary.clone(),
            body: candidate.body.clone(),
            matches,
        })
    }

    /// Asks the arbiter and converts its verdict.
    ///
    /// # Errors
    /// - `ArbitrationError::Malformed` when the classification is not
    ///   ambiguous, offers nothing to compare against, or the verdict
    ///   targets an article that was not offered.
    /// - Any error returned by the arbiter.
    pub fn decide(
        &self,
        request: &ArbitrationRequest,
        classification: &Classification,
    ) -> ArbitrationResult<Decision> {
        if classification.tier != Tier::Ambiguous {
            return Err(ArbitrationError::Malformed(format!(
                "candidate `{}` is {} and must not be arbitrated",
                request.candidate_id,
                classification.tier.as_str()
            )));
        }
        if request.matches.is_empty() {
            return Err(ArbitrationError::Malformed(format!(
                "candidate `{}` has no matched article to arbitrate against",
                request.candidate_id
            )));
        }

        let verdict = self.arbiter.arbitrate(request)?;
        if let Some(target) = verdict.target_article_id() {
            if !request.offered_ids().contains(&target) {
                return Err(ArbitrationError::Malformed(format!(
                    "verdict for `{}` targets article {target}, which was not offered",
                    request.candidate_id
                )));
            }
        }
        decide_from_verdict(classification, verdict).ok_or_else(|| {
            ArbitrationError::Malformed(format!(
                "verdict for `{}` names no target article",
                request.candidate_id
            ))
        })
    }
}
