//! Similarity classifier.
//!
//! # Responsibility
//! - Score a candidate against the corpus index.
//! - Map the strongest score to a confidence tier via configured thresholds.
//!
//! # Invariants
//! - An empty index, or no shared terms at all, always yields `Tier::New`.
//! - Every classification is logged with tier and raw score.

use crate::config::Thresholds;
use crate::model::candidate::Candidate;
use crate::model::resolution::Tier;
use crate::search::index::{CorpusIndex, IndexResult, RankedMatch, ScoreQuery};
use log::info;
use rusqlite::Connection;

/// Tier assignment for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    /// Matches strongest first.
    pub matches: Vec<RankedMatch>,
    pub empty_index: bool,
    pub thresholds: Thresholds,
}

impl Classification {
    pub fn top(&self) -> Option<&RankedMatch> {
        self.matches.first()
    }

    pub fn score(&self) -> Option<f64> {
        self.top().map(|item| item.score)
    }
}

/// Maps the strongest score to a tier. `None` means nothing matched.
pub fn classify_score(score: Option<f64>, thresholds: &Thresholds) -> Tier {
    match score {
        None => Tier::New,
        Some(score) if score >= thresholds.high => Tier::New,
        Some(score) if score <= thresholds.low => Tier::Duplicate,
        Some(_) => Tier::Ambiguous,
    }
}

pub struct SimilarityClassifier<'a> {
    index: &'a CorpusIndex,
    thresholds: Thresholds,
}

impl<'a> SimilarityClassifier<'a> {
    pub fn new(index: &'a CorpusIndex, thresholds: Thresholds) -> Self {
        Self { index, thresholds }
    }

    pub fn classify(&self, conn: &Connection, candidate: &Candidate) -> IndexResult<Classification> {
        let empty_index = self.index.is_empty(conn)?;
        let matches = if empty_index {
            Vec::new()
        } else {
            self.index.score(
                conn,
                &ScoreQuery {
                    headline: &candidate.headline,
                    summary: &candidate.summary,
                    body: &candidate.body,
                },
            )?
        };

        let classification = Classification {
            tier: classify_score(matches.first().map(|item| item.score), &self.thresholds),
            matches,
            empty_index,
            thresholds: self.thresholds,
        };

        match classification.top() {
            Some(top) => info!(
                "event=classify module=classifier status=ok candidate_id={} tier={} score={:.4} fts_rank={:.4} top_match={} matches={} high={} low={}",
                candidate.id,
                classification.tier.as_str(),
                top.score,
                top.fts_rank,
                top.article_id,
                classification.matches.len(),
                self.thresholds.high,
                self.thresholds.low
            ),
            None => info!(
                "event=classify module=classifier status=ok candidate_id={} tier={} score=none empty_index={} high={} low={}",
                candidate.id,
                classification.tier.as_str(),
                empty_index,
                self.thresholds.high,
                self.thresholds.low
            ),
        }
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::classify_score;
    use crate::config::Thresholds;
    use crate::model::resolution::Tier;

    #[test]
    fn boundaries_are_inclusive_at_both_ends() {
        let thresholds = Thresholds {
            high: -0.35,
            low: -0.75,
        };
        assert_eq!(classify_score(Some(-0.35), &thresholds), Tier::New);
        assert_eq!(classify_score(Some(-0.1), &thresholds), Tier::New);
        assert_eq!(classify_score(Some(-0.36), &thresholds), Tier::Ambiguous);
        assert_eq!(classify_score(Some(-0.74), &thresholds), Tier::Ambiguous);
        assert_eq!(classify_score(Some(-0.75), &thresholds), Tier::Duplicate);
        assert_eq!(classify_score(Some(-1.0), &thresholds), Tier::Duplicate);
    }

    #[test]
    fn no_match_is_new() {
        assert_eq!(classify_score(None, &Thresholds::default()), Tier::New);
    }
}
