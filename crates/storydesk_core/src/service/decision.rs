//! Final per-candidate decisions handed to the applier.

use crate::arbiter::{ArbitrationVerdict, MergeContent};
use crate::model::article::ArticleId;
use crate::model::resolution::{ReasoningSource, Resolution, ResolutionReasoning, Tier};
use crate::service::classifier::Classification;

/// What the applier must do with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    /// Create and index a canonical article.
    Publish,
    /// Record a duplicate of `target`; nothing is created or indexed.
    Discard {
        resolution: Resolution,
        target: ArticleId,
    },
    /// Append an update to `target`.
    Merge {
        target: ArticleId,
        content: MergeContent,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tier: Tier,
    pub score: Option<f64>,
    pub matched_article_id: Option<ArticleId>,
    pub reasoning: ResolutionReasoning,
    pub action: DecisionAction,
}

impl Decision {
    /// Resolution as decided, before commit.
    pub fn resolution(&self) -> Resolution {
        match &self.action {
            DecisionAction::Publish => Resolution::New,
            DecisionAction::Discard { resolution, .. } => *resolution,
            DecisionAction::Merge { .. } => Resolution::MergePending,
        }
    }

    /// Article the candidate redirects to, if it does not become one.
    pub fn target(&self) -> Option<ArticleId> {
        match &self.action {
            DecisionAction::Publish => None,
            DecisionAction::Discard { target, .. } | DecisionAction::Merge { target, .. } => {
                Some(*target)
            }
        }
    }
}

/// Decision from the score alone. `None` for the ambiguous tier.
pub fn decide_from_score(classification: &Classification) -> Option<Decision> {
    let top = classification.top();
    let source = if classification.empty_index {
        ReasoningSource::EmptyIndex
    } else {
        ReasoningSource::Score
    };
    let action = match (classification.tier, top) {
        (Tier::New, _) => DecisionAction::Publish,
        (Tier::Duplicate, Some(top)) => DecisionAction::Discard {
            resolution: Resolution::DuplicateAuto,
            target: top.article_id,
        },
        (Tier::Duplicate, None) | (Tier::Ambiguous, _) => return None,
    };
    Some(Decision {
        tier: classification.tier,
        score: classification.score(),
        matched_article_id: top.map(|item| item.article_id),
        reasoning: reasoning(classification, source, None, false),
        action,
    })
}

/// Decision for an ambiguous candidate from a validated verdict.
pub fn decide_from_verdict(
    classification: &Classification,
    verdict: ArbitrationVerdict,
) -> Option<Decision> {
    let top_id = classification.top().map(|item| item.article_id);
    let arbiter_reasoning = Some(verdict.reasoning().to_string());
    let (action, override_new) = match verdict {
        ArbitrationVerdict::New { .. } => (DecisionAction::Publish, true),
        ArbitrationVerdict::Duplicate {
            target_article_id, ..
        } => (
            DecisionAction::Discard {
                resolution: Resolution::DuplicateConfirmed,
                target: target_article_id.or(top_id)?,
            },
            false,
        ),
        ArbitrationVerdict::Merge {
            target_article_id,
            content,
            ..
        } => (
            DecisionAction::Merge {
                target: target_article_id.or(top_id)?,
                content,
            },
            false,
        ),
    };
    let matched_article_id = match &action {
        DecisionAction::Publish => top_id,
        DecisionAction::Discard { target, .. } | DecisionAction::Merge { target, .. } => {
            Some(*target)
        }
    };
    let mut reasoning = reasoning(
        classification,
        ReasoningSource::Arbitration,
        arbiter_reasoning,
        override_new,
    );
    reasoning.matched_article_id = matched_article_id;
    Some(Decision {
        tier: classification.tier,
        score: classification.score(),
        matched_article_id,
        reasoning,
        action,
    })
}

fn reasoning(
    classification: &Classification,
    source: ReasoningSource,
    arbiter_reasoning: Option<String>,
    override_new: bool,
) -> ResolutionReasoning {
    ResolutionReasoning {
        source,
        tier: classification.tier,
        score: classification.score(),
        high_threshold: classification.thresholds.high,
        low_threshold: classification.thresholds.low,
        matched_article_id: classification.top().map(|item| item.article_id),
        arbiter_reasoning,
        override_new,
    }
}
