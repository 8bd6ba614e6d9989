//! Resolution outcomes and audit records.
//!
//! # Invariants
//! - Resolutions are one-way: a committed resolution is never revisited.
//! - `MergePending` exists only inside an apply transaction and always
//!   completes to `Merged` before commit.

use crate::model::article::ArticleId;
use crate::model::candidate::CandidateId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Final classification outcome of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Distinct story; the candidate became a canonical article.
    New,
    /// Rejected by similarity score alone.
    DuplicateAuto,
    /// Rejected after arbitration confirmed the same story.
    DuplicateConfirmed,
    /// New information identified, not yet appended.
    MergePending,
    /// New information appended to the matched article as an update.
    Merged,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::DuplicateAuto => "duplicate_auto",
            Self::DuplicateConfirmed => "duplicate_confirmed",
            Self::MergePending => "merge_pending",
            Self::Merged => "merged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "duplicate_auto" => Some(Self::DuplicateAuto),
            "duplicate_confirmed" => Some(Self::DuplicateConfirmed),
            "merge_pending" => Some(Self::MergePending),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }

    /// Resolution stored on commit.
    pub fn committed(self) -> Self {
        match self {
            Self::MergePending => Self::Merged,
            other => other,
        }
    }

    /// Whether lookups by the candidate id redirect to another article.
    pub fn redirects(self) -> bool {
        !matches!(self, Self::New)
    }
}

/// Confidence tier produced by the similarity classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    New,
    Ambiguous,
    Duplicate,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ambiguous => "ambiguous",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "ambiguous" => Some(Self::Ambiguous),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

/// Lifecycle of a staged candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Staged, or left for retry after a rolled-back apply.
    Pending,
    Resolved,
    /// Arbitration failed; needs operator attention or a retry run.
    Failed,
}

impl CandidateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// What drove a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningSource {
    /// Nothing indexed yet; NEW by definition.
    EmptyIndex,
    /// Score alone placed the candidate in a decisive tier.
    Score,
    /// The arbiter decided an ambiguous candidate.
    Arbitration,
}

/// Machine-readable explanation persisted with every resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReasoning {
    pub source: ReasoningSource,
    pub tier: Tier,
    pub score: Option<f64>,
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub matched_article_id: Option<ArticleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter_reasoning: Option<String>,
    /// Arbiter published an ambiguous candidate despite its score.
    #[serde(default)]
    pub override_new: bool,
}

/// Audit view of one candidate and its resolution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub candidate_id: CandidateId,
    pub batch_date: NaiveDate,
    pub position: u32,
    pub status: CandidateStatus,
    pub resolution: Option<Resolution>,
    pub tier: Option<Tier>,
    pub similarity_score: Option<f64>,
    pub matched_article_id: Option<ArticleId>,
    /// Canonical article: itself for NEW, the target for duplicates/merges.
    pub article_id: Option<ArticleId>,
    pub reasoning: Option<ResolutionReasoning>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub resolved_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::Resolution;

    #[test]
    fn merge_pending_completes_to_merged() {
        assert_eq!(Resolution::MergePending.committed(), Resolution::Merged);
        assert_eq!(Resolution::New.committed(), Resolution::New);
    }

    #[test]
    fn only_new_keeps_its_own_identity() {
        assert!(!Resolution::New.redirects());
        assert!(Resolution::Merged.redirects());
        assert!(Resolution::DuplicateAuto.redirects());
    }
}
