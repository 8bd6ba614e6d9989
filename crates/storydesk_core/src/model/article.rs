//! Canonical article model.
//!
//! # Invariants
//! - `id` and `slug` never change after the article is created.
//! - Updates are append-only and never mint a new identity.

use crate::model::candidate::CandidateId;
use crate::model::resolution::ResolutionReasoning;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permanent identifier of a canonical article.
pub type ArticleId = Uuid;

const SLUG_MAX_CHARS: usize = 80;

static NON_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug separator regex"));

/// Story severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "informational" => Some(Self::Informational),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Named entity extracted upstream (threat actor, organization, CVE, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub name: String,
}

/// Canonical published story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub slug: String,
    /// Candidate that introduced this story. Kept for audit.
    pub source_candidate_id: CandidateId,
    pub publication_date: NaiveDate,
    pub headline: String,
    pub summary: String,
    pub body: String,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub entities: Vec<Entity>,
    pub sources: Vec<String>,
    pub has_updates: bool,
    pub update_count: u32,
    /// Closest existing article at resolution time, if any.
    pub matched_article_id: Option<ArticleId>,
    pub similarity_score: Option<f64>,
    pub reasoning: Option<ResolutionReasoning>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// Severity movement carried by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityChange {
    pub from: Severity,
    pub to: Severity,
}

/// Append-only record of new information merged into an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleUpdate {
    pub id: i64,
    pub article_id: ArticleId,
    /// Candidate the update was extracted from. Never indexed itself.
    pub source_candidate_id: CandidateId,
    pub update_date: NaiveDate,
    pub summary: String,
    pub content: String,
    pub sources: Vec<String>,
    pub severity_change: Option<SeverityChange>,
    pub created_at: i64,
}

/// Derives the URL slug base for a headline.
///
/// Lowercase ASCII alphanumerics separated by single dashes, capped at
/// 80 characters. Falls back to `story` when nothing usable remains.
pub fn slugify(headline: &str) -> String {
    let lowered = headline.to_lowercase();
    let joined = NON_SLUG_RE.replace_all(&lowered, "-");
    let mut slug: String = joined.trim_matches('-').chars().take(SLUG_MAX_CHARS).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "story".to_string()
    } else {
        slug
    }
}
