//! Candidate articles proposed by the upstream structuring step.
//!
//! # Invariants
//! - Candidate ids are stable strings assigned upstream and unique per store.
//! - A batch covers exactly one date.

use crate::model::article::{Entity, Severity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable upstream identifier of a candidate.
pub type CandidateId = String;

/// Structured article awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    /// Optional explicit date. When present it must equal the batch date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub headline: String,
    pub summary: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Candidate {
    /// Creates a candidate with empty optional fields.
    pub fn new(
        id: impl Into<CandidateId>,
        headline: impl Into<String>,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            date: None,
            headline: headline.into(),
            summary: summary.into(),
            body: body.into(),
            severity: Severity::default(),
            tags: Vec::new(),
            entities: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Validates fields required before a candidate can be staged.
    pub fn validate(&self) -> Result<(), CandidateValidationError> {
        if self.id.trim().is_empty() {
            return Err(CandidateValidationError::EmptyId);
        }
        if self.headline.trim().is_empty() {
            return Err(CandidateValidationError::EmptyHeadline(self.id.clone()));
        }
        Ok(())
    }
}

/// One day's worth of candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBatch {
    pub date: NaiveDate,
    pub candidates: Vec<Candidate>,
}

impl CandidateBatch {
    pub fn new(date: NaiveDate, candidates: Vec<Candidate>) -> Self {
        Self { date, candidates }
    }

    /// Checks batch-level preconditions without touching storage.
    pub fn validate(&self) -> Result<(), CandidateValidationError> {
        if self.candidates.is_empty() {
            return Err(CandidateValidationError::EmptyBatch);
        }

        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            candidate.validate()?;
            if !seen.insert(candidate.id.as_str()) {
                return Err(CandidateValidationError::DuplicateId(candidate.id.clone()));
            }
            if let Some(date) = candidate.date {
                if date != self.date {
                    return Err(CandidateValidationError::DateMismatch {
                        candidate_id: candidate.id.clone(),
                        candidate_date: date,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Candidate or batch shape violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateValidationError {
    EmptyBatch,
    EmptyId,
    EmptyHeadline(CandidateId),
    DuplicateId(CandidateId),
    DateMismatch {
        candidate_id: CandidateId,
        candidate_date: NaiveDate,
    },
}

impl Display for CandidateValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyBatch => write!(f, "batch contains no candidates"),
            Self::EmptyId => write!(f, "candidate id must not be blank"),
            Self::EmptyHeadline(id) => write!(f, "candidate `{id}` has a blank headline"),
            Self::DuplicateId(id) => write!(f, "candidate `{id}` appears more than once"),
            Self::DateMismatch {
                candidate_id,
                candidate_date,
            } => write!(
                f,
                "candidate `{candidate_id}` is dated {candidate_date}, outside the batch date"
            ),
        }
    }
}

impl Error for CandidateValidationError {}

/// Normalizes tags to trimmed lowercase, deduplicated and sorted.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
