//! Strict arbiter reply schema.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "decision": "MERGE",
//!   "reasoning": "adds the ransom amount",
//!   "target_article_id": "5b1f...",
//!   "merge": {
//!     "summary": "Ransom demand disclosed",
//!     "content": "The group demanded ...",
//!     "sources": ["https://example.com/a"],
//!     "severity": "high"
//!   }
//! }
//! ```

use crate::arbiter::{ArbitrationError, ArbitrationResult};
use crate::model::article::{ArticleId, Severity};
use serde::Deserialize;
use uuid::Uuid;

/// Update content extracted for a MERGE verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeContent {
    pub summary: String,
    pub content: String,
    pub sources: Vec<String>,
    pub severity: Option<Severity>,
}

/// Validated arbiter decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationVerdict {
    /// Score was a false positive; publish the candidate.
    New { reasoning: String },
    /// Same story as an offered match.
    Duplicate {
        reasoning: String,
        target_article_id: Option<ArticleId>,
    },
    /// Materially new information about an offered match.
    Merge {
        reasoning: String,
        target_article_id: Option<ArticleId>,
        content: MergeContent,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WireDecision {
    New,
    Duplicate,
    Merge,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireVerdict {
    decision: WireDecision,
    reasoning: String,
    #[serde(default)]
    target_article_id: Option<String>,
    #[serde(default)]
    merge: Option<WireMerge>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMerge {
    summary: String,
    content: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    severity: Option<String>,
}

impl ArbitrationVerdict {
    /// Parses a JSON reply and checks it against the offered matches.
    ///
    /// # Errors
    /// - `ArbitrationError::Malformed` for any schema violation.
    pub fn parse(text: &str, offered: &[ArticleId]) -> ArbitrationResult<Self> {
        let wire: WireVerdict = serde_json::from_str(text.trim())
            .map_err(|err| ArbitrationError::Malformed(err.to_string()))?;

        let reasoning = wire.reasoning.trim().to_string();
        if reasoning.is_empty() {
            return Err(malformed("reasoning must not be empty"));
        }
        let target_article_id = parse_target(wire.target_article_id.as_deref(), offered)?;

        match wire.decision {
            WireDecision::New => {
                if wire.merge.is_some() {
                    return Err(malformed("merge content is only allowed for MERGE"));
                }
                Ok(Self::New { reasoning })
            }
            WireDecision::Duplicate => {
                if wire.merge.is_some() {
                    return Err(malformed("merge content is only allowed for MERGE"));
                }
                Ok(Self::Duplicate {
                    reasoning,
                    target_article_id,
                })
            }
            WireDecision::Merge => {
                let merge = wire
                    .merge
                    .ok_or_else(|| malformed("MERGE requires a `merge` object"))?;
                Ok(Self::Merge {
                    reasoning,
                    target_article_id,
                    content: merge.validate()?,
                })
            }
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Self::New { reasoning }
            | Self::Duplicate { reasoning, .. }
            | Self::Merge { reasoning, .. } => reasoning,
        }
    }

    /// Explicit target chosen by the arbiter, if any.
    pub fn target_article_id(&self) -> Option<ArticleId> {
        match self {
            Self::New { .. } => None,
            Self::Duplicate {
                target_article_id, ..
            }
            | Self::Merge {
                target_article_id, ..
            } => *target_article_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New { .. } => "new",
            Self::Duplicate { .. } => "duplicate",
            Self::Merge { .. } => "merge",
        }
    }
}

impl WireMerge {
    fn validate(self) -> ArbitrationResult<MergeContent> {
        let summary = self.summary.trim().to_string();
        let content = self.content.trim().to_string();
        if summary.is_empty() || content.is_empty() {
            return Err(malformed("merge summary and content must not be empty"));
        }
        let severity = match self.severity.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(
                Severity::parse(&value.to_ascii_lowercase())
                    .ok_or_else(|| malformed(&format!("unknown severity `{value}`")))?,
            ),
        };
        let sources = self
            .sources
            .into_iter()
            .map(|source| source.trim().to_string())
            .filter(|source| !source.is_empty())
            .collect();
        Ok(MergeContent {
            summary,
            content,
            sources,
            severity,
        })
    }
}

fn parse_target(value: Option<&str>, offered: &[ArticleId]) -> ArbitrationResult<Option<ArticleId>> {
    let Some(text) = value.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(None);
    };
    let id = Uuid::parse_str(text)
        .map_err(|_| malformed(&format!("target_article_id `{text}` is not a uuid")))?;
    if !offered.contains(&id) {
        return Err(malformed(&format!(
            "target_article_id {id} was not among the offered matches"
        )));
    }
    Ok(Some(id))
}

fn malformed(message: &str) -> ArbitrationError {
    ArbitrationError::Malformed(message.to_string())
}
