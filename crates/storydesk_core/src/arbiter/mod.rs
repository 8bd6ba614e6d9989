//! Arbitration boundary for ambiguous candidates.
//!
//! # Responsibility
//! - Define the `Arbiter` seam the pipeline calls for the ambiguous tier.
//! - Validate replies into a strict tagged verdict.
//! - Provide bounded retry and an OpenAI-compatible HTTP implementation.
//!
//! # Invariants
//! - A failed or malformed arbitration is an error, never a default
//!   `NEW` or `DUPLICATE` verdict.

use crate::model::article::ArticleId;
use crate::model::candidate::CandidateId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod decision;
pub mod http;
pub mod retry;

pub use decision::{ArbitrationVerdict, MergeContent};
pub use http::OpenAiArbiter;
pub use retry::RetryingArbiter;

pub type ArbitrationResult<T> = Result<T, ArbitrationError>;

/// Existing article offered to the arbiter as a possible match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedArticle {
    pub article_id: ArticleId,
    pub headline: String,
    pub summary: String,
    pub body: String,
    pub score: f64,
}

/// Candidate text plus its strongest matches, strongest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationRequest {
    pub candidate_id: CandidateId,
    pub headline: String,
    pub summary: String,
    pub body: String,
    pub matches: Vec<MatchedArticle>,
}

impl ArbitrationRequest {
    pub fn offered_ids(&self) -> Vec<ArticleId> {
        self.matches.iter().map(|item| item.article_id).collect()
    }
}

/// External decision maker for ambiguous candidates.
pub trait Arbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict>;
}

impl<A: Arbiter + ?Sized> Arbiter for &A {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict> {
        (**self).arbitrate(request)
    }
}

impl<A: Arbiter + ?Sized> Arbiter for Box<A> {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict> {
        (**self).arbitrate(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    /// Connection-level failure.
    Transport(String),
    Timeout,
    RateLimited,
    /// 5xx response.
    Server { status: u16, message: String },
    /// Non-retryable HTTP rejection, e.g. bad credentials.
    Rejected { status: u16, message: String },
    /// Reply did not satisfy the verdict schema.
    Malformed(String),
    /// Arbiter cannot be reached at all (missing credentials, no client).
    Unavailable(String),
}

impl ArbitrationError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::RateLimited | Self::Server { .. }
        )
    }

    /// Stable short code used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Server { .. } => "server",
            Self::Rejected { .. } => "rejected",
            Self::Malformed(_) => "malformed",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl Display for ArbitrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "arbiter transport error: {message}"),
            Self::Timeout => write!(f, "arbiter call timed out"),
            Self::RateLimited => write!(f, "arbiter rate limit exceeded"),
            Self::Server { status, message } => {
                write!(f, "arbiter server error {status}: {message}")
            }
            Self::Rejected { status, message } => {
                write!(f, "arbiter rejected request with {status}: {message}")
            }
            Self::Malformed(message) => write!(f, "malformed arbiter reply: {message}"),
            Self::Unavailable(message) => write!(f, "arbiter unavailable: {message}"),
        }
    }
}

impl Error for ArbitrationError {}
