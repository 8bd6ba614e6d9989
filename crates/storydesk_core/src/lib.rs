//! News resolution engine.
//!
//! Decides for each candidate article whether it is a new story, a duplicate
//! of a published one, or new information to merge into one, and commits that
//! decision without disturbing published identities.

pub mod arbiter;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use arbiter::{
    Arbiter, ArbitrationError, ArbitrationRequest, ArbitrationVerdict, MatchedArticle,
    MergeContent, OpenAiArbiter, RetryingArbiter,
};
pub use config::{ConfigError, ConfigStore, ResolutionConfig, Thresholds};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::article::{Article, ArticleId, ArticleUpdate, Severity};
pub use model::candidate::{Candidate, CandidateBatch, CandidateId};
pub use model::publication::Publication;
pub use model::resolution::{CandidateStatus, Resolution, ResolutionRecord, Tier};
pub use repo::{RepoError, RepoResult};
pub use search::index::{CorpusIndex, IndexError, RankedMatch, ScoreQuery};
pub use service::applier::{ApplyError, ResolutionApplier};
pub use service::pipeline::{BatchSummary, PipelineError, ResolutionPipeline};
pub use service::publication::{PublicationRegenerator, RegenerationError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
