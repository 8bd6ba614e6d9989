//! Repository layer over the resolution store.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for articles,
//!   candidates/resolutions and publications.
//! - Keep SQL and JSON column encoding out of services.
//!
//! # Invariants
//! - Repositories refuse connections whose schema is not fully migrated.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Repositories never open transactions; callers own atomicity.

use crate::db::DbError;
use crate::model::article::ArticleId;
use crate::model::candidate::CandidateId;
use crate::model::resolution::Resolution;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod article_repo;
pub mod candidate_repo;
pub mod publication_repo;
pub(crate) mod support;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by all stores.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(String),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Candidate id was resolved onto another article; the caller must
    /// follow the redirect instead of reading it as an article.
    RedirectRequired {
        candidate_id: CandidateId,
        resolution: Resolution,
        article_id: ArticleId,
    },
    /// Candidate already carries a committed resolution.
    AlreadyResolved(CandidateId),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::RedirectRequired {
                candidate_id,
                resolution,
                article_id,
            } => write!(
                f,
                "candidate `{candidate_id}` was resolved as {} into article {article_id}; follow the redirect",
                resolution.as_str()
            ),
            Self::AlreadyResolved(candidate_id) => {
                write!(f, "candidate `{candidate_id}` is already resolved")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
