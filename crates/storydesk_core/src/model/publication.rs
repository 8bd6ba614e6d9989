//! Daily publication digest.

use crate::model::article::ArticleId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Digest for one date, built only from that date's NEW articles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub date: NaiveDate,
    pub headline: String,
    pub summary: String,
    /// Ordered article references.
    pub article_ids: Vec<ArticleId>,
    /// Epoch milliseconds of the last content change.
    pub generated_at: i64,
}

impl Publication {
    /// Compares everything except `generated_at`.
    pub fn same_content(&self, other: &Publication) -> bool {
        self.date == other.date
            && self.headline == other.headline
            && self.summary == other.summary
            && self.article_ids == other.article_ids
    }
}
