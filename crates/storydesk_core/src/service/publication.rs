//! Publication regenerator.
//!
//! # Responsibility
//! - Recompute a date's digest from the NEW articles of that date.
//!
//! # Invariants
//! - Candidates are never read; only canonical articles feed the digest.
//! - Regenerating an unchanged article set leaves the stored row untouched.

use crate::db::DbError;
use crate::model::article::Article;
use crate::model::publication::Publication;
use crate::repo::article_repo::{ArticleRepository, SqliteArticleRepository};
use crate::repo::publication_repo::{PublicationRepository, SqlitePublicationRepository};
use crate::repo::support::now_epoch_ms;
use crate::repo::RepoError;
use chrono::NaiveDate;
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum RegenerationError {
    Db(DbError),
    Repo(RepoError),
}

impl Display for RegenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegenerationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for RegenerationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for RegenerationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationOutcome {
    pub publication: Publication,
    /// `false` when the stored publication already matched.
    pub changed: bool,
}

/// Builds the digest for `date` from its NEW articles.
///
/// Articles are ordered by severity, most severe first; equal severities
/// keep the input (creation) order.
pub fn compose_publication(date: NaiveDate, articles: &[Article], generated_at: i64) -> Publication {
    let mut ordered: Vec<&Article> = articles.iter().collect();
    ordered.sort_by(|left, right| right.severity.cmp(&left.severity));

    let headline = match ordered.split_first() {
        None => format!("No new stories for {}", date.format("%Y-%m-%d")),
        Some((top, [])) => top.headline.clone(),
        Some((top, rest)) => format!("{} (+{} more)", top.headline, rest.len()),
    };
    let summary = ordered
        .iter()
        .map(|article| {
            format!(
                "[{}] {}",
                article.severity.as_str().to_ascii_uppercase(),
                article.headline
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Publication {
        date,
        headline,
        summary,
        article_ids: ordered.iter().map(|article| article.id).collect(),
        generated_at,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PublicationRegenerator;

impl PublicationRegenerator {
    pub fn new() -> Self {
        Self
    }

    /// Recomputes and stores the publication of `date` when it changed.
    pub fn regenerate(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
    ) -> Result<RegenerationOutcome, RegenerationError> {
        let result = (|| -> Result<RegenerationOutcome, RegenerationError> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let outcome = {
                let articles = SqliteArticleRepository::try_new(&tx)?;
                let publications = SqlitePublicationRepository::try_new(&tx)?;
                let composed =
                    compose_publication(date, &articles.list_for_date(date)?, now_epoch_ms());
                match publications.get_publication(date)? {
                    Some(stored) if stored.same_content(&composed) => RegenerationOutcome {
                        publication: stored,
                        changed: false,
                    },
                    _ => {
                        publications.replace_publication(&composed)?;
                        RegenerationOutcome {
                            publication: composed,
                            changed: true,
                        }
                    }
                }
            };
            tx.commit()?;
            Ok(outcome)
        })();

        match &result {
            Ok(outcome) => info!(
                "event=publication_regenerate module=publication status=ok date={date} articles={} changed={}",
                outcome.publication.article_ids.len(),
                outcome.changed
            ),
            Err(err) => error!(
                "event=publication_regenerate module=publication status=error date={date} error={err}"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::compose_publication;
    use crate::model::article::{Article, Severity};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn article(n: u128, headline: &str, severity: Severity) -> Article {
        Article {
            id: Uuid::from_u128(n),
            slug: format!("story-{n}"),
            source_candidate_id: format!("c-{n}"),
            publication_date: date(),
            headline: headline.to_string(),
            summary: String::new(),
            body: String::new(),
            severity,
            tags: Vec::new(),
            entities: Vec::new(),
            sources: Vec::new(),
            has_updates: false,
            update_count: 0,
            matched_article_id: None,
            similarity_score: None,
            reasoning: None,
            created_at: n as i64,
            updated_at: n as i64,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn orders_by_severity_then_creation() {
        let articles = vec![
            article(1, "Patch Tuesday", Severity::Medium),
            article(2, "Zero-day exploited", Severity::Critical),
            article(3, "Phishing wave", Severity::Medium),
        ];
        let publication = compose_publication(date(), &articles, 0);
        assert_eq!(
            publication.article_ids,
            vec![Uuid::from_u128(2), Uuid::from_u128(1), Uuid::from_u128(3)]
        );
        assert_eq!(publication.headline, "Zero-day exploited (+2 more)");
        assert_eq!(
            publication.summary,
            "[CRITICAL] Zero-day exploited\n[MEDIUM] Patch Tuesday\n[MEDIUM] Phishing wave"
        );
    }

    #[test]
    fn empty_day_has_placeholder_headline() {
        let publication = compose_publication(date(), &[], 0);
        assert_eq!(publication.headline, "No new stories for 2026-03-02");
        assert!(publication.article_ids.is_empty());
        assert!(publication.summary.is_empty());
    }

    #[test]
    fn single_article_headline_has_no_suffix() {
        let publication = compose_publication(date(), &[article(1, "Only one", Severity::Low)], 0);
        assert_eq!(publication.headline, "Only one");
    }
}
