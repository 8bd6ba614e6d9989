//! Canonical article repository.
//!
//! # Responsibility
//! - Persist NEW articles and their append-only updates.
//! - Resolve lookups by article id, slug or candidate id, following
//!   duplicate/merge redirects to the canonical article.
//!
//! # Invariants
//! - `id`, `slug` and `source_candidate_id` are never rewritten.
//! - Appending an update bumps `update_count` and sets `has_updates`
//!   in the same statement sequence as the insert.

use crate::model::article::{Article, ArticleId, ArticleUpdate, Severity, SeverityChange};
use crate::model::candidate::CandidateId;
use crate::model::resolution::{Resolution, ResolutionReasoning};
use crate::repo::support::{
    bool_to_int, ensure_schema_ready, format_date, from_json, int_to_bool, now_epoch_ms,
    parse_article_id, parse_date, parse_optional_article_id, parse_severity, to_json,
};
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

const ARTICLE_SELECT_SQL: &str = "SELECT
    id,
    slug,
    source_candidate_id,
    publication_date,
    headline,
    summary,
    body,
    severity,
    tags,
    entities,
    sources,
    has_updates,
    update_count,
    similarity_score,
    matched_article_id,
    reasoning,
    created_at,
    updated_at
FROM articles";

const MAX_SLUG_SUFFIX: u32 = 10_000;

/// Update content to append to a canonical article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticleUpdate {
    pub article_id: ArticleId,
    pub source_candidate_id: CandidateId,
    pub update_date: NaiveDate,
    pub summary: String,
    pub content: String,
    pub sources: Vec<String>,
    /// Target severity. Recorded as a change only when it differs.
    pub severity: Option<Severity>,
}

/// How a lookup reached the canonical article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupPath {
    ArticleId,
    Slug,
    /// Candidate id of the article's own NEW resolution.
    SourceCandidate,
    /// Duplicate or merged candidate redirected to its canonical article.
    Redirect {
        candidate_id: CandidateId,
        resolution: Resolution,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArticle {
    pub article: Article,
    pub via: LookupPath,
}

/// Repository interface for canonical articles and updates.
pub trait ArticleRepository {
    /// Inserts a NEW article. Fails on id, slug or source candidate reuse.
    fn insert_article(&self, article: &Article) -> RepoResult<()>;
    fn get_article(&self, id: ArticleId) -> RepoResult<Option<Article>>;
    fn get_by_slug(&self, slug: &str) -> RepoResult<Option<Article>>;
    /// Article created from `candidate_id`.
    ///
    /// # Errors
    /// - `RepoError::RedirectRequired` when the candidate was resolved as a
    ///   duplicate or merge.
    fn get_by_candidate(&self, candidate_id: &str) -> RepoResult<Option<Article>>;
    /// Resolves an article id, slug or candidate id to the canonical article.
    fn lookup(&self, reference: &str) -> RepoResult<Option<ResolvedArticle>>;
    /// Articles published on `date`, in creation order.
    fn list_for_date(&self, date: NaiveDate) -> RepoResult<Vec<Article>>;
    fn list_updates(&self, article_id: ArticleId) -> RepoResult<Vec<ArticleUpdate>>;
    /// Appends one update and flags the article as updated.
    fn append_update(&self, update: &NewArticleUpdate) -> RepoResult<ArticleUpdate>;
    /// Returns `base`, or `base-N` for the first free suffix.
    fn allocate_slug(&self, base: &str) -> RepoResult<String>;
}

/// SQLite-backed article repository.
pub struct SqliteArticleRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteArticleRepository<'conn> {
    /// Creates a repository from a migrated connection or transaction.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    fn query_one(&self, filter_sql: &str, value: &str) -> RepoResult<Option<Article>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ARTICLE_SELECT_SQL} WHERE {filter_sql};"))?;
        let mut rows = stmt.query([value])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_article_row(row)?));
        }
        Ok(None)
    }

    fn candidate_redirect(
        &self,
        candidate_id: &str,
    ) -> RepoResult<Option<(Resolution, ArticleId)>> {
        let row = self
            .conn
            .query_row(
                "SELECT resolution, article_id
                 FROM candidates
                 WHERE id = ?1 AND status = 'resolved';",
                [candidate_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((resolution_text, article_text)) = row else {
            return Ok(None);
        };
        let resolution = Resolution::parse(&resolution_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid resolution `{resolution_text}` in candidates.resolution"
            ))
        })?;
        let article_id = parse_article_id(&article_text, "candidates.article_id")?;
        Ok(Some((resolution, article_id)))
    }
}

impl ArticleRepository for SqliteArticleRepository<'_> {
    fn insert_article(&self, article: &Article) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO articles (
                id,
                slug,
                source_candidate_id,
                publication_date,
                headline,
                summary,
                body,
                severity,
                tags,
                entities,
                sources,
                has_updates,
                update_count,
                similarity_score,
                matched_article_id,
                reasoning,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18);",
            params![
                article.id.to_string(),
                article.slug.as_str(),
                article.source_candidate_id.as_str(),
                format_date(article.publication_date),
                article.headline.as_str(),
                article.summary.as_str(),
                article.body.as_str(),
                article.severity.as_str(),
                to_json(&article.tags)?,
                to_json(&article.entities)?,
                to_json(&article.sources)?,
                bool_to_int(article.has_updates),
                article.update_count,
                article.similarity_score,
                article.matched_article_id.map(|id| id.to_string()),
                article.reasoning.as_ref().map(to_json).transpose()?,
                article.created_at,
                article.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_article(&self, id: ArticleId) -> RepoResult<Option<Article>> {
        self.query_one("id = ?1", &id.to_string())
    }

    fn get_by_slug(&self, slug: &str) -> RepoResult<Option<Article>> {
        self.query_one("slug = ?1", slug)
    }

    fn get_by_candidate(&self, candidate_id: &str) -> RepoResult<Option<Article>> {
        if let Some((resolution, article_id)) = self.candidate_redirect(candidate_id)? {
            if resolution.redirects() {
                return Err(RepoError::RedirectRequired {
                    candidate_id: candidate_id.to_string(),
                    resolution,
                    article_id,
                });
            }
        }
        self.query_one("source_candidate_id = ?1", candidate_id)
    }

    fn lookup(&self, reference: &str) -> RepoResult<Option<ResolvedArticle>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(None);
        }

        if let Ok(id) = parse_article_id(reference, "lookup reference") {
            if let Some(article) = self.get_article(id)? {
                return Ok(Some(ResolvedArticle {
                    article,
                    via: LookupPath::ArticleId,
                }));
            }
        }

        if let Some((resolution, article_id)) = self.candidate_redirect(reference)? {
            let article = self.get_article(article_id)?.ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "candidate `{reference}` points at missing article {article_id}"
                ))
            })?;
            let via = if resolution.redirects() {
                LookupPath::Redirect {
                    candidate_id: reference.to_string(),
                    resolution,
                }
            } else {
                LookupPath::SourceCandidate
            };
            return Ok(Some(ResolvedArticle { article, via }));
        }

        Ok(self.get_by_slug(reference)?.map(|article| ResolvedArticle {
            article,
            via: LookupPath::Slug,
        }))
    }

    fn list_for_date(&self, date: NaiveDate) -> RepoResult<Vec<Article>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ARTICLE_SELECT_SQL} WHERE publication_date = ?1 ORDER BY rowid ASC;"
        ))?;
        let mut rows = stmt.query([format_date(date)])?;
        let mut articles = Vec::new();
        while let Some(row) = rows.next()? {
            articles.push(parse_article_row(row)?);
        }
        Ok(articles)
    }

    fn list_updates(&self, article_id: ArticleId) -> RepoResult<Vec<ArticleUpdate>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT
                id,
                article_id,
                source_candidate_id,
                update_date,
                summary,
                content,
                sources,
                severity_before,
                severity_after,
                created_at
             FROM article_updates
             WHERE article_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([article_id.to_string()])?;
        let mut updates = Vec::new();
        while let Some(row) = rows.next()? {
            updates.push(parse_update_row(row)?);
        }
        Ok(updates)
    }

    fn append_update(&self, update: &NewArticleUpdate) -> RepoResult<ArticleUpdate> {
        let article = self
            .get_article(update.article_id)?
            .ok_or_else(|| RepoError::NotFound(format!("article {}", update.article_id)))?;

        let severity_change = update
            .severity
            .filter(|target| *target != article.severity)
            .map(|target| SeverityChange {
                from: article.severity,
                to: target,
            });
        let created_at = now_epoch_ms();

        self.conn.execute(
            "INSERT INTO article_updates (
                article_id,
                source_candidate_id,
                update_date,
                summary,
                content,
                sources,
                severity_before,
                severity_after,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                update.article_id.to_string(),
                update.source_candidate_id.as_str(),
                format_date(update.update_date),
                update.summary.as_str(),
                update.content.as_str(),
                to_json(&update.sources)?,
                severity_change.map(|change| change.from.as_str()),
                severity_change.map(|change| change.to.as_str()),
                created_at,
            ],
        )?;
        let update_id = self.conn.last_insert_rowid();

        let changed = self.conn.execute(
            "UPDATE articles
             SET
                has_updates = 1,
                update_count = update_count + 1,
                severity = ?2,
                updated_at = ?3
             WHERE id = ?1;",
            params![
                update.article_id.to_string(),
                severity_change.map_or(article.severity, |change| change.to).as_str(),
                created_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("article {}", update.article_id)));
        }

        Ok(ArticleUpdate {
            id: update_id,
            article_id: update.article_id,
            source_candidate_id: update.source_candidate_id.clone(),
            update_date: update.update_date,
            summary: update.summary.clone(),
            content: update.content.clone(),
            sources: update.sources.clone(),
            severity_change,
            created_at,
        })
    }

    fn allocate_slug(&self, base: &str) -> RepoResult<String> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM articles WHERE slug = ?1);")?;
        let mut taken = |slug: &str| -> RepoResult<bool> {
            let exists: i64 = stmt.query_row([slug], |row| row.get(0))?;
            Ok(exists == 1)
        };

        if !taken(base)? {
            return Ok(base.to_string());
        }
        for suffix in 2..MAX_SLUG_SUFFIX {
            let slug = format!("{base}-{suffix}");
            if !taken(&slug)? {
                return Ok(slug);
            }
        }
        Err(RepoError::InvalidData(format!(
            "no free slug left for `{base}`"
        )))
    }
}

fn parse_article_row(row: &Row<'_>) -> RepoResult<Article> {
    let id_text: String = row.get("id")?;
    let date_text: String = row.get("publication_date")?;
    let severity_text: String = row.get("severity")?;
    let tags_text: String = row.get("tags")?;
    let entities_text: String = row.get("entities")?;
    let sources_text: String = row.get("sources")?;
    let reasoning = match row.get::<_, Option<String>>("reasoning")? {
        Some(text) => Some(from_json::<ResolutionReasoning>(&text, "articles.reasoning")?),
        None => None,
    };
    let update_count: i64 = row.get("update_count")?;

    Ok(Article {
        id: parse_article_id(&id_text, "articles.id")?,
        slug: row.get("slug")?,
        source_candidate_id: row.get("source_candidate_id")?,
        publication_date: parse_date(&date_text, "articles.publication_date")?,
        headline: row.get("headline")?,
        summary: row.get("summary")?,
        body: row.get("body")?,
        severity: parse_severity(&severity_text, "articles.severity")?,
        tags: from_json(&tags_text, "articles.tags")?,
        entities: from_json(&entities_text, "articles.entities")?,
        sources: from_json(&sources_text, "articles.sources")?,
        has_updates: int_to_bool(row.get("has_updates")?, "articles.has_updates")?,
        update_count: u32::try_from(update_count).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid update_count `{update_count}` in articles.update_count"
            ))
        })?,
        matched_article_id: parse_optional_article_id(
            row.get("matched_article_id")?,
            "articles.matched_article_id",
        )?,
        similarity_score: row.get("similarity_score")?,
        reasoning,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_update_row(row: &Row<'_>) -> RepoResult<ArticleUpdate> {
    let article_text: String = row.get("article_id")?;
    let date_text: String = row.get("update_date")?;
    let sources_text: String = row.get("sources")?;
    let before: Option<String> = row.get("severity_before")?;
    let after: Option<String> = row.get("severity_after")?;
    let severity_change = match (before, after) {
        (Some(from), Some(to)) => Some(SeverityChange {
            from: parse_severity(&from, "article_updates.severity_before")?,
            to: parse_severity(&to, "article_updates.severity_after")?,
        }),
        (None, None) => None,
        _ => {
            return Err(RepoError::InvalidData(
                "severity_before/severity_after must be set together".to_string(),
            ))
        }
    };

    Ok(ArticleUpdate {
        id: row.get("id")?,
        article_id: parse_article_id(&article_text, "article_updates.article_id")?,
        source_candidate_id: row.get("source_candidate_id")?,
        update_date: parse_date(&date_text, "article_updates.update_date")?,
        summary: row.get("summary")?,
        content: row.get("content")?,
        sources: from_json(&sources_text, "article_updates.sources")?,
        severity_change,
        created_at: row.get("created_at")?,
    })
}
