//! SQLite FTS5-backed corpus index service.
//!
//! # Responsibility
//! - Add canonical articles to the full-text index.
//! - Rank existing articles against candidate text.
//! - Detect index corruption and rebuild from the article store.
//!
//! # Invariants
//! - FTS rows share `rowid` with their `articles` row, so one article can
//!   never be indexed twice.
//! - `corpus_index_stats` always agrees with the FTS row count after commit.
//! - Writes go through the caller's transaction; rebuilds own theirs.

use crate::config::IndexSettings;
use crate::db::migrations::ARTICLES_FTS_DDL;
use crate::db::DbError;
use crate::model::article::{Article, ArticleId};
use crate::search::scoring::{relative_score, Bm25f, CorpusStats, FieldDocument, FIELD_COUNT};
use crate::search::tokens::{match_expression, query_terms};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type IndexResult<T> = Result<T, IndexError>;

/// Corpus index error.
#[derive(Debug)]
pub enum IndexError {
    Db(DbError),
    /// Index does not agree with the article store. Requires a rebuild.
    Corrupted { detail: String },
    /// Article row must be persisted before it can be indexed.
    NotPersisted(ArticleId),
    /// Article already has an index entry.
    AlreadyIndexed(ArticleId),
    InvalidData(String),
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Corrupted { detail } => {
                write!(f, "corpus index is corrupted and must be rebuilt: {detail}")
            }
            Self::NotPersisted(id) => write!(f, "article {id} is not persisted; cannot index"),
            Self::AlreadyIndexed(id) => write!(f, "article {id} is already indexed"),
            Self::InvalidData(message) => write!(f, "invalid index row: {message}"),
        }
    }
}

impl Error for IndexError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for IndexError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Candidate text to score against the corpus.
#[derive(Debug, Clone, Copy)]
pub struct ScoreQuery<'a> {
    pub headline: &'a str,
    pub summary: &'a str,
    pub body: &'a str,
}

/// One existing article ranked against a query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub article_id: ArticleId,
    /// Similarity in `[.., 0]`; more negative is a stronger match.
    pub score: f64,
    /// Raw FTS5 `bm25()` rank used for retrieval.
    pub fts_rank: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexed: u64,
    pub duration_ms: u128,
}

/// Full-text index over canonical articles.
///
/// Lifecycle: `open` (or `rebuild_from_store`) → `score`/`insert`* →
/// `rebuild` | `close`. `rebuild` consumes the value, so nothing can score
/// against an index while it is being recreated.
#[derive(Debug)]
pub struct CorpusIndex {
    settings: IndexSettings,
    scorer: Bm25f,
}

impl CorpusIndex {
    /// Opens the index on a migrated connection and verifies it.
    ///
    /// # Errors
    /// - `IndexError::Corrupted` when the index disagrees with the store.
    pub fn open(conn: &Connection, settings: IndexSettings) -> IndexResult<Self> {
        let index = Self::with_settings(settings);
        match index.verify(conn) {
            Ok(()) => {
                info!(
                    "event=index_open module=index status=ok documents={}",
                    index.len(conn)?
                );
                Ok(index)
            }
            Err(err) => {
                error!("event=index_open module=index status=error error={err}");
                Err(err)
            }
        }
    }

    /// Drops and recreates the FTS tables, then bulk-reloads every article.
    ///
    /// Runs in one IMMEDIATE transaction; on failure the previous index
    /// state is kept.
    pub fn rebuild_from_store(
        conn: &mut Connection,
        settings: IndexSettings,
    ) -> IndexResult<(Self, RebuildReport)> {
        let started_at = Instant::now();
        info!("event=index_rebuild module=index status=start");
        let index = Self::with_settings(settings);

        let result = (|| -> IndexResult<u64> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute_batch(
                "DROP TABLE IF EXISTS articles_fts_vocab;
                 DROP TABLE IF EXISTS articles_fts;",
            )?;
            tx.execute_batch(ARTICLES_FTS_DDL)?;
            let indexed = tx.execute(
                "INSERT INTO articles_fts (rowid, article_id, headline, summary, body)
                 SELECT rowid, id, headline, summary, body
                 FROM articles
                 ORDER BY rowid;",
                [],
            )? as u64;
            let stats = recount_stats(&tx)?;
            store_stats(&tx, &stats)?;
            index.verify(&tx)?;
            tx.commit()?;
            Ok(indexed)
        })();

        match result {
            Ok(indexed) => {
                let report = RebuildReport {
                    indexed,
                    duration_ms: started_at.elapsed().as_millis(),
                };
                info!(
                    "event=index_rebuild module=index status=ok documents={} duration_ms={}",
                    report.indexed, report.duration_ms
                );
                Ok((index, report))
            }
            Err(err) => {
                error!(
                    "event=index_rebuild module=index status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Rebuilds this index. See [`CorpusIndex::rebuild_from_store`].
    pub fn rebuild(self, conn: &mut Connection) -> IndexResult<(Self, RebuildReport)> {
        Self::rebuild_from_store(conn, self.settings)
    }

    /// Releases the index handle.
    pub fn close(self) {
        info!("event=index_close module=index status=ok");
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Number of indexed articles.
    pub fn len(&self, conn: &Connection) -> IndexResult<u64> {
        Ok(load_stats(conn)?.doc_count)
    }

    pub fn is_empty(&self, conn: &Connection) -> IndexResult<bool> {
        Ok(self.len(conn)? == 0)
    }

    /// Adds a persisted canonical article to the index.
    ///
    /// Must run in the same transaction that persisted the article.
    pub fn insert(&self, conn: &Connection, article: &Article) -> IndexResult<()> {
        let id_text = article.id.to_string();
        let rowid: i64 = conn
            .query_row(
                "SELECT rowid FROM articles WHERE id = ?1;",
                [id_text.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(IndexError::NotPersisted(article.id))?;

        let already: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM articles_fts WHERE rowid = ?1);",
            [rowid],
            |row| row.get(0),
        )?;
        if already == 1 {
            return Err(IndexError::AlreadyIndexed(article.id));
        }

        conn.execute(
            "INSERT INTO articles_fts (rowid, article_id, headline, summary, body)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                rowid,
                id_text.as_str(),
                article.headline.as_str(),
                article.summary.as_str(),
                article.body.as_str(),
            ],
        )?;

        let lengths =
            FieldDocument::from_fields(&article.headline, &article.summary, &article.body)
                .lengths();
        conn.execute(
            "UPDATE corpus_index_stats
             SET doc_count = doc_count + 1,
                 headline_tokens = headline_tokens + ?1,
                 summary_tokens = summary_tokens + ?2,
                 body_tokens = body_tokens + ?3
             WHERE id = 1;",
            params![lengths[0], lengths[1], lengths[2]],
        )?;

        debug!(
            "event=index_insert module=index status=ok article_id={} rowid={rowid}",
            article.id
        );
        Ok(())
    }

    /// Ranks indexed articles against candidate text, strongest first.
    ///
    /// Returns an empty list for an empty index or a query with no
    /// searchable terms.
    pub fn score(&self, conn: &Connection, query: &ScoreQuery<'_>) -> IndexResult<Vec<RankedMatch>> {
        let stats = load_stats(conn)?;
        if stats.doc_count == 0 {
            return Ok(Vec::new());
        }

        let terms = query_terms(
            query.headline,
            query.summary,
            query.body,
            self.settings.max_query_terms,
        );
        let Some(match_expr) = match_expression(&terms) else {
            return Ok(Vec::new());
        };

        let idfs = document_frequencies(conn, &terms)?
            .into_iter()
            .map(|(term, doc_freq)| (term, Bm25f::idf(stats.doc_count, doc_freq)))
            .collect::<HashMap<_, _>>();
        let average_lengths = stats.average_lengths();
        let self_document = FieldDocument::from_fields(query.headline, query.summary, query.body);
        let self_score = self
            .scorer
            .score(&terms, &self_document, &average_lengths, &idfs);

        let weights = self.scorer.weights();
        let mut stmt = conn.prepare_cached(
            "SELECT
                article_id,
                headline,
                summary,
                body,
                bm25(articles_fts, 0.0, ?2, ?3, ?4) AS fts_rank
             FROM articles_fts
             WHERE articles_fts MATCH ?1
             ORDER BY fts_rank ASC, article_id ASC
             LIMIT ?5;",
        )?;
        let mut rows = stmt.query(params![
            match_expr.as_str(),
            weights[0],
            weights[1],
            weights[2],
            i64::from(self.settings.candidate_pool),
        ])?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get("article_id")?;
            let article_id = Uuid::parse_str(&id_text).map_err(|_| {
                IndexError::InvalidData(format!("invalid article id `{id_text}` in articles_fts"))
            })?;
            let headline: String = row.get("headline")?;
            let summary: String = row.get("summary")?;
            let body: String = row.get("body")?;
            let document = FieldDocument::from_fields(&headline, &summary, &body);
            let document_score = self
                .scorer
                .score(&terms, &document, &average_lengths, &idfs);
            matches.push(RankedMatch {
                article_id,
                score: relative_score(document_score, self_score),
                fts_rank: row.get("fts_rank")?,
            });
        }

        matches.sort_by(|left, right| {
            left.score
                .total_cmp(&right.score)
                .then_with(|| left.article_id.cmp(&right.article_id))
        });
        Ok(matches)
    }

    /// Checks FTS integrity and agreement with the article store.
    pub fn verify(&self, conn: &Connection) -> IndexResult<()> {
        for table in ["articles_fts", "articles_fts_vocab"] {
            if !table_exists(conn, table)? {
                return Err(IndexError::Corrupted {
                    detail: format!("missing table `{table}`"),
                });
            }
        }

        if let Err(err) = conn.execute(
            "INSERT INTO articles_fts (articles_fts) VALUES ('integrity-check');",
            [],
        ) {
            return Err(IndexError::Corrupted {
                detail: format!("fts5 integrity-check failed: {err}"),
            });
        }

        let article_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM articles;", [], |row| row.get(0))?;
        let fts_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM articles_fts;", [], |row| row.get(0))?;
        let stats = load_stats(conn)?;
        if article_count != fts_count || stats.doc_count != fts_count {
            return Err(IndexError::Corrupted {
                detail: format!(
                    "row counts disagree: articles={article_count} indexed={fts_count} stats={}",
                    stats.doc_count
                ),
            });
        }

        let unindexed: u64 = conn.query_row(
            "SELECT COUNT(*)
             FROM articles
             WHERE rowid NOT IN (SELECT rowid FROM articles_fts);",
            [],
            |row| row.get(0),
        )?;
        if unindexed > 0 {
            warn!("event=index_verify module=index status=error unindexed={unindexed}");
            return Err(IndexError::Corrupted {
                detail: format!("{unindexed} articles have no index entry"),
            });
        }

        Ok(())
    }

    fn with_settings(settings: IndexSettings) -> Self {
        let scorer = Bm25f::from_settings(&settings);
        Self { settings, scorer }
    }
}

fn load_stats(conn: &Connection) -> IndexResult<CorpusStats> {
    conn.query_row(
        "SELECT doc_count, headline_tokens, summary_tokens, body_tokens
         FROM corpus_index_stats
         WHERE id = 1;",
        [],
        |row| {
            Ok(CorpusStats {
                doc_count: row.get(0)?,
                total_lengths: [row.get(1)?, row.get(2)?, row.get(3)?],
            })
        },
    )
    .optional()?
    .ok_or_else(|| IndexError::Corrupted {
        detail: "missing corpus_index_stats row".to_string(),
    })
}

fn store_stats(conn: &Connection, stats: &CorpusStats) -> IndexResult<()> {
    conn.execute(
        "INSERT INTO corpus_index_stats (id, doc_count, headline_tokens, summary_tokens, body_tokens)
         VALUES (1, ?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            doc_count = excluded.doc_count,
            headline_tokens = excluded.headline_tokens,
            summary_tokens = excluded.summary_tokens,
            body_tokens = excluded.body_tokens;",
        params![
            stats.doc_count,
            stats.total_lengths[0],
            stats.total_lengths[1],
            stats.total_lengths[2],
        ],
    )?;
    Ok(())
}

fn recount_stats(conn: &Connection) -> IndexResult<CorpusStats> {
    let mut stmt = conn.prepare("SELECT headline, summary, body FROM articles;")?;
    let mut rows = stmt.query([])?;
    let mut stats = CorpusStats::default();
    while let Some(row) = rows.next()? {
        let headline: String = row.get(0)?;
        let summary: String = row.get(1)?;
        let body: String = row.get(2)?;
        let lengths = FieldDocument::from_fields(&headline, &summary, &body).lengths();
        stats.doc_count += 1;
        for field in 0..FIELD_COUNT {
            stats.total_lengths[field] += u64::from(lengths[field]);
        }
    }
    Ok(stats)
}

fn document_frequencies(conn: &Connection, terms: &[String]) -> IndexResult<Vec<(String, u64)>> {
    let mut stmt = conn.prepare_cached("SELECT doc FROM articles_fts_vocab WHERE term = ?1;")?;
    let mut frequencies = Vec::with_capacity(terms.len());
    for term in terms {
        let doc_freq: Option<u64> = stmt
            .query_row([term.as_str()], |row| row.get(0))
            .optional()?;
        frequencies.push((term.clone(), doc_freq.unwrap_or(0)));
    }
    Ok(frequencies)
}

fn table_exists(conn: &Connection, table: &str) -> IndexResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
