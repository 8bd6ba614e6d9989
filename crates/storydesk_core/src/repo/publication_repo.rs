//! Publication persistence.
//!
//! One row per date in `publications`, article order in
//! `publication_articles`.

use crate::model::publication::Publication;
use crate::repo::support::{ensure_schema_ready, format_date, parse_article_id};
use crate::repo::RepoResult;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

/// Repository interface for daily publications.
pub trait PublicationRepository {
    fn get_publication(&self, date: NaiveDate) -> RepoResult<Option<Publication>>;
    /// Replaces the publication of `publication.date` as a whole.
    fn replace_publication(&self, publication: &Publication) -> RepoResult<()>;
}

/// SQLite-backed publication repository.
pub struct SqlitePublicationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePublicationRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl PublicationRepository for SqlitePublicationRepository<'_> {
    fn get_publication(&self, date: NaiveDate) -> RepoResult<Option<Publication>> {
        let date_text = format_date(date);
        let header = self
            .conn
            .query_row(
                "SELECT headline, summary, generated_at
                 FROM publications
                 WHERE publication_date = ?1;",
                [date_text.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((headline, summary, generated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT article_id
             FROM publication_articles
             WHERE publication_date = ?1
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([date_text.as_str()])?;
        let mut article_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            article_ids.push(parse_article_id(&value, "publication_articles.article_id")?);
        }

        Ok(Some(Publication {
            date,
            headline,
            summary,
            article_ids,
            generated_at,
        }))
    }

    fn replace_publication(&self, publication: &Publication) -> RepoResult<()> {
        let date_text = format_date(publication.date);
        self.conn.execute(
            "DELETE FROM publication_articles WHERE publication_date = ?1;",
            [date_text.as_str()],
        )?;
        self.conn.execute(
            "INSERT INTO publications (
                publication_date,
                headline,
                summary,
                article_count,
                generated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(publication_date) DO UPDATE SET
                headline = excluded.headline,
                summary = excluded.summary,
                article_count = excluded.article_count,
                generated_at = excluded.generated_at;",
            params![
                date_text.as_str(),
                publication.headline.as_str(),
                publication.summary.as_str(),
                publication.article_ids.len() as i64,
                publication.generated_at,
            ],
        )?;

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO publication_articles (publication_date, position, article_id)
             VALUES (?1, ?2, ?3);",
        )?;
        for (position, article_id) in publication.article_ids.iter().enumerate() {
            stmt.execute(params![
                date_text.as_str(),
                position as i64,
                article_id.to_string()
            ])?;
        }
        Ok(())
    }
}
