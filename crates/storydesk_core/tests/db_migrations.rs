use storydesk_core::db::migrations::latest_version;
use storydesk_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "articles",
        "article_updates",
        "candidates",
        "publications",
        "publication_articles",
        "corpus_index_stats",
        "articles_fts",
        "articles_fts_vocab",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn fresh_store_has_zeroed_index_stats() {
    let conn = open_db_in_memory().unwrap();
    let doc_count: i64 = conn
        .query_row(
            "SELECT doc_count FROM corpus_index_stats WHERE id = 1;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(doc_count, 0);
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storydesk.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "articles_fts");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn resolved_candidate_requires_resolution_and_article() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO candidates (id, batch_date, position, headline, summary, body, severity, status)
         VALUES ('c-1', '2026-03-02', 0, 'h', 's', 'b', 'medium', 'resolved');",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
