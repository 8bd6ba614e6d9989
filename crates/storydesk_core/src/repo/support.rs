//! Column encoding helpers shared by SQLite repositories.

use crate::db::migrations::latest_version;
use crate::model::article::{ArticleId, Severity};
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode json column: {err}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(text: &str, column: &str) -> RepoResult<T> {
    serde_json::from_str(text)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

pub(crate) fn parse_article_id(value: &str, column: &str) -> RepoResult<ArticleId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_optional_article_id(
    value: Option<String>,
    column: &str,
) -> RepoResult<Option<ArticleId>> {
    value
        .map(|text| parse_article_id(&text, column))
        .transpose()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str, column: &str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn parse_severity(value: &str, column: &str) -> RepoResult<Severity> {
    Severity::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid severity `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
