//! Query executor — runs model-written SQL against the read-only store
//!
//! Every statement passes a lexical gate first: only a single SELECT (or
//! WITH … SELECT) may reach the store. The gate does not trust the model's
//! instructions, and the pool itself is opened read-only underneath it.
//!
//! `execute` never panics and never returns an empty success: zero rows is a
//! failure the loop is expected to react to by rewriting the query.

use std::sync::LazyLock;

use epsilon_core::models::{Cell, QueryRows};
use futures::TryStreamExt;
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;

use super::is_store_unavailable;

/// Write, DDL and session verbs that may never appear as a keyword.
static FORBIDDEN_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|attach|detach|pragma|vacuum|reindex|grant|revoke|merge|upsert)\b|\breplace\s+into\b",
    )
    .expect("forbidden verb pattern")
});

static FIRST_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(*\s*([A-Za-z]+)").expect("first word pattern"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    #[error("disallowed statement")]
    Disallowed { verb: String },

    #[error("{0}")]
    Sql(String),

    #[error("query returned no rows")]
    EmptyResult,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<sqlx::Error> for ExecutionFailure {
    fn from(e: sqlx::Error) -> Self {
        if is_store_unavailable(&e) {
            ExecutionFailure::StoreUnavailable(e.to_string())
        } else {
            ExecutionFailure::Sql(e.to_string())
        }
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    pool: SqlitePool,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(pool: SqlitePool, max_rows: usize) -> Self {
        Self {
            pool,
            max_rows: max_rows.max(1),
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryRows, ExecutionFailure> {
        if let Err(e) = check_read_only(sql) {
            tracing::warn!(error = ?e, "Rejected statement before execution");
            return Err(e);
        }

        let mut stream = sqlx::query(sql).persistent(false).fetch(&self.pool);
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut truncated = false;

        while let Some(row) = stream.try_next().await? {
            if rows.len() == self.max_rows {
                truncated = true;
                break;
            }
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            rows.push(decode_row(&row)?);
        }

        if rows.is_empty() {
            tracing::debug!("Query returned no rows");
            return Err(ExecutionFailure::EmptyResult);
        }

        tracing::debug!(rows = rows.len(), truncated, "Query executed");
        Ok(QueryRows {
            columns,
            rows,
            truncated,
        })
    }
}

/// Accept exactly one read statement; reject everything else without
/// touching the store.
pub fn check_read_only(sql: &str) -> Result<(), ExecutionFailure> {
    let stripped = strip_literals_and_comments(sql);

    let statements: Vec<&str> = stripped
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let statement = match statements.as_slice() {
        [] => return Err(ExecutionFailure::Sql("empty statement".to_string())),
        [only] => *only,
        _ => {
            return Err(ExecutionFailure::Disallowed {
                verb: "multiple statements".to_string(),
            })
        }
    };

    if let Some(m) = FORBIDDEN_VERB.find(statement) {
        return Err(ExecutionFailure::Disallowed {
            verb: m.as_str().to_uppercase(),
        });
    }

    let first = FIRST_WORD
        .captures(statement)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_default();

    match first.as_str() {
        "SELECT" | "WITH" => Ok(()),
        _ => Err(ExecutionFailure::Disallowed { verb: first }),
    }
}

/// Blank out string literals, quoted identifiers and comments so keyword
/// matching only sees SQL structure. Length and statement separators are kept.
fn strip_literals_and_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(' ');
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push_str("  ");
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                out.push(' ');
                i += 1;
                while i < chars.len() {
                    if chars[i] == close {
                        // doubled quote is an escaped quote inside the literal
                        if close != ']' && chars.get(i + 1) == Some(&close) {
                            out.push_str("  ");
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

pub(crate) fn decode_row(row: &SqliteRow) -> Result<Vec<Cell>, sqlx::Error> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Result<Cell, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let decoded = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(idx).map(Cell::Integer),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(idx).map(Cell::Real),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|b| Cell::Blob { bytes: b.len() }),
        _ => row.try_get::<String, _>(idx).map(Cell::Text),
    };

    // Declared and stored types can disagree in SQLite; fall back to text.
    decoded.or_else(|_| row.try_get::<String, _>(idx).map(Cell::Text))
}
