//! Schema inspector — table list and column metadata for the model
//!
//! The analytical tables are rebuilt wholesale, never altered in place, so
//! everything read here is cached for the lifetime of the inspector.

use std::collections::HashMap;

use epsilon_core::models::{Cell, ColumnInfo, SchemaReport, TableSchema};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;

use super::executor::decode_row;
use super::is_store_unavailable;

/// Longest sample value shown to the model.
const SAMPLE_VALUE_CHARS: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("schema lookup failed: {0}")]
    Lookup(String),
}

impl From<sqlx::Error> for SchemaError {
    fn from(e: sqlx::Error) -> Self {
        if is_store_unavailable(&e) {
            SchemaError::StoreUnavailable(e.to_string())
        } else {
            SchemaError::Lookup(e.to_string())
        }
    }
}

#[derive(Default)]
struct SchemaCache {
    tables: Option<Vec<String>>,
    schemas: HashMap<String, TableSchema>,
}

pub struct SchemaInspector {
    pool: SqlitePool,
    sample_rows: u32,
    cache: RwLock<SchemaCache>,
}

impl SchemaInspector {
    pub fn new(pool: SqlitePool, sample_rows: u32) -> Self {
        Self {
            pool,
            sample_rows,
            cache: RwLock::new(SchemaCache::default()),
        }
    }

    /// Table names, sorted. Internal `sqlite_*` tables are hidden.
    pub async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        if let Some(tables) = &self.cache.read().await.tables {
            return Ok(tables.clone());
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let tables: Vec<String> = rows.into_iter().map(|r| r.0).collect();
        tracing::debug!(count = tables.len(), "Loaded table list");
        self.cache.write().await.tables = Some(tables.clone());
        Ok(tables)
    }

    /// Table list if it has already been read, without touching the store.
    pub async fn cached_tables(&self) -> Option<Vec<String>> {
        self.cache.read().await.tables.clone()
    }

    /// Describe the requested tables. Names that do not resolve are returned
    /// in `unknown` while the rest still succeed.
    pub async fn get_schema(&self, names: &[String]) -> Result<SchemaReport, SchemaError> {
        let known = self.list_tables().await?;
        let mut report = SchemaReport::default();

        for requested in names {
            let requested = requested.trim().trim_matches(|c| c == '"' || c == '`' || c == '\'');
            if requested.is_empty() {
                continue;
            }

            let Some(canonical) = known.iter().find(|t| t.eq_ignore_ascii_case(requested)) else {
                tracing::debug!(table = requested, "Unknown table requested");
                if !report.unknown.iter().any(|u| u == requested) {
                    report.unknown.push(requested.to_string());
                }
                continue;
            };

            if report.tables.iter().any(|t| &t.name == canonical) {
                continue;
            }
            report.tables.push(self.describe(canonical).await?);
        }

        Ok(report)
    }

    async fn describe(&self, table: &str) -> Result<TableSchema, SchemaError> {
        if let Some(schema) = self.cache.read().await.schemas.get(table) {
            return Ok(schema.clone());
        }

        let columns: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;

        let create_sql: Option<(Option<String>,)> =
            sqlx::query_as("SELECT sql FROM sqlite_master WHERE name = ?1")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;

        let sample_rows = if self.sample_rows > 0 {
            let sql = format!(
                "SELECT * FROM {} LIMIT {}",
                quote_identifier(table),
                self.sample_rows
            );
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            rows.iter()
                .map(|row| {
                    decode_row(row).map(|cells| cells.iter().map(sample_text).collect())
                })
                .collect::<Result<Vec<Vec<String>>, sqlx::Error>>()?
        } else {
            Vec::new()
        };

        let schema = TableSchema {
            name: table.to_string(),
            columns: columns
                .into_iter()
                .map(|(name, declared_type)| ColumnInfo {
                    name,
                    declared_type,
                })
                .collect(),
            create_sql: create_sql.and_then(|r| r.0),
            sample_rows,
        };

        self.cache
            .write()
            .await
            .schemas
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sample_text(cell: &Cell) -> String {
    let text = match cell {
        Cell::Text(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > SAMPLE_VALUE_CHARS {
        let cut: String = text.chars().take(SAMPLE_VALUE_CHARS).collect();
        format!("{cut}...")
    } else {
        text
    }
}
