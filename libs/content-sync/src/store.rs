//! Relational store abstraction
//!
//! A `ContentStore` is one side of a sync run: catalog queries, parameterized
//! row reads and writes, DDL, and the substring probe used by the asset
//! reconciler. Two backends are provided:
//! - [`PgStore`] for the deployed staging and production databases
//! - [`SqliteStore`] for local work and tests

mod postgres;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use errors::{SyncError, SyncResult};
use serde::Serialize;
use serde_json::Value as JsonValue;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use crate::value::Row;

/// Database backend behind a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Pick the backend from a connection URL scheme
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Column name and its lower-cased type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_tag: String,
}

/// Column as needed to recreate it elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Type as the catalog formats it (e.g. `character varying(255)`)
    pub formatted_type: String,
    pub not_null: bool,
    /// Default expression, already stripped of sequence-generated defaults
    pub default: Option<String>,
}

/// Table DDL captured from a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDefinition {
    pub name: String,
    pub backend: Backend,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    /// `CREATE TABLE IF NOT EXISTS` statement for the given qualified name
    pub fn create_statement(&self, qualified_name: &str) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut col = format!("{} {}", quote_ident(&c.name), c.formatted_type);
                if c.not_null {
                    col.push_str(" NOT NULL");
                }
                if let Some(default) = &c.default {
                    col.push_str(" DEFAULT ");
                    col.push_str(default);
                }
                col
            })
            .collect();

        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_key)));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified_name,
            parts.join(", ")
        )
    }
}

/// Whether a column default comes from a sequence and must not be cloned
pub fn is_sequence_default(expr: &str) -> bool {
    expr.to_ascii_lowercase().contains("nextval(")
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Comma separated quoted identifiers
pub fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One side of a sync run
///
/// Every method reads live catalog state; nothing is cached between calls.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human label used in logs ("staging", "production")
    fn label(&self) -> &str;

    fn backend(&self) -> Backend;

    async fn table_exists(&self, table: &str) -> SyncResult<bool>;

    /// Columns in ordinal order with lower-cased type tags
    async fn columns(&self, table: &str) -> SyncResult<Vec<ColumnInfo>>;

    /// Primary-key columns in key order (empty when there is none)
    async fn primary_keys(&self, table: &str) -> SyncResult<Vec<String>>;

    /// DDL view of a table, `None` when the table does not exist
    async fn table_definition(&self, table: &str) -> SyncResult<Option<TableDefinition>>;

    async fn create_table(&self, definition: &TableDefinition) -> SyncResult<()>;

    /// Rows restricted to `columns`, ordered by `order_by`
    async fn fetch_rows(&self, table: &str, columns: &[String], order_by: &[String]) -> SyncResult<Vec<Row>>;

    /// Full rows where `column` equals `value`
    async fn fetch_rows_matching(&self, table: &str, column: &str, value: &JsonValue) -> SyncResult<Vec<Row>>;

    /// Insert `columns` of `row`
    async fn insert_row(&self, table: &str, row: &Row, columns: &[String]) -> SyncResult<()>;

    /// Set `columns` from `row` on the row identified by `key_columns`
    async fn update_row(&self, table: &str, key_columns: &[String], row: &Row, columns: &[String]) -> SyncResult<u64>;

    /// Delete the row identified by `key_columns` of `row`
    async fn delete_row(&self, table: &str, key_columns: &[String], row: &Row) -> SyncResult<u64>;

    /// Remove every row of a table
    async fn truncate(&self, table: &str) -> SyncResult<()>;

    /// Whether any column of any row contains `needle` as a substring
    async fn contains_text(&self, table: &str, needle: &str) -> SyncResult<bool>;

    async fn run_migrations(&self, dir: &Path) -> SyncResult<()>;

    async fn close(&self);
}

/// Open a store for `url`, choosing the backend from the scheme
///
/// Failure here is fatal for a run.
pub async fn connect(url: &str, schema: &str, label: &str) -> SyncResult<Arc<dyn ContentStore>> {
    match Backend::from_url(url) {
        Some(Backend::Postgres) => Ok(Arc::new(PgStore::connect(url, schema, label).await?)),
        Some(Backend::Sqlite) => Ok(Arc::new(SqliteStore::connect(url, label).await?)),
        None => Err(SyncError::connection(
            label,
            format!("unsupported database URL scheme in '{}'", redact_url(url)),
        )),
    }
}

/// Strip credentials from a connection URL for logging
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        },
        _ => url.to_string(),
    }
}

/// Key column values of `row` as a new row
pub(crate) fn project(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(JsonValue::Null)))
        .collect()
}
