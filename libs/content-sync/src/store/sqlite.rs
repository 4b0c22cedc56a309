//! SQLite backend
//!
//! Catalog data comes from `pragma_table_info`. Rows are decoded by the
//! runtime storage class of each value, and values are bound by their
//! dynamic kind (JSON arrays and objects are stored as JSON text).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use errors::{SyncError, SyncResult};
use serde_json::{Number, Value as JsonValue};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::{
    is_sequence_default, quote_ident, quote_list, Backend, ColumnDefinition, ColumnInfo,
    ContentStore, TableDefinition,
};
use crate::value::Row;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteStore {
    pool: SqlitePool,
    label: String,
}

impl SqliteStore {
    /// Open a single connection to an existing database file
    pub async fn connect(url: &str, label: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SyncError::connection(label, e))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::connection(label, e))?;

        info!("Connected to {} store at {}", label, url);

        Ok(Self::from_pool(pool, label))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool, label: &str) -> Self {
        Self {
            pool,
            label: label.to_string(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key_predicate(key_columns: &[String]) -> String {
        key_columns
            .iter()
            .map(|k| format!("{} IS ?", quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &JsonValue) -> SqliteQuery<'q> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        JsonValue::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn bind_columns<'q>(mut query: SqliteQuery<'q>, row: &Row, columns: &[String]) -> SqliteQuery<'q> {
    for column in columns {
        query = bind_value(query, row.get(column).unwrap_or(&JsonValue::Null));
    }
    query
}

/// Decode one column by the storage class of the stored value
fn decode_value(row: &SqliteRow, index: usize) -> SyncResult<JsonValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => JsonValue::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => {
            let f = row.try_get_unchecked::<f64, _>(index)?;
            Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        },
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())
        },
        _ => JsonValue::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow) -> SyncResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(column.name().to_string(), decode_value(row, column.ordinal())?);
    }
    Ok(out)
}

#[async_trait]
impl ContentStore for SqliteStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn columns(&self, table: &str) -> SyncResult<Vec<ColumnInfo>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, lower(type) FROM pragma_table_info(?) ORDER BY cid")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name, type_tag)| ColumnInfo { name, type_tag })
            .collect())
    }

    async fn primary_keys(&self, table: &str) -> SyncResult<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }

    async fn table_definition(&self, table: &str) -> SyncResult<Option<TableDefinition>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let rows: Vec<(String, String, i64, Option<String>)> = sqlx::query_as(
            r#"SELECT name, type, "notnull", dflt_value FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let columns = rows
            .into_iter()
            .map(|(name, formatted_type, not_null, default)| ColumnDefinition {
                name,
                formatted_type,
                not_null: not_null != 0,
                default: default.filter(|d| !is_sequence_default(d)),
            })
            .collect();

        Ok(Some(TableDefinition {
            name: table.to_string(),
            backend: Backend::Sqlite,
            columns,
            primary_key: self.primary_keys(table).await?,
        }))
    }

    async fn create_table(&self, definition: &TableDefinition) -> SyncResult<()> {
        if definition.backend != Backend::Sqlite {
            return Err(SyncError::UnsupportedValue {
                table: definition.name.clone(),
                column: "*".to_string(),
                reason: format!("cannot clone {:?} DDL into SQLite", definition.backend),
            });
        }
        let sql = definition.create_statement(&quote_ident(&definition.name));
        debug!("{}: {}", self.label, sql);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        Ok(())
    }

    async fn fetch_rows(&self, table: &str, columns: &[String], order_by: &[String]) -> SyncResult<Vec<Row>> {
        let mut sql = format!("SELECT {} FROM {}", quote_list(columns), quote_ident(table));
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&quote_list(order_by));
        }
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_rows_matching(&self, table: &str, column: &str, value: &JsonValue) -> SyncResult<Vec<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(column)
        );
        let rows = bind_value(sqlx::query(&sql), value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn insert_row(&self, table: &str, row: &Row, columns: &[String]) -> SyncResult<()> {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            quote_list(columns),
            placeholders
        );
        bind_columns(sqlx::query(&sql), row, columns)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_row(&self, table: &str, key_columns: &[String], row: &Row, columns: &[String]) -> SyncResult<u64> {
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            Self::key_predicate(key_columns)
        );
        let query = bind_columns(sqlx::query(&sql), row, columns);
        let result = bind_columns(query, row, key_columns)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_row(&self, table: &str, key_columns: &[String], row: &Row) -> SyncResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(table),
            Self::key_predicate(key_columns)
        );
        let result = bind_columns(sqlx::query(&sql), row, key_columns)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self, table: &str) -> SyncResult<()> {
        let sql = format!("DELETE FROM {}", quote_ident(table));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        Ok(())
    }

    async fn contains_text(&self, table: &str, needle: &str) -> SyncResult<bool> {
        let columns = self.columns(table).await?;
        if columns.is_empty() {
            return Ok(false);
        }
        let predicate: Vec<String> = columns
            .iter()
            .map(|c| format!("instr(CAST({} AS TEXT), ?1) > 0", quote_ident(&c.name)))
            .collect();
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {})",
            quote_ident(table),
            predicate.join(" OR ")
        );
        let found: bool = sqlx::query_scalar(&sql)
            .bind(needle)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        Ok(found)
    }

    async fn run_migrations(&self, dir: &Path) -> SyncResult<()> {
        let migrator = sqlx::migrate::Migrator::new(dir).await?;
        migrator.run(&self.pool).await?;
        info!("{}: migrations from {} applied", self.label, dir.display());
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
