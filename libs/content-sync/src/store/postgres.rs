//! Postgres backend
//!
//! Rows travel as JSON: reads go through `to_jsonb(row)` and writes through
//! `jsonb_populate_record(NULL::table, $1)`, so every value is cast by the
//! destination column's own type.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use errors::{SyncError, SyncResult};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info};

use super::{
    is_sequence_default, project, quote_ident, quote_list, redact_url, Backend, ColumnDefinition,
    ColumnInfo, ContentStore, TableDefinition,
};
use crate::value::Row;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct PgStore {
    pool: PgPool,
    schema: String,
    label: String,
}

impl PgStore {
    /// Open a single long-lived connection
    pub async fn connect(url: &str, schema: &str, label: &str) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| SyncError::connection(label, e))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| SyncError::connection(label, e))?;

        info!("Connected to {} store at {}", label, redact_url(url));

        Ok(Self {
            pool,
            schema: schema.to_string(),
            label: label.to_string(),
        })
    }

    /// Schema-qualified, quoted table name
    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    fn key_predicate(key_columns: &[String]) -> String {
        key_columns
            .iter()
            .map(|k| format!("d.{q} IS NOT DISTINCT FROM r.{q}", q = quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn object(row: Row) -> Json<JsonValue> {
        Json(JsonValue::Object(row))
    }
}

#[async_trait]
impl ContentStore for PgStore {
    fn label(&self) -> &str {
        &self.label
    }

    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.qualified(table))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn columns(&self, table: &str) -> SyncResult<Vec<ColumnInfo>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, lower(data_type)::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, type_tag)| ColumnInfo { name, type_tag })
            .collect())
    }

    async fn primary_keys(&self, table: &str) -> SyncResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = to_regclass($1) AND i.indisprimary
            ORDER BY array_position(i.indkey::int2[], a.attnum)
            "#,
        )
        .bind(self.qualified(table))
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn table_definition(&self, table: &str) -> SyncResult<Option<TableDefinition>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let rows: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
            r#"
            SELECT a.attname::text,
                   format_type(a.atttypid, a.atttypmod),
                   a.attnotnull,
                   pg_get_expr(d.adbin, d.adrelid)
            FROM pg_attribute a
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(self.qualified(table))
        .fetch_all(&self.pool)
        .await?;

        let columns = rows
            .into_iter()
            .map(|(name, formatted_type, not_null, default)| ColumnDefinition {
                name,
                formatted_type,
                not_null,
                default: default.filter(|d| !is_sequence_default(d)),
            })
            .collect();

        Ok(Some(TableDefinition {
            name: table.to_string(),
            backend: Backend::Postgres,
            columns,
            primary_key: self.primary_keys(table).await?,
        }))
    }

    async fn create_table(&self, definition: &TableDefinition) -> SyncResult<()> {
        if definition.backend != Backend::Postgres {
            return Err(SyncError::UnsupportedValue {
                table: definition.name.clone(),
                column: "*".to_string(),
                reason: format!("cannot clone {:?} DDL into Postgres", definition.backend),
            });
        }
        let sql = definition.create_statement(&self.qualified(&definition.name));
        debug!("{}: {}", self.label, sql);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        Ok(())
    }

    async fn fetch_rows(&self, table: &str, columns: &[String], order_by: &[String]) -> SyncResult<Vec<Row>> {
        let mut sql = format!(
            "SELECT to_jsonb(t) FROM (SELECT {} FROM {}) t",
            quote_list(columns),
            self.qualified(table)
        );
        if !order_by.is_empty() {
            let order: Vec<String> = order_by.iter().map(|c| format!("t.{}", quote_ident(c))).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        let rows: Vec<Json<JsonValue>> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;

        Ok(rows.into_iter().filter_map(|Json(v)| into_row(v)).collect())
    }

    async fn fetch_rows_matching(&self, table: &str, column: &str, value: &JsonValue) -> SyncResult<Vec<Row>> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE to_jsonb(t.{}) = $1",
            self.qualified(table),
            quote_ident(column)
        );
        let rows: Vec<Json<JsonValue>> = sqlx::query_scalar(&sql)
            .bind(Json(value))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;

        Ok(rows.into_iter().filter_map(|Json(v)| into_row(v)).collect())
    }

    async fn insert_row(&self, table: &str, row: &Row, columns: &[String]) -> SyncResult<()> {
        let qualified = self.qualified(table);
        let cols = quote_list(columns);
        let sql = format!(
            "INSERT INTO {q} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{q}, $1)",
            q = qualified,
            cols = cols
        );
        sqlx::query(&sql)
            .bind(Self::object(project(row, columns)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_row(&self, table: &str, key_columns: &[String], row: &Row, columns: &[String]) -> SyncResult<u64> {
        let qualified = self.qualified(table);
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{q} = r.{q}", q = quote_ident(c)))
            .collect();
        let sql = format!(
            "UPDATE {t} AS d SET {set} FROM jsonb_populate_record(NULL::{t}, $1) AS r WHERE {pred}",
            t = qualified,
            set = assignments.join(", "),
            pred = Self::key_predicate(key_columns)
        );

        let mut payload = project(row, key_columns);
        payload.extend(project(row, columns));

        let result = sqlx::query(&sql)
            .bind(Self::object(payload))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_row(&self, table: &str, key_columns: &[String], row: &Row) -> SyncResult<u64> {
        let qualified = self.qualified(table);
        let sql = format!(
            "DELETE FROM {t} AS d USING jsonb_populate_record(NULL::{t}, $1) AS r WHERE {pred}",
            t = qualified,
            pred = Self::key_predicate(key_columns)
        );
        let result = sqlx::query(&sql)
            .bind(Self::object(project(row, key_columns)))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // DELETE, not TRUNCATE: a table referenced by a foreign key cannot be
    // truncated alone even after its children are empty
    async fn truncate(&self, table: &str) -> SyncResult<()> {
        let sql = format!("DELETE FROM {}", self.qualified(table));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::query(sql.clone(), e))?;
        Ok(())
    }

    async fn contains_text(&self, table: &str, needle: &str) -> SyncResult<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} t WHERE strpos(t::text, $1) > 0)",
            self.qualified(table)
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

fn into_row(value: JsonValue) -> Option<Row> {
    match value {
        JsonValue::Object(map) => Some(map),
        _ => None,
    }
}
