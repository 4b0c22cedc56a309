//! Shared fixtures for engine integration tests
#![allow(clippy::disallowed_methods, dead_code)] // unwrap is acceptable in tests

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::test_utils::schema;
use content_sync::reconciler::{AssetStore, DeleteOutcome, ResourceType};
use content_sync::store::{Backend, ColumnInfo, TableDefinition};
use content_sync::{ContentStore, Row, SqliteStore, SyncConfig, SyncEngine, SyncError, SyncResult};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

/// Host used by every asset URL in the fixtures
pub const ASSET_HOST: &str = "store";

pub fn asset(name: &str) -> String {
    format!("https://{}/img/v1/{}", ASSET_HOST, name)
}

/// Records every delete call; only image resources exist
#[derive(Default)]
pub struct FakeAssetStore {
    calls: Mutex<Vec<(String, ResourceType)>>,
    deleted: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeAssetStore {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, ResourceType)> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every delete of `public_id` fail
    pub fn fail_on(&self, public_id: &str) {
        self.failing.lock().unwrap().insert(public_id.to_string());
    }
}

#[async_trait]
impl AssetStore for FakeAssetStore {
    async fn delete(&self, public_id: &str, resource_type: ResourceType) -> SyncResult<DeleteOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((public_id.to_string(), resource_type));

        if self.failing.lock().unwrap().contains(public_id) {
            return Err(SyncError::AssetStore("simulated outage".to_string()));
        }
        if resource_type != ResourceType::Image {
            return Ok(DeleteOutcome::NotFound);
        }
        self.deleted.lock().unwrap().push(public_id.to_string());
        Ok(DeleteOutcome::Deleted)
    }
}

/// A staging and a production database in one temp directory
pub struct TestEnv {
    _dir: TempDir,
    pub staging: SqliteStore,
    pub production: SqliteStore,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_production_skipping(&[]).await
    }

    /// Production is created without the named tables
    pub async fn with_production_skipping(skip: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let staging = open_store(&dir.path().join("staging.db"), "staging").await;
        let production = open_store(&dir.path().join("production.db"), "production").await;

        schema::init_content_schema(staging.pool()).await.unwrap();
        schema::init_content_schema_except(production.pool(), skip)
            .await
            .unwrap();

        Self {
            _dir: dir,
            staging,
            production,
        }
    }
}

async fn open_store(path: &Path, label: &str) -> SqliteStore {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    SqliteStore::from_pool(pool, label)
}

pub fn config() -> SyncConfig {
    let mut config = SyncConfig {
        staging_database_url: "sqlite://unused-staging.db".to_string(),
        production_database_url: "sqlite://unused-production.db".to_string(),
        ..Default::default()
    };
    config.assets.host = ASSET_HOST.to_string();
    config
}

/// Engine wired to a fresh fake asset store
pub fn engine() -> (SyncEngine, Arc<FakeAssetStore>) {
    let assets = Arc::new(FakeAssetStore::default());
    let engine = SyncEngine::new(config())
        .unwrap()
        .with_asset_store(assets.clone())
        .unwrap();
    (engine, assets)
}

pub async fn exec(store: &SqliteStore, sql: &str) {
    sqlx::query(sql).execute(store.pool()).await.unwrap();
}

pub async fn count(store: &SqliteStore, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

pub async fn text(store: &SqliteStore, sql: &str) -> Option<String> {
    sqlx::query_scalar(sql).fetch_one(store.pool()).await.unwrap()
}

/// A store that misbehaves in chosen ways, delegating everything else
pub struct FaultyStore<'a> {
    inner: &'a SqliteStore,
    /// Table definitions claim to come from Postgres
    foreign_ddl: bool,
    /// Substring scans fail
    failing_scan: bool,
}

impl<'a> FaultyStore<'a> {
    pub fn foreign_ddl(inner: &'a SqliteStore) -> Self {
        Self {
            inner,
            foreign_ddl: true,
            failing_scan: false,
        }
    }

    pub fn failing_scan(inner: &'a SqliteStore) -> Self {
        Self {
            inner,
            foreign_ddl: false,
            failing_scan: true,
        }
    }
}

#[async_trait]
impl ContentStore for FaultyStore<'_> {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn columns(&self, table: &str) -> SyncResult<Vec<ColumnInfo>> {
        self.inner.columns(table).await
    }

    async fn primary_keys(&self, table: &str) -> SyncResult<Vec<String>> {
        self.inner.primary_keys(table).await
    }

    async fn table_definition(&self, table: &str) -> SyncResult<Option<TableDefinition>> {
        let definition = self.inner.table_definition(table).await?;
        if self.foreign_ddl {
            return Ok(definition.map(|d| TableDefinition {
                backend: Backend::Postgres,
                ..d
            }));
        }
        Ok(definition)
    }

    async fn create_table(&self, definition: &TableDefinition) -> SyncResult<()> {
        self.inner.create_table(definition).await
    }

    async fn fetch_rows(&self, table: &str, columns: &[String], order_by: &[String]) -> SyncResult<Vec<Row>> {
        self.inner.fetch_rows(table, columns, order_by).await
    }

    async fn fetch_rows_matching(&self, table: &str, column: &str, value: &JsonValue) -> SyncResult<Vec<Row>> {
        self.inner.fetch_rows_matching(table, column, value).await
    }

    async fn insert_row(&self, table: &str, row: &Row, columns: &[String]) -> SyncResult<()> {
        self.inner.insert_row(table, row, columns).await
    }

    async fn update_row(&self, table: &str, key_columns: &[String], row: &Row, columns: &[String]) -> SyncResult<u64> {
        self.inner.update_row(table, key_columns, row, columns).await
    }

    async fn delete_row(&self, table: &str, key_columns: &[String], row: &Row) -> SyncResult<u64> {
        self.inner.delete_row(table, key_columns, row).await
    }

    async fn truncate(&self, table: &str) -> SyncResult<()> {
        self.inner.truncate(table).await
    }

    async fn contains_text(&self, table: &str, needle: &str) -> SyncResult<bool> {
        if self.failing_scan {
            return Err(SyncError::query(format!("scan {}", table), "disk I/O error"));
        }
        self.inner.contains_text(table, needle).await
    }

    async fn run_migrations(&self, dir: &Path) -> SyncResult<()> {
        self.inner.run_migrations(dir).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
