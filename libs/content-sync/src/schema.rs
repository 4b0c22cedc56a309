//! Schema introspection
//!
//! Tables are discovered at call time from the catalog of each store. A
//! `ContentTable` lives for one run only; destination schemas may drift
//! between runs as migrations land.

use std::collections::HashMap;

use errors::{SyncError, SyncResult};
use serde::Serialize;
use tracing::warn;

use crate::store::ContentStore;

/// Column used as a key when neither side declares a primary key
pub const FALLBACK_KEY_COLUMN: &str = "id";

/// A table as seen in one store during one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentTable {
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<String>,
    /// Column name to lower-cased type tag
    pub column_types: HashMap<String, String>,
    pub primary_keys: Vec<String>,
}

impl ContentTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Catalog reader bound to one store
pub struct Introspector<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> Introspector<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    pub async fn exists(&self, table: &str) -> SyncResult<bool> {
        self.store.table_exists(table).await
    }

    pub async fn columns(&self, table: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .store
            .columns(table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    pub async fn column_types(&self, table: &str) -> SyncResult<HashMap<String, String>> {
        Ok(self
            .store
            .columns(table)
            .await?
            .into_iter()
            .map(|c| (c.name, c.type_tag))
            .collect())
    }

    pub async fn primary_keys(&self, table: &str) -> SyncResult<Vec<String>> {
        self.store.primary_keys(table).await
    }

    /// Full description, `None` when the table is missing
    pub async fn describe(&self, table: &str) -> SyncResult<Option<ContentTable>> {
        if !self.exists(table).await? {
            return Ok(None);
        }

        let infos = self.store.columns(table).await?;
        let columns = infos.iter().map(|c| c.name.clone()).collect();
        let column_types = infos.into_iter().map(|c| (c.name, c.type_tag)).collect();

        Ok(Some(ContentTable {
            name: table.to_string(),
            columns,
            column_types,
            primary_keys: self.primary_keys(table).await?,
        }))
    }
}

/// Recreate `table` in `to` from its definition in `from`
///
/// Fails when the source table is missing or the DDL is rejected; callers
/// skip the table for this run.
pub async fn clone_table_ddl(table: &str, from: &dyn ContentStore, to: &dyn ContentStore) -> SyncResult<()> {
    let definition = from
        .table_definition(table)
        .await?
        .ok_or_else(|| SyncError::TableNotFound(format!("{} in {}", table, from.label())))?;

    to.create_table(&definition).await.inspect_err(|e| {
        warn!("Cannot clone {} into {}: {}", table, to.label(), e);
    })
}

/// Source columns that also exist in the destination, in source order
pub fn common_columns(source: &ContentTable, destination: &ContentTable) -> Vec<String> {
    source
        .columns
        .iter()
        .filter(|c| destination.has_column(c))
        .cloned()
        .collect()
}

/// Key columns for matching rows: source PK, else destination PK, else `id`
///
/// Every key column must be common to both sides.
pub fn resolve_key_columns(
    source: &ContentTable,
    destination: &ContentTable,
    common: &[String],
) -> Option<Vec<String>> {
    let usable = |keys: &[String]| !keys.is_empty() && keys.iter().all(|k| common.contains(k));

    if usable(&source.primary_keys) {
        return Some(source.primary_keys.clone());
    }
    if usable(&destination.primary_keys) {
        return Some(destination.primary_keys.clone());
    }
    if common.iter().any(|c| c == FALLBACK_KEY_COLUMN) {
        return Some(vec![FALLBACK_KEY_COLUMN.to_string()]);
    }
    None
}

/// Type tags for the common columns, source first, destination as fallback
pub fn merged_types(
    source: &ContentTable,
    destination: &ContentTable,
    common: &[String],
) -> HashMap<String, String> {
    common
        .iter()
        .filter_map(|c| {
            source
                .column_types
                .get(c)
                .or_else(|| destination.column_types.get(c))
                .map(|t| (c.clone(), t.clone()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;

    fn table(columns: &[(&str, &str)], pks: &[&str]) -> ContentTable {
        ContentTable {
            name: "t".into(),
            columns: columns.iter().map(|(c, _)| c.to_string()).collect(),
            column_types: columns
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
            primary_keys: pks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_common_columns_keep_source_order() {
        let src = table(&[("id", "integer"), ("title", "text"), ("extra", "text")], &["id"]);
        let dst = table(&[("title", "text"), ("id", "integer"), ("local", "text")], &["id"]);
        assert_eq!(common_columns(&src, &dst), vec!["id", "title"]);
    }

    #[test]
    fn test_key_resolution_order() {
        let src = table(&[("id", "integer"), ("slug", "text")], &["slug"]);
        let dst = table(&[("id", "integer"), ("slug", "text")], &["id"]);
        let common = common_columns(&src, &dst);
        assert_eq!(resolve_key_columns(&src, &dst, &common).unwrap(), vec!["slug"]);

        let src = table(&[("id", "integer"), ("slug", "text")], &[]);
        assert_eq!(resolve_key_columns(&src, &dst, &common).unwrap(), vec!["id"]);

        let dst = table(&[("id", "integer"), ("slug", "text")], &[]);
        assert_eq!(resolve_key_columns(&src, &dst, &common).unwrap(), vec!["id"]);

        let src = table(&[("slug", "text")], &[]);
        let dst = table(&[("slug", "text")], &[]);
        let common = common_columns(&src, &dst);
        assert!(resolve_key_columns(&src, &dst, &common).is_none());
    }

    #[test]
    fn test_source_key_not_in_destination_falls_back() {
        let src = table(&[("uuid", "text"), ("id", "integer")], &["uuid"]);
        let dst = table(&[("id", "integer")], &["id"]);
        let common = common_columns(&src, &dst);
        assert_eq!(resolve_key_columns(&src, &dst, &common).unwrap(), vec!["id"]);
    }

    #[test]
    fn test_merged_types_prefer_source() {
        let src = table(&[("meta", "jsonb")], &[]);
        let dst = table(&[("meta", "text")], &[]);
        let types = merged_types(&src, &dst, &["meta".to_string()]);
        assert_eq!(types["meta"], "jsonb");
    }
}
