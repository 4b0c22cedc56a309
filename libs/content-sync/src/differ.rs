//! Row differ
//!
//! Classifies every composite key of two row sets as insert, update, delete
//! candidate or unchanged. Comparison runs over the common columns only, with
//! values compared in canonical form.

use std::collections::{HashMap, HashSet};

use errors::SyncError;
use thiserror::Error;

use crate::value::{composite_key, normalize_field, Row};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("source and destination have no columns in common")]
    NoCommonColumns,
    #[error("no key columns to match rows on")]
    NoKeyColumns,
}

impl DiffError {
    /// Table-level error for the run report
    pub fn for_table(self, table: &str) -> SyncError {
        match self {
            Self::NoCommonColumns => SyncError::NoCommonColumns(table.to_string()),
            Self::NoKeyColumns => SyncError::MissingPrimaryKey(table.to_string()),
        }
    }
}

/// A row present on both sides with at least one differing column
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub key: String,
    /// Only the columns whose canonical values differ, in common-column order
    pub changed_columns: Vec<String>,
    pub source: Row,
    pub destination: Row,
}

impl RowUpdate {
    /// Destination row after the update is applied
    pub fn merged(&self) -> Row {
        let mut next = self.destination.clone();
        for column in &self.changed_columns {
            if let Some(value) = self.source.get(column) {
                next.insert(column.clone(), value.clone());
            }
        }
        next
    }
}

/// Per-table plan of writes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Source rows missing from the destination, in source order
    pub to_insert: Vec<Row>,
    pub to_update: Vec<RowUpdate>,
    /// Destination rows missing from the source, in destination order
    pub to_delete: Vec<Row>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Diff two row sets keyed by `key_columns`
pub fn diff(
    source_rows: &[Row],
    destination_rows: &[Row],
    key_columns: &[String],
    common_columns: &[String],
    column_types: &HashMap<String, String>,
) -> Result<SyncPlan, DiffError> {
    if common_columns.is_empty() {
        return Err(DiffError::NoCommonColumns);
    }
    if key_columns.is_empty() {
        return Err(DiffError::NoKeyColumns);
    }

    let destination_by_key: HashMap<String, &Row> = destination_rows
        .iter()
        .map(|row| (composite_key(row, key_columns, column_types), row))
        .collect();

    let mut plan = SyncPlan::default();
    let mut source_keys = HashSet::with_capacity(source_rows.len());

    for source in source_rows {
        let key = composite_key(source, key_columns, column_types);
        if !source_keys.insert(key.clone()) {
            // Duplicate key on the source side, first occurrence wins
            continue;
        }

        match destination_by_key.get(&key) {
            None => plan.to_insert.push(source.clone()),
            Some(destination) => {
                let changed_columns: Vec<String> = common_columns
                    .iter()
                    .filter(|c| {
                        normalize_field(source, c, column_types)
                            != normalize_field(destination, c, column_types)
                    })
                    .cloned()
                    .collect();

                if changed_columns.is_empty() {
                    plan.unchanged += 1;
                } else {
                    plan.to_update.push(RowUpdate {
                        key,
                        changed_columns,
                        source: source.clone(),
                        destination: (*destination).clone(),
                    });
                }
            },
        }
    }

    let mut deleted_keys = HashSet::new();
    for destination in destination_rows {
        let key = composite_key(destination, key_columns, column_types);
        if !source_keys.contains(&key) && deleted_keys.insert(key) {
            plan.to_delete.push(destination.clone());
        }
    }

    Ok(plan)
}
