//! Full environment reset
//!
//! Destination becomes an exact copy of source for every listed table:
//! 1. snapshot source rows (deduplicated where a rule exists) and destination rows
//! 2. collect reconciliation candidates: destination URLs no source row references
//! 3. truncate the reloaded tables in reverse list order
//! 4. reload them in list order
//! 5. reconcile candidates against the post-reset destination

use std::collections::{BTreeSet, HashMap};

use errors::{SyncError, SyncResult};
use serde_json::Value as JsonValue;

use crate::config::{DedupRule, TableSpec};
use crate::engine::{RunContext, SyncEngine};
use crate::report::{SyncPhase, TableReport};
use crate::schema;
use crate::store::ContentStore;
use crate::value::{normalize_field, parse_timestamp_millis, Row, NULL_SENTINEL};

/// Snapshot of one table waiting to be reloaded
struct ReloadPlan<'a> {
    spec: &'a TableSpec,
    columns: Vec<String>,
    rows: Vec<Row>,
    /// `None` when the destination could not be read
    destination_rows: Option<Vec<Row>>,
    /// Set when the table could not be emptied and is left as is
    truncate_error: Option<SyncError>,
}

impl SyncEngine {
    pub(crate) async fn reset_tables(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<()> {
        run.log.info(format!(
            "Reset: {} will be replaced by {} for {} table(s)",
            destination.label(),
            source.label(),
            self.config.tables.len()
        ));

        let mut plans: Vec<ReloadPlan<'_>> = Vec::new();
        let mut assets_readable = true;

        for spec in &self.config.tables {
            run.set_phase(SyncPhase::Introspecting);
            // Tables that cannot be snapshotted are recorded as skipped right away
            if let Some(plan) = self.snapshot_table(spec, source, destination, run).await? {
                if plan.destination_rows.is_none() {
                    assets_readable = false;
                }
                plans.push(plan);
            }
        }

        run.set_phase(SyncPhase::Diffing);
        let candidates = if self.reconciler.is_none() {
            BTreeSet::new()
        } else if !assets_readable {
            run.log.warn("Reset: destination snapshot incomplete, asset reconciliation skipped");
            BTreeSet::new()
        } else {
            let source_urls = self
                .scanner
                .extract_from_rows(plans.iter().flat_map(|p| p.rows.iter()));
            let destination_urls = self.scanner.extract_from_rows(
                plans
                    .iter()
                    .flat_map(|p| p.destination_rows.iter().flatten()),
            );
            destination_urls
                .difference(&source_urls)
                .cloned()
                .collect::<BTreeSet<String>>()
        };

        run.set_phase(SyncPhase::Writing);
        for plan in plans.iter_mut().rev() {
            if let Err(e) = destination.truncate(&plan.spec.name).await {
                run.log.error(format!("{}: truncate failed, table left as is", plan.spec.name));
                plan.truncate_error = Some(e);
            }
        }

        for plan in &mut plans {
            let table = plan.spec.name.as_str();
            if let Some(e) = plan.truncate_error.take() {
                run.skip_table(table, e)?;
                continue;
            }

            let mut report = TableReport::new(table);
            report.deleted = plan.destination_rows.as_ref().map_or(0, Vec::len);
            for row in &plan.rows {
                match destination.insert_row(table, row, &plan.columns).await {
                    Ok(()) => report.inserted += 1,
                    Err(e) => {
                        report.failed_rows += 1;
                        run.log.warn(format!("{}: reload insert failed: {}", table, e));
                    },
                }
            }
            run.log.info(format!(
                "{}: {} removed, {} reloaded, {} failed",
                table, report.deleted, report.inserted, report.failed_rows
            ));
            run.push_table(report);
        }

        // Report in list order
        let position: HashMap<&str, usize> = self
            .config
            .tables
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.as_str(), i))
            .collect();
        run.tables
            .sort_by_key(|t| position.get(t.table.as_str()).copied().unwrap_or(usize::MAX));

        if !candidates.is_empty() {
            run.set_phase(SyncPhase::Reconciling);
            run.log.info(format!(
                "Reset: {} asset(s) no longer referenced by source",
                candidates.len()
            ));
            self.reconcile(&candidates, destination, run).await;
        }
        Ok(())
    }

    async fn snapshot_table<'a>(
        &self,
        spec: &'a TableSpec,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<Option<ReloadPlan<'a>>> {
        let table = spec.name.as_str();
        let Some((src_table, dst_table)) = self.prepare_table(table, source, destination, run).await? else {
            return Ok(None);
        };

        let common = schema::common_columns(&src_table, &dst_table);
        if common.is_empty() {
            run.skip_table(table, SyncError::NoCommonColumns(table.to_string()))?;
            return Ok(None);
        }
        let order = schema::resolve_key_columns(&src_table, &dst_table, &common).unwrap_or_default();
        let types = schema::merged_types(&src_table, &dst_table, &common);

        let mut rows = match source.fetch_rows(table, &common, &order).await {
            Ok(rows) => rows,
            Err(e) => {
                run.skip_table(table, e)?;
                return Ok(None);
            },
        };

        if let Some(rule) = &spec.dedup {
            let (kept, dropped) = dedup_latest(rows, rule, &types);
            rows = kept;
            if dropped > 0 {
                run.log.info(format!(
                    "{}: {} duplicate {} row(s) dropped, newest kept",
                    table, dropped, rule.key_column
                ));
            }
        }

        let destination_rows = match destination.fetch_rows(table, &dst_table.columns, &order).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                run.log.warn(format!(
                    "{}: reading {} rows failed: {}",
                    table,
                    destination.label(),
                    e
                ));
                None
            },
        };

        Ok(Some(ReloadPlan {
            spec,
            columns: common,
            rows,
            destination_rows,
            truncate_error: None,
        }))
    }
}

/// Keep only the most recently created row per natural key
///
/// Keys compare case-insensitively after trimming; rows with a null key are
/// all kept. Rows without a readable creation time lose against any row
/// that has one, later rows win ties. Returns kept rows in their original
/// order and the number dropped.
pub fn dedup_latest(rows: Vec<Row>, rule: &DedupRule, column_types: &HashMap<String, String>) -> (Vec<Row>, usize) {
    let mut winners: HashMap<String, (usize, Option<i64>)> = HashMap::new();

    for (index, row) in rows.iter().enumerate() {
        let key = normalize_field(row, &rule.key_column, column_types);
        if key == NULL_SENTINEL {
            continue;
        }
        let key = key.trim().to_lowercase();
        let created = created_millis(row.get(&rule.created_column));

        match winners.get(&key) {
            Some((_, best)) if created < *best => {},
            _ => {
                winners.insert(key, (index, created));
            },
        }
    }

    let total = rows.len();
    let kept: Vec<Row> = rows
        .into_iter()
        .enumerate()
        .filter(|(index, row)| {
            let key = normalize_field(row, &rule.key_column, column_types);
            if key == NULL_SENTINEL {
                return true;
            }
            winners
                .get(&key.trim().to_lowercase())
                .is_some_and(|(winner, _)| winner == index)
        })
        .map(|(_, row)| row)
        .collect();

    let dropped = total - kept.len();
    (kept, dropped)
}

fn created_millis(value: Option<&JsonValue>) -> Option<i64> {
    match value? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => parse_timestamp_millis(s),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> DedupRule {
        DedupRule {
            key_column: "email".into(),
            created_column: "created_at".into(),
        }
    }

    fn types() -> HashMap<String, String> {
        HashMap::from([
            ("email".to_string(), "text".to_string()),
            ("created_at".to_string(), "timestamp".to_string()),
        ])
    }

    fn lead(id: i64, email: &str, created: &str) -> Row {
        json!({"id": id, "email": email, "created_at": created})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_newest_row_per_email_wins() {
        let rows = vec![
            lead(1, "a@example.com", "2024-01-01 10:00:00"),
            lead(2, "b@example.com", "2024-01-02 10:00:00"),
            lead(3, "A@example.com ", "2024-02-01 10:00:00"),
            lead(4, "a@example.com", "2023-12-31 10:00:00"),
        ];
        let (kept, dropped) = dedup_latest(rows, &rule(), &types());
        assert_eq!(dropped, 2);
        let ids: Vec<_> = kept.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_ties_and_missing_created_at() {
        let mut no_date = lead(1, "x@example.com", "");
        no_date.insert("created_at".into(), JsonValue::Null);
        let rows = vec![
            lead(2, "x@example.com", "2024-01-01 00:00:00"),
            no_date,
            lead(3, "x@example.com", "2024-01-01 00:00:00"),
        ];
        let (kept, dropped) = dedup_latest(rows, &rule(), &types());
        assert_eq!(dropped, 2);
        assert_eq!(kept[0]["id"], json!(3));
    }

    #[test]
    fn test_null_keys_are_kept() {
        let mut a = lead(1, "", "2024-01-01 00:00:00");
        a.insert("email".into(), JsonValue::Null);
        let mut b = a.clone();
        b.insert("id".into(), json!(2));
        let (kept, dropped) = dedup_latest(vec![a, b], &rule(), &types());
        assert_eq!(dropped, 0);
        assert_eq!(kept.len(), 2);
    }
}
