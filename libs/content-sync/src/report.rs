//! Run results
//!
//! Aggregate counts plus the log trail are the only contract a caller gets;
//! no per-row detail is returned.

use chrono::{DateTime, Utc};
use errors::ErrorInfo;
use serde::{Deserialize, Serialize};

use crate::config::{SyncDirection, SyncMode};
use crate::reconciler::ReconcileOutcome;
use crate::run_log::{self, LogLine};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Connecting,
    Introspecting,
    Diffing,
    Writing,
    Reconciling,
    Summarizing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Synced,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Destination-only rows kept because the table does not mirror deletes
    pub preserved: usize,
    pub unchanged: usize,
    pub failed_rows: usize,
}

impl TableReport {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Synced,
            inserted: 0,
            updated: 0,
            deleted: 0,
            preserved: 0,
            unchanged: 0,
            failed_rows: 0,
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut report = Self::new(table);
        report.status = TableStatus::Skipped {
            reason: reason.into(),
        };
        report
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, TableStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub candidates: usize,
    pub deleted: usize,
    pub skipped_in_use: usize,
    pub skipped_extraction_failed: usize,
    pub skipped_probe_failed: usize,
    pub left_in_place: usize,
}

impl AssetSummary {
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        self.candidates += 1;
        match outcome {
            ReconcileOutcome::Deleted { .. } => self.deleted += 1,
            ReconcileOutcome::SkippedInUse { .. } => self.skipped_in_use += 1,
            ReconcileOutcome::SkippedExtractionFailed => self.skipped_extraction_failed += 1,
            ReconcileOutcome::SkippedProbeFailed { .. } => self.skipped_probe_failed += 1,
            ReconcileOutcome::LeftInPlace { .. } => self.left_in_place += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed_rows: usize,
    pub tables_synced: usize,
    pub tables_skipped: usize,
    pub assets: AssetSummary,
}

impl SyncSummary {
    pub fn add_table(&mut self, table: &TableReport) {
        self.inserted += table.inserted;
        self.updated += table.updated;
        self.deleted += table.deleted;
        self.failed_rows += table.failed_rows;
        if table.is_skipped() {
            self.tables_skipped += 1;
        } else {
            self.tables_synced += 1;
        }
    }

    /// True when the run wrote nothing
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// False only when a fatal error aborted the run
    pub success: bool,
    pub error: Option<ErrorInfo>,
    pub mode: SyncMode,
    pub direction: SyncDirection,
    pub phase: SyncPhase,
    pub summary: SyncSummary,
    pub tables: Vec<TableReport>,
    pub log: Vec<LogLine>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn log_tail(&self, n: usize) -> Vec<String> {
        run_log::tail(&self.log, n)
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_aggregates_tables() {
        let mut summary = SyncSummary::default();
        let mut synced = TableReport::new("partners");
        synced.inserted = 2;
        synced.updated = 1;
        summary.add_table(&synced);
        summary.add_table(&TableReport::skipped("home_page", "no common columns"));

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.tables_synced, 1);
        assert_eq!(summary.tables_skipped, 1);
        assert!(!summary.is_noop());
    }

    #[test]
    fn test_asset_summary_counts_outcomes() {
        let mut assets = AssetSummary::default();
        assets.record(&ReconcileOutcome::SkippedExtractionFailed);
        assets.record(&ReconcileOutcome::SkippedInUse {
            table: "partners".into(),
        });
        assert_eq!(assets.candidates, 2);
        assert_eq!(assets.skipped_in_use, 1);
        assert_eq!(assets.deleted, 0);
    }
}
