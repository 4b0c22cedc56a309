//! Sync orchestrator
//!
//! Drives one run over the fixed table list:
//! Connecting → per table (Introspecting → Diffing → Writing → Reconciling)
//! → Summarizing → Done. Only connection and migration failures reach
//! Aborted; anything that goes wrong inside a table skips that table or row.
//!
//! @input: `SyncConfig`, a direction and a mode
//! @output: `SyncReport` (aggregate counts + log trail)
//! @side-effects: writes to the destination store, deletes remote assets

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use errors::{ErrorInfo, Severity, SyncError, SyncResult};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assets::AssetScanner;
use crate::cloudinary::CloudinaryStore;
use crate::config::{SyncConfig, SyncDirection, SyncMode, TableSpec};
use crate::differ;
use crate::reconciler::{AssetReconciler, AssetStore};
use crate::report::{SyncPhase, SyncReport, SyncSummary, TableReport};
use crate::reset::dedup_latest;
use crate::run_log::RunLog;
use crate::schema::{self, ContentTable, Introspector};
use crate::store::{self, ContentStore};
use crate::value::Row;

/// Mutable state of one run, threaded through every step
pub(crate) struct RunContext {
    pub direction: SyncDirection,
    pub mode: SyncMode,
    pub phase: SyncPhase,
    pub log: RunLog,
    pub summary: SyncSummary,
    pub tables: Vec<TableReport>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    fn new(direction: SyncDirection, mode: SyncMode) -> Self {
        Self {
            direction,
            mode,
            phase: SyncPhase::Idle,
            log: RunLog::new(),
            summary: SyncSummary::default(),
            tables: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn set_phase(&mut self, phase: SyncPhase) {
        debug!("phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn push_table(&mut self, report: TableReport) {
        self.summary.add_table(&report);
        self.tables.push(report);
    }

    /// Record a table that could not be synced
    ///
    /// Recoverable errors skip the table and the run goes on; a fatal error
    /// is handed back so the caller aborts the run.
    pub fn skip_table(&mut self, table: &str, err: SyncError) -> SyncResult<()> {
        if err.severity() == Severity::Fatal {
            return Err(err);
        }
        self.log.warn(format!("{}: skipped, {}", table, err));
        self.push_table(TableReport::skipped(table, err.to_string()));
        Ok(())
    }

    fn abort(mut self, err: SyncError) -> SyncReport {
        self.log.error(format!("Run aborted: {}", err));
        let info = err.to_error_info();
        self.set_phase(SyncPhase::Aborted);
        self.into_report(Some(info))
    }

    fn finish(mut self) -> SyncReport {
        self.set_phase(SyncPhase::Summarizing);
        let s = &self.summary;
        let line = format!(
            "Sync {} ({}) finished: {} inserted, {} updated, {} deleted, {} failed rows, {} tables synced, {} skipped, {} assets deleted",
            self.direction,
            self.mode,
            s.inserted,
            s.updated,
            s.deleted,
            s.failed_rows,
            s.tables_synced,
            s.tables_skipped,
            s.assets.deleted
        );
        self.log.info(line);
        self.set_phase(SyncPhase::Done);
        self.into_report(None)
    }

    fn into_report(self, error: Option<ErrorInfo>) -> SyncReport {
        SyncReport {
            success: error.is_none(),
            error,
            mode: self.mode,
            direction: self.direction,
            phase: self.phase,
            summary: self.summary,
            tables: self.tables,
            log: self.log.into_lines(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Side-by-side view of one table in both stores
#[derive(Debug, Clone, Serialize)]
pub struct TableInspection {
    pub table: String,
    /// Whether the table is on the configured list
    pub listed: bool,
    pub staging: Option<ContentTable>,
    pub production: Option<ContentTable>,
    pub common_columns: Vec<String>,
    pub key_columns: Option<Vec<String>>,
}

pub struct SyncEngine {
    pub(crate) config: SyncConfig,
    pub(crate) scanner: AssetScanner,
    pub(crate) reconciler: Option<AssetReconciler>,
}

impl SyncEngine {
    /// Build the engine; asset reconciliation needs credentials and stays off without them
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let scanner = AssetScanner::new(&config.assets.host)?;

        let reconciler = if !config.assets.enabled {
            info!("Asset reconciliation disabled by configuration");
            None
        } else {
            match config.assets.credentials() {
                Some(credentials) => {
                    let store = CloudinaryStore::new(&config.assets, credentials)?;
                    Some(AssetReconciler::new(
                        Arc::new(store),
                        scanner.clone(),
                        config.assets.hypotheses()?,
                    ))
                },
                None => {
                    warn!("Asset reconciliation disabled: asset store credentials missing");
                    None
                },
            }
        };

        Ok(Self {
            config,
            scanner,
            reconciler,
        })
    }

    /// Replace the remote asset store (enables reconciliation)
    pub fn with_asset_store(mut self, store: Arc<dyn AssetStore>) -> SyncResult<Self> {
        let hypotheses = self.config.assets.hypotheses()?;
        self.reconciler = Some(AssetReconciler::new(store, self.scanner.clone(), hypotheses));
        Ok(self)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn reconciliation_enabled(&self) -> bool {
        self.reconciler.is_some()
    }

    /// Connect to both stores from configuration and run
    pub async fn run(&self, direction: SyncDirection, mode: SyncMode) -> SyncReport {
        let mut run = RunContext::new(direction, mode);
        run.set_phase(SyncPhase::Connecting);
        run.log.info(format!(
            "Sync {} ({}) started: {} -> {}",
            direction,
            mode,
            direction.source_label(),
            direction.destination_label()
        ));

        let source = match store::connect(
            direction.source_url(&self.config),
            &self.config.schema,
            direction.source_label(),
        )
        .await
        {
            Ok(store) => store,
            Err(e) => return run.abort(e),
        };

        let destination = match store::connect(
            direction.destination_url(&self.config),
            &self.config.schema,
            direction.destination_label(),
        )
        .await
        {
            Ok(store) => store,
            Err(e) => {
                source.close().await;
                return run.abort(e);
            },
        };

        let report = self.execute(run, source.as_ref(), destination.as_ref()).await;

        source.close().await;
        destination.close().await;
        report
    }

    /// Run against already-open stores
    pub async fn run_with_stores(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        direction: SyncDirection,
        mode: SyncMode,
    ) -> SyncReport {
        let mut run = RunContext::new(direction, mode);
        run.set_phase(SyncPhase::Connecting);
        run.log.info(format!(
            "Sync {} ({}) started: {} -> {}",
            direction,
            mode,
            source.label(),
            destination.label()
        ));
        self.execute(run, source, destination).await
    }

    async fn execute(
        &self,
        mut run: RunContext,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
    ) -> SyncReport {
        if let Some(dir) = &self.config.migrations_dir {
            if let Err(e) = destination.run_migrations(dir).await {
                let err = match e {
                    SyncError::Migration(_) => e,
                    other => SyncError::Migration(other.to_string()),
                };
                return run.abort(err);
            }
            run.log.info(format!("{}: migrations up to date", destination.label()));
        }

        if self.reconciler.is_none() {
            run.log.info("Asset reconciliation disabled for this run");
        }

        let result = match run.mode {
            SyncMode::Incremental => self.sync_tables(source, destination, &mut run).await,
            SyncMode::Reset => self.reset_tables(source, destination, &mut run).await,
        };

        match result {
            Ok(()) => run.finish(),
            Err(e) => run.abort(e),
        }
    }

    async fn sync_tables(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<()> {
        for spec in &self.config.tables {
            self.sync_table(spec, source, destination, run).await?;
        }
        Ok(())
    }

    /// Incremental policy for one table
    async fn sync_table(
        &self,
        spec: &TableSpec,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<()> {
        let table = spec.name.as_str();
        run.set_phase(SyncPhase::Introspecting);

        let Some((src_table, dst_table)) = self.prepare_table(table, source, destination, run).await? else {
            return Ok(());
        };

        let common = schema::common_columns(&src_table, &dst_table);
        if common.is_empty() {
            return run.skip_table(table, SyncError::NoCommonColumns(table.to_string()));
        }
        let Some(keys) = schema::resolve_key_columns(&src_table, &dst_table, &common) else {
            return run.skip_table(table, SyncError::MissingPrimaryKey(table.to_string()));
        };
        let types = schema::merged_types(&src_table, &dst_table, &common);

        run.set_phase(SyncPhase::Diffing);
        let mut source_rows = match source.fetch_rows(table, &common, &keys).await {
            Ok(rows) => rows,
            Err(e) => return run.skip_table(table, e),
        };
        let destination_rows = match destination.fetch_rows(table, &dst_table.columns, &keys).await {
            Ok(rows) => rows,
            Err(e) => return run.skip_table(table, e),
        };

        if spec.mirror_deletes {
            if let Some(rule) = &spec.dedup {
                let (rows, dropped) = dedup_latest(source_rows, rule, &types);
                source_rows = rows;
                if dropped > 0 {
                    run.log.info(format!(
                        "{}: {} duplicate {} row(s) dropped, newest kept",
                        table, dropped, rule.key_column
                    ));
                }
            }
        }

        let plan = match differ::diff(&source_rows, &destination_rows, &keys, &common, &types) {
            Ok(plan) => plan,
            Err(e) => return run.skip_table(table, e.for_table(table)),
        };

        run.set_phase(SyncPhase::Writing);
        let mut report = TableReport::new(table);
        report.unchanged = plan.unchanged;
        let mut released = BTreeSet::new();

        for row in &plan.to_insert {
            match destination.insert_row(table, row, &common).await {
                Ok(()) => report.inserted += 1,
                Err(e) => {
                    report.failed_rows += 1;
                    run.log.warn(format!("{}: insert failed: {}", table, e));
                },
            }
        }

        for update in &plan.to_update {
            match destination
                .update_row(table, &keys, &update.source, &update.changed_columns)
                .await
            {
                Ok(affected) if affected > 0 => {
                    report.updated += 1;
                    let before = self.scanner.extract_from_row(&update.destination);
                    let after = self.scanner.extract_from_row(&update.merged());
                    released.extend(before.difference(&after).cloned());
                },
                Ok(_) => {
                    report.failed_rows += 1;
                    run.log.warn(format!("{}: update matched no row", table));
                },
                Err(e) => {
                    report.failed_rows += 1;
                    run.log.warn(format!("{}: update failed: {}", table, e));
                },
            }
        }

        // Deletions come after inserts and updates of the same table
        if spec.mirror_deletes {
            for row in &plan.to_delete {
                let captured = self.capture_urls(spec, row, destination, run).await;
                match destination.delete_row(table, &keys, row).await {
                    Ok(affected) if affected > 0 => {
                        report.deleted += 1;
                        released.extend(captured);
                    },
                    Ok(_) => {},
                    Err(e) => {
                        report.failed_rows += 1;
                        run.log.warn(format!("{}: delete failed: {}", table, e));
                    },
                }
            }
        } else {
            report.preserved = plan.to_delete.len();
        }

        run.log.info(format!(
            "{}: {} inserted, {} updated, {} deleted, {} preserved, {} unchanged, {} failed",
            table,
            report.inserted,
            report.updated,
            report.deleted,
            report.preserved,
            report.unchanged,
            report.failed_rows
        ));
        run.push_table(report);

        if !released.is_empty() {
            run.set_phase(SyncPhase::Reconciling);
            self.reconcile(&released, destination, run).await;
        }
        Ok(())
    }

    /// Ensure the destination table exists and describe both sides
    ///
    /// `None` when the table was skipped.
    pub(crate) async fn prepare_table(
        &self,
        table: &str,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<Option<(ContentTable, ContentTable)>> {
        match destination.table_exists(table).await {
            Ok(true) => {},
            Ok(false) => {
                run.log.info(format!(
                    "{}: missing in {}, cloning definition from {}",
                    table,
                    destination.label(),
                    source.label()
                ));
                if let Err(e) = schema::clone_table_ddl(table, source, destination).await {
                    run.skip_table(table, e)?;
                    return Ok(None);
                }
                run.log.info(format!("{}: created in {}", table, destination.label()));
            },
            Err(e) => {
                run.skip_table(table, e)?;
                return Ok(None);
            },
        }

        let Some(src_table) = self.describe(table, source, run).await? else {
            return Ok(None);
        };
        let Some(dst_table) = self.describe(table, destination, run).await? else {
            return Ok(None);
        };

        Ok(Some((src_table, dst_table)))
    }

    async fn describe(
        &self,
        table: &str,
        store: &dyn ContentStore,
        run: &mut RunContext,
    ) -> SyncResult<Option<ContentTable>> {
        let err = match Introspector::new(store).describe(table).await {
            Ok(Some(t)) => return Ok(Some(t)),
            Ok(None) => SyncError::TableNotFound(format!("{} in {}", table, store.label())),
            Err(e) => e,
        };
        run.skip_table(table, err)?;
        Ok(None)
    }

    /// URLs held by a destination row and, for parent tables, its child rows
    async fn capture_urls(
        &self,
        spec: &TableSpec,
        row: &Row,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) -> BTreeSet<String> {
        let mut urls = self.scanner.extract_from_row(row);

        if let Some(child) = &spec.children {
            let Some(parent_value) = row.get(&child.parent_key) else {
                return urls;
            };
            match destination
                .fetch_rows_matching(&child.table, &child.foreign_key, parent_value)
                .await
            {
                Ok(children) => urls.extend(self.scanner.extract_from_rows(&children)),
                Err(e) => run.log.warn(format!(
                    "{}: reading child rows from {} failed: {}",
                    spec.name, child.table, e
                )),
            }
        }

        urls
    }

    /// Hand released URLs to the reconciler, probing every listed table
    pub(crate) async fn reconcile(
        &self,
        released: &BTreeSet<String>,
        destination: &dyn ContentStore,
        run: &mut RunContext,
    ) {
        match &self.reconciler {
            Some(reconciler) => {
                let tables = self.config.table_names();
                reconciler
                    .reconcile(released, destination, &tables, &mut run.log, &mut run.summary.assets)
                    .await;
            },
            None => run.log.info(format!(
                "{} released asset(s) left in place, reconciliation disabled",
                released.len()
            )),
        }
    }

    /// Describe one table in both stores
    pub async fn inspect(&self, table: &str) -> SyncResult<TableInspection> {
        let staging = store::connect(&self.config.staging_database_url, &self.config.schema, "staging").await?;
        let production =
            match store::connect(&self.config.production_database_url, &self.config.schema, "production").await {
                Ok(store) => store,
                Err(e) => {
                    staging.close().await;
                    return Err(e);
                },
            };

        let result = inspect_stores(table, staging.as_ref(), production.as_ref()).await;
        staging.close().await;
        production.close().await;

        let mut inspection = result?;
        inspection.listed = self.config.table(table).is_some();
        Ok(inspection)
    }
}

/// Describe `table` in two open stores
pub async fn inspect_stores(
    table: &str,
    staging: &dyn ContentStore,
    production: &dyn ContentStore,
) -> SyncResult<TableInspection> {
    let staging_table = Introspector::new(staging).describe(table).await?;
    let production_table = Introspector::new(production).describe(table).await?;

    let (common_columns, key_columns) = match (&staging_table, &production_table) {
        (Some(s), Some(p)) => {
            let common = schema::common_columns(s, p);
            let keys = schema::resolve_key_columns(s, p, &common);
            (common, keys)
        },
        _ => (Vec::new(), None),
    };

    Ok(TableInspection {
        table: table.to_string(),
        listed: false,
        staging: staging_table,
        production: production_table,
        common_columns,
        key_columns,
    })
}
