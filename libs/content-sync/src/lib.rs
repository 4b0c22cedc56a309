//! Content synchronization and asset reconciliation engine
//!
//! Copies content tables between the staging and production databases in
//! either direction and garbage-collects remote media that no content row
//! references any more.
//!
//! ```rust,ignore
//! let config = SyncConfig::load(Some(Path::new("content-sync.yaml")))?;
//! let engine = SyncEngine::new(config)?;
//! let report = engine.run(SyncDirection::Push, SyncMode::Incremental).await;
//! println!("{} inserted, {} updated", report.summary.inserted, report.summary.updated);
//! ```

pub mod assets;
pub mod cloudinary;
pub mod config;
pub mod differ;
pub mod engine;
pub mod reconciler;
pub mod report;
pub mod reset;
pub mod run_log;
pub mod schema;
pub mod store;
pub mod value;

pub use assets::AssetScanner;
pub use config::{SyncConfig, SyncDirection, SyncMode, TableSpec};
pub use engine::{SyncEngine, TableInspection};
pub use reconciler::{AssetReconciler, AssetStore, DeleteOutcome, ReconcileOutcome, ResourceType};
pub use report::{SyncPhase, SyncReport, SyncSummary, TableReport, TableStatus};
pub use store::{connect, ContentStore, PgStore, SqliteStore};
pub use value::Row;

pub use errors::{SyncError, SyncResult};
