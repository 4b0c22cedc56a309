//! Remote asset reconciler
//!
//! Deletes remote assets that fell out of reference, after proving that no
//! listed destination table still mentions the stored object under any URL.
//! Any doubt (probe error, underivable identifier, store error) leaves the
//! asset in place.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use errors::SyncResult;
use serde::{Deserialize, Serialize};

use crate::assets::AssetScanner;
use crate::report::AssetSummary;
use crate::run_log::RunLog;
use crate::store::ContentStore;

/// Resource-type hypothesis for a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Raw,
    Video,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Raw => "raw",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "raw" => Ok(Self::Raw),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown resource type '{}'", other)),
        }
    }
}

/// Answer of the remote store to a single delete attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Remote media store
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn delete(&self, public_id: &str, resource_type: ResourceType) -> SyncResult<DeleteOutcome>;
}

/// Final decision for one candidate URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Deleted { resource_type: ResourceType },
    SkippedInUse { table: String },
    SkippedExtractionFailed,
    SkippedProbeFailed { table: String, reason: String },
    LeftInPlace { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEntry {
    pub url: String,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Where a URL is still referenced
enum Reference {
    Unreferenced,
    InUse(String),
    ProbeFailed { table: String, reason: String },
}

pub struct AssetReconciler {
    store: Arc<dyn AssetStore>,
    scanner: AssetScanner,
    hypotheses: Vec<ResourceType>,
}

impl AssetReconciler {
    pub fn new(store: Arc<dyn AssetStore>, scanner: AssetScanner, hypotheses: Vec<ResourceType>) -> Self {
        Self {
            store,
            scanner,
            hypotheses,
        }
    }

    pub fn hypotheses(&self) -> &[ResourceType] {
        &self.hypotheses
    }

    /// Decide and act on every candidate URL
    ///
    /// `probe` is the destination store and `tables` the full listed table
    /// set; every one of them is scanned before a delete is issued.
    pub async fn reconcile(
        &self,
        candidates: &BTreeSet<String>,
        probe: &dyn ContentStore,
        tables: &[String],
        log: &mut RunLog,
        summary: &mut AssetSummary,
    ) -> Vec<ReconcileEntry> {
        let mut entries = Vec::with_capacity(candidates.len());

        for url in candidates {
            let outcome = self.reconcile_one(url, probe, tables).await;
            match &outcome {
                ReconcileOutcome::Deleted { resource_type } => {
                    log.info(format!("Asset deleted ({}): {}", resource_type, url));
                },
                ReconcileOutcome::SkippedInUse { table } => {
                    log.info(format!("Asset kept, still referenced in {}: {}", table, url));
                },
                ReconcileOutcome::SkippedExtractionFailed => {
                    log.info(format!("Asset kept, no store identifier in URL: {}", url));
                },
                ReconcileOutcome::SkippedProbeFailed { table, reason } => {
                    log.warn(format!(
                        "Asset kept, reference scan of {} failed ({}): {}",
                        table, reason, url
                    ));
                },
                ReconcileOutcome::LeftInPlace { reason } => {
                    log.warn(format!("Asset left in place ({}): {}", reason, url));
                },
            }
            summary.record(&outcome);
            entries.push(ReconcileEntry {
                url: url.clone(),
                outcome,
            });
        }

        entries
    }

    async fn reconcile_one(&self, url: &str, probe: &dyn ContentStore, tables: &[String]) -> ReconcileOutcome {
        let Some(public_id) = self.scanner.public_id(url) else {
            return ReconcileOutcome::SkippedExtractionFailed;
        };

        let needle = reference_needle(url, &public_id);
        match find_reference(probe, tables, &needle).await {
            Reference::InUse(table) => return ReconcileOutcome::SkippedInUse { table },
            Reference::ProbeFailed { table, reason } => {
                return ReconcileOutcome::SkippedProbeFailed { table, reason }
            },
            Reference::Unreferenced => {},
        }

        self.delete_with_hypotheses(&public_id).await
    }

    /// Try each resource type in order, stopping at the first success
    pub async fn delete_with_hypotheses(&self, public_id: &str) -> ReconcileOutcome {
        let mut last_error = None;

        for resource_type in &self.hypotheses {
            match self.store.delete(public_id, *resource_type).await {
                Ok(DeleteOutcome::Deleted) => {
                    return ReconcileOutcome::Deleted {
                        resource_type: *resource_type,
                    }
                },
                Ok(DeleteOutcome::NotFound) => {},
                Err(e) => last_error = Some(format!("{}: {}", resource_type, e)),
            }
        }

        let reason = match last_error {
            Some(e) => format!("delete failed, last error {}", e),
            None => format!("not found as any of {}", join_types(&self.hypotheses)),
        };
        ReconcileOutcome::LeftInPlace { reason }
    }
}

/// Text shared by every URL of the stored object behind `url`
///
/// Version and transformation segments differ between URLs of one object,
/// the identifier path does not. With an extension the needle ends at the
/// dot, so `/c.` does not match `/cover.jpg`.
fn reference_needle(url: &str, public_id: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let has_extension = path
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'));
    if has_extension {
        format!("/{}.", public_id)
    } else {
        format!("/{}", public_id)
    }
}

/// Scan every listed table for `needle`
///
/// Missing tables cannot reference anything; a failed existence check or
/// scan stops the search and counts as a probe failure.
async fn find_reference(probe: &dyn ContentStore, tables: &[String], needle: &str) -> Reference {
    for table in tables {
        match probe.table_exists(table).await {
            Ok(true) => {},
            Ok(false) => continue,
            Err(e) => {
                return Reference::ProbeFailed {
                    table: table.clone(),
                    reason: e.to_string(),
                }
            },
        }
        match probe.contains_text(table, needle).await {
            Ok(true) => return Reference::InUse(table.clone()),
            Ok(false) => {},
            Err(e) => {
                return Reference::ProbeFailed {
                    table: table.clone(),
                    reason: e.to_string(),
                }
            },
        }
    }
    Reference::Unreferenced
}

fn join_types(types: &[ResourceType]) -> String {
    types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;
    use std::sync::Mutex;

    use errors::SyncError;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::store::SqliteStore;

    const URL: &str = "https://res.cloudinary.com/demo/image/upload/v1/gallery/a.jpg";

    /// Records calls; answers from a fixed (id, type) → outcome table
    struct ScriptedStore {
        deletable: Vec<(String, ResourceType)>,
        failing: Vec<ResourceType>,
        calls: Mutex<Vec<(String, ResourceType)>>,
    }

    #[async_trait]
    impl AssetStore for ScriptedStore {
        async fn delete(&self, public_id: &str, resource_type: ResourceType) -> SyncResult<DeleteOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((public_id.to_string(), resource_type));
            if self.failing.contains(&resource_type) {
                return Err(SyncError::AssetStore("boom".into()));
            }
            if self
                .deletable
                .iter()
                .any(|(id, t)| id == public_id && *t == resource_type)
            {
                Ok(DeleteOutcome::Deleted)
            } else {
                Ok(DeleteOutcome::NotFound)
            }
        }
    }

    fn reconciler(store: Arc<ScriptedStore>) -> AssetReconciler {
        AssetReconciler::new(
            store,
            AssetScanner::new("res.cloudinary.com").unwrap(),
            vec![ResourceType::Image, ResourceType::Raw, ResourceType::Video],
        )
    }

    #[tokio::test]
    async fn test_hypotheses_stop_at_first_success() {
        let store = Arc::new(ScriptedStore {
            deletable: vec![("docs/brochure".into(), ResourceType::Raw)],
            failing: vec![],
            calls: Mutex::new(vec![]),
        });
        let outcome = reconciler(store.clone()).delete_with_hypotheses("docs/brochure").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Deleted {
                resource_type: ResourceType::Raw
            }
        );
        let calls = store.calls.lock().unwrap();
        assert_eq!(
            calls.iter().map(|(_, t)| *t).collect::<Vec<_>>(),
            vec![ResourceType::Image, ResourceType::Raw]
        );
    }

    #[tokio::test]
    async fn test_exhausted_hypotheses_leave_asset() {
        let store = Arc::new(ScriptedStore {
            deletable: vec![],
            failing: vec![],
            calls: Mutex::new(vec![]),
        });
        let outcome = reconciler(store.clone()).delete_with_hypotheses("gone").await;
        assert!(matches!(outcome, ReconcileOutcome::LeftInPlace { .. }));
        assert_eq!(store.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_store_error_moves_to_next_hypothesis() {
        let store = Arc::new(ScriptedStore {
            deletable: vec![("a".into(), ResourceType::Video)],
            failing: vec![ResourceType::Image],
            calls: Mutex::new(vec![]),
        });
        let outcome = reconciler(store).delete_with_hypotheses("a").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Deleted {
                resource_type: ResourceType::Video
            }
        );
    }

    fn idle_store() -> Arc<ScriptedStore> {
        Arc::new(ScriptedStore {
            deletable: vec![("gallery/a".into(), ResourceType::Image)],
            failing: vec![],
            calls: Mutex::new(vec![]),
        })
    }

    /// In-memory destination with one listed `pages` table holding `body`
    async fn destination(body: &str) -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE pages (id INTEGER PRIMARY KEY, body TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO pages (id, body) VALUES (1, ?)")
            .bind(body)
            .execute(&pool)
            .await
            .unwrap();
        SqliteStore::from_pool(pool, "production")
    }

    async fn reconcile_url(store: Arc<ScriptedStore>, probe: &SqliteStore) -> (ReconcileOutcome, AssetSummary) {
        let mut log = RunLog::new();
        let mut summary = AssetSummary::default();
        let candidates = BTreeSet::from([URL.to_string()]);
        let entries = reconciler(store)
            .reconcile(&candidates, probe, &["pages".to_string()], &mut log, &mut summary)
            .await;
        (entries[0].outcome.clone(), summary)
    }

    #[tokio::test]
    async fn test_unreferenced_asset_is_deleted() {
        let store = idle_store();
        let probe = destination("no images here, see /gallery/about").await;

        let (outcome, summary) = reconcile_url(store.clone(), &probe).await;

        assert_eq!(
            outcome,
            ReconcileOutcome::Deleted {
                resource_type: ResourceType::Image
            }
        );
        assert_eq!(summary.deleted, 1);
        assert_eq!(store.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_asset() {
        let store = idle_store();
        let probe = destination("").await;
        probe.pool().close().await;

        let (outcome, summary) = reconcile_url(store.clone(), &probe).await;

        assert!(
            matches!(&outcome, ReconcileOutcome::SkippedProbeFailed { table, .. } if table == "pages"),
            "{:?}",
            outcome
        );
        assert_eq!(summary.skipped_probe_failed, 1);
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_version_of_same_object_keeps_asset() {
        let store = idle_store();
        let probe = destination(
            r#"{"hero":"https://res.cloudinary.com/demo/image/upload/w_400/v7/gallery/a.jpg"}"#,
        )
        .await;

        let (outcome, _) = reconcile_url(store.clone(), &probe).await;

        assert_eq!(
            outcome,
            ReconcileOutcome::SkippedInUse {
                table: "pages".to_string()
            }
        );
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reference_needle() {
        assert_eq!(reference_needle(URL, "gallery/a"), "/gallery/a.");
        assert_eq!(
            reference_needle("https://res.cloudinary.com/demo/raw/upload/v3/docs/brochure?dl=1", "docs/brochure"),
            "/docs/brochure"
        );
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("IMAGE".parse::<ResourceType>().unwrap(), ResourceType::Image);
        assert!("audio".parse::<ResourceType>().is_err());
    }
}
