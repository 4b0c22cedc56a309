//! HTTP trigger for sync and reset runs
//!
//! One run per process at a time; a second trigger while a run holds the
//! lock gets 409. Runs are wrapped in the configured outer timeout, and a
//! timeout leaves the destination in an unknown but re-runnable state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use common::api_types::HealthStatus;
use common::{AppError, SuccessResponse};
use content_sync::report::{SyncSummary, TableReport};
use content_sync::{SyncDirection, SyncEngine, SyncMode, SyncPhase, SyncReport};
use errors::{SyncError, SyncErrorTrait};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Log lines returned with each run
const LOG_TAIL_LINES: usize = 50;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<SyncEngine>,
    run_lock: Arc<Mutex<()>>,
    run_timeout: Duration,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        let run_timeout = Duration::from_secs(engine.config().run_timeout_secs);
        Self {
            engine: Arc::new(engine),
            run_lock: Arc::new(Mutex::new(())),
            run_timeout,
        }
    }
}

/// Body of a completed run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub direction: SyncDirection,
    pub mode: SyncMode,
    pub phase: SyncPhase,
    pub summary: SyncSummary,
    pub tables: Vec<TableReport>,
    pub log: Vec<String>,
    pub duration_ms: i64,
}

impl From<&SyncReport> for RunResponse {
    fn from(report: &SyncReport) -> Self {
        Self {
            success: report.success,
            direction: report.direction,
            mode: report.mode,
            phase: report.phase,
            summary: report.summary.clone(),
            tables: report.tables.clone(),
            log: report.log_tail(LOG_TAIL_LINES),
            duration_ms: report.duration_ms(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sync/{direction}", post(trigger_sync))
        .route("/api/reset/{direction}", post(trigger_reset))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM
pub async fn serve(engine: SyncEngine, bind: SocketAddr) -> anyhow::Result<()> {
    let app = router(AppState::new(engine));
    let listener = TcpListener::bind(bind).await?;

    info!("Sync trigger listening on {}", bind);
    info!("  GET  /health");
    info!("  POST /api/sync/{{push|pull}}");
    info!("  POST /api/reset/{{push|pull}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(common::shutdown::wait_for_shutdown())
        .await?;

    info!("Sync trigger stopped");
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        service: "syncctl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        busy: state.run_lock.try_lock().is_err(),
        timestamp: Utc::now(),
    })
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(direction): Path<String>,
) -> Result<Json<SuccessResponse<RunResponse>>, AppError> {
    run(&state, &direction, SyncMode::Incremental).await
}

async fn trigger_reset(
    State(state): State<AppState>,
    Path(direction): Path<String>,
) -> Result<Json<SuccessResponse<RunResponse>>, AppError> {
    run(&state, &direction, SyncMode::Reset).await
}

async fn run(
    state: &AppState,
    direction: &str,
    mode: SyncMode,
) -> Result<Json<SuccessResponse<RunResponse>>, AppError> {
    let direction: SyncDirection = direction.parse().map_err(AppError::bad_request)?;

    let Ok(_guard) = state.run_lock.try_lock() else {
        warn!("Rejected {} ({}) trigger, a run is in progress", direction, mode);
        return Err(SyncError::Busy(format!("{} ({}) rejected", direction, mode)).into());
    };

    info!("Triggered {} ({}) over HTTP", direction, mode);
    let report = match tokio::time::timeout(state.run_timeout, state.engine.run(direction, mode)).await {
        Ok(report) => report,
        Err(_) => {
            let err = SyncError::Timeout(format!(
                "{} ({}) after {}s, final state unknown, re-run is safe",
                direction,
                mode,
                state.run_timeout.as_secs()
            ));
            warn!("{}", err);
            return Err(AppError::new(err.http_status(), err.to_error_info()));
        },
    };

    if let Some(error) = &report.error {
        let status = StatusCode::from_u16(error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(AppError::new(status, error.clone()).with_details(report.log_tail(LOG_TAIL_LINES).join("\n")));
    }

    let response = SuccessResponse::new(RunResponse::from(&report))
        .with_metadata("finished_at", serde_json::json!(report.finished_at.to_rfc3339()));
    Ok(Json(response))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // unwrap is acceptable in tests
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use common::test_utils::schema;
    use content_sync::SyncConfig;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn create_db(path: &std::path::Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        schema::init_content_schema(&pool).await.unwrap();
        pool.close().await;
    }

    async fn state_with_databases(dir: &TempDir) -> AppState {
        let staging = dir.path().join("staging.db");
        let production = dir.path().join("production.db");
        create_db(&staging).await;
        create_db(&production).await;

        let config = SyncConfig {
            staging_database_url: format!("sqlite://{}", staging.display()),
            production_database_url: format!("sqlite://{}", production.display()),
            ..Default::default()
        };
        AppState::new(SyncEngine::new(config).unwrap())
    }

    fn unreachable_state() -> AppState {
        let config = SyncConfig {
            staging_database_url: "sqlite:///nonexistent/dir/staging.db".to_string(),
            production_database_url: "sqlite:///nonexistent/dir/production.db".to_string(),
            ..Default::default()
        };
        AppState::new(SyncEngine::new(config).unwrap())
    }

    async fn post(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_idle() {
        let response = router(unreachable_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthStatus = serde_json::from_slice(&body).unwrap();
        assert!(!health.busy);
    }

    #[tokio::test]
    async fn test_sync_returns_summary_and_log() {
        let dir = TempDir::new().unwrap();
        let state = state_with_databases(&dir).await;

        let (status, body) = post(state, "/api/sync/push").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["phase"], "done");
        assert_eq!(body["data"]["summary"]["tables_synced"], 8);
        assert!(!body["data"]["log"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_direction_is_bad_request() {
        let (status, body) = post(unreachable_state(), "/api/sync/sideways").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_overlapping_trigger_conflicts() {
        let state = unreachable_state();
        let _held = state.run_lock.clone().try_lock_owned().unwrap();

        let (status, body) = post(state, "/api/reset/push").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], 409);
    }

    #[tokio::test]
    async fn test_fatal_run_maps_to_error_status() {
        let (status, body) = post(unreachable_state(), "/api/sync/pull").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert!(body["error"]["details"].as_str().unwrap().contains("Run aborted"));
    }
}
