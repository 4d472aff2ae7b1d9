use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::models::{BackupRecord, RecordStatus};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the newest finished backup failed.
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub active_jobs: usize,
    pub storage: String,
    pub version: &'static str,
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<LastBackup>,
}

#[derive(Debug, Serialize)]
pub struct LastBackup {
    pub id: i64,
    pub name: String,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
}

fn newest_finished(history: &[BackupRecord]) -> Option<LastBackup> {
    history
        .iter()
        .find(|r| r.status.is_terminal())
        .map(|r| LastBackup {
            id: r.id,
            name: r.name.clone(),
            status: r.status,
            timestamp: r.timestamp,
        })
}

/// GET /health
///
/// Always 200 while the process is serving; a ledger read failure only
/// drops `last_backup`.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last_backup = match state.pipeline.get_backup_history().await {
        Ok(history) => newest_finished(&history),
        Err(e) => {
            tracing::warn!("Health check could not read the ledger: {}", e);
            None
        }
    };

    let status = match &last_backup {
        Some(last) if last.status == RecordStatus::Failed => "degraded",
        _ => "ok",
    };

    Json(HealthResponse {
        status,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_jobs: state.engine.installed_count(),
        storage: state.pipeline.backend().kind().to_string(),
        version: env!("CARGO_PKG_VERSION"),
        data_dir: state
            .config
            .data_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        last_backup,
    })
}
