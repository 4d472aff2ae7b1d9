use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::backup::BackupOptions;
use crate::errors::BackupError;
use crate::models::{BackupRecord, JobView, NewScheduledJob, ScheduledJob};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// `BackupError` rendered as `{"error", "message"}` with a matching status.
pub struct ApiError(pub BackupError);

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            BackupError::Validation(_)
            | BackupError::Cron(_)
            | BackupError::UnsupportedStorage(_) => StatusCode::BAD_REQUEST,
            BackupError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::warn!("Request rejected: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.code().to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Manual backup request. Omitted fields mean "include" and the configured
/// compression default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub include_data: Option<bool>,
    pub include_schema: Option<bool>,
    pub compression: Option<bool>,
}

impl BackupRequest {
    pub fn into_options(self, default_compression: bool) -> BackupOptions {
        BackupOptions {
            include_data: self.include_data.unwrap_or(true),
            include_schema: self.include_schema.unwrap_or(true),
            compression: self.compression.unwrap_or(default_compression),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_backups: usize,
    pub successful_backups: usize,
    pub failed_backups: usize,
    pub running_backups: usize,
    pub active_jobs: usize,
    pub total_jobs: usize,
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

/// POST /api/v1/backup
///
/// Runs on a tracked background task; the outcome shows up in the history.
pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackupRequest>,
) -> impl IntoResponse {
    let options = request.into_options(state.pipeline.settings().default_compression);
    // failures are logged by the pipeline and land in the history
    state.pipeline.spawn_backup(options);

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
            message: "Backup started".to_string(),
        }),
    )
}

/// GET /api/v1/backups
pub async fn list_backups(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<BackupRecord>>> {
    Ok(Json(state.pipeline.get_backup_history().await?))
}

/// DELETE /api/v1/backups/{id}
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.pipeline.delete_backup(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/backups/{id}/download
pub async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let download = state.pipeline.download_backup(id).await?;
    let disposition = format!("attachment; filename=\"{}\"", download.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobView>>> {
    Ok(Json(state.engine.get_jobs().await?))
}

/// POST /api/v1/jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewScheduledJob>,
) -> ApiResult<(StatusCode, Json<ScheduledJob>)> {
    let job = state.engine.create_job(new).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.engine.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{id}/toggle
pub async fn toggle_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ToggleResponse>> {
    let enabled = state.engine.toggle_job(id).await?;
    Ok(Json(ToggleResponse { enabled }))
}

// ---------------------------------------------------------------------------
// Config and stats
// ---------------------------------------------------------------------------

/// GET /api/v1/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.redacted())
}

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let summary = state.pipeline.summary().await?;
    let jobs = state.engine.get_jobs().await?;
    Ok(Json(StatsResponse {
        total_backups: summary.total_backups,
        successful_backups: summary.successful_backups,
        failed_backups: summary.failed_backups,
        running_backups: summary.running_backups,
        active_jobs: jobs.iter().filter(|j| j.job.enabled).count(),
        total_jobs: jobs.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_request_defaults() {
        let request: BackupRequest = serde_json::from_str("{}").unwrap();
        let options = request.into_options(false);
        assert!(options.include_data);
        assert!(options.include_schema);
        assert!(!options.compression);
    }

    #[test]
    fn test_backup_request_explicit_flags() {
        let request: BackupRequest =
            serde_json::from_str(r#"{"includeData": false, "compression": true}"#).unwrap();
        let options = request.into_options(false);
        assert!(!options.include_data);
        assert!(options.include_schema);
        assert!(options.compression);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (BackupError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (BackupError::Cron("x".into()), StatusCode::BAD_REQUEST),
            (BackupError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BackupError::Ledger("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (BackupError::Dump("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
