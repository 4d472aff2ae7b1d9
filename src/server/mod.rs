pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backup::BackupService;
use crate::daemon::scheduler::SchedulerEngine;
use crate::models::Config;

/// Shared application state for the Axum server.
pub struct AppState {
    pub pipeline: Arc<BackupService>,
    pub engine: Arc<SchedulerEngine>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/backup", post(routes::create_backup))
        .route("/api/v1/backups", get(routes::list_backups))
        .route("/api/v1/backups/{id}", axum::routing::delete(routes::delete_backup))
        .route("/api/v1/backups/{id}/download", get(routes::download_backup))
        .route("/api/v1/jobs", get(routes::list_jobs).post(routes::create_job))
        .route("/api/v1/jobs/{id}", axum::routing::delete(routes::delete_job))
        .route("/api/v1/jobs/{id}/toggle", post(routes::toggle_job))
        .route("/api/v1/config", get(routes::get_config))
        .route("/api/v1/stats", get(routes::get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
