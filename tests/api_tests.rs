//! HTTP API integration tests.
//!
//! Each test serves the real router on a random port backed by JSON stores
//! in a temp dir and a scripted dump producer.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use pg_backup_manager::backend::local::LocalBackend;
use pg_backup_manager::backup::{BackupOptions, BackupService, DumpProducer, PipelineSettings};
use pg_backup_manager::daemon::scheduler::{SchedulerEngine, SystemClock};
use pg_backup_manager::errors::BackupError;
use pg_backup_manager::models::{Config, LocalConfig};
use pg_backup_manager::server::{self, AppState};
use pg_backup_manager::storage::jobs::JsonJobStore;
use pg_backup_manager::storage::records::JsonRecordStore;

const SQL: &str = "CREATE TABLE accounts (id int);\nINSERT INTO accounts VALUES (1);\n";

struct SqlDump;

#[async_trait]
impl DumpProducer for SqlDump {
    async fn produce(&self, _options: &BackupOptions, target: &Path) -> Result<(), BackupError> {
        tokio::fs::write(target, SQL).await.map_err(BackupError::from)
    }
}

// ---------------------------------------------------------------------------
// Helper to spawn a test server on a random port
// ---------------------------------------------------------------------------

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    _tmp: TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn spawn_test_server() -> TestServer {
    let tmp = TempDir::new().unwrap();

    let mut config = Config::default();
    config.data_dir = Some(tmp.path().to_path_buf());
    config.temp_dir = Some(tmp.path().join("scratch"));
    config.database.password = "s3cret".to_string();
    config.storage.local = LocalConfig {
        backup_path: tmp.path().join("backups"),
        compression: false,
        retention: 0,
        verify_content: true,
    };

    let records = Arc::new(JsonRecordStore::new(tmp.path().to_path_buf()).await.unwrap());
    let jobs = Arc::new(JsonJobStore::new(tmp.path().to_path_buf()).await.unwrap());
    let backend = Arc::new(LocalBackend::new(&config.storage.local));
    let pipeline = Arc::new(BackupService::new(
        records,
        backend,
        Arc::new(SqlDump),
        PipelineSettings::from_config(&config),
    ));
    let engine = Arc::new(SchedulerEngine::new(
        jobs,
        Arc::clone(&pipeline),
        Arc::new(SystemClock),
        None,
    ));
    let state = Arc::new(AppState {
        pipeline,
        engine,
        config: Arc::new(config),
        start_time: Instant::now(),
    });

    let router = server::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let addr = listener.local_addr().expect("get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _tmp: tmp,
        _handle: handle,
    }
}

/// Start a manual backup and wait for it to reach a terminal status.
async fn run_manual_backup(server: &TestServer, body: Value) -> Value {
    let resp = server
        .client
        .post(server.url("/api/v1/backup"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let history: Vec<Value> = server
            .client
            .get(server.url("/api/v1/backups"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(first) = history.first() {
            if first["status"] != "running" {
                return first.clone();
            }
        }
    }
    panic!("backup did not finish");
}

// ---------------------------------------------------------------------------
// Health, config, stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint_returns_correct_structure() {
    let server = spawn_test_server().await;

    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "local");
    assert_eq!(body["active_jobs"], 0);
    assert!(body["uptime_seconds"].is_u64());
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_config_never_exposes_password() {
    let server = spawn_test_server().await;

    let body: Value = server
        .client
        .get(server.url("/api/v1/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_ne!(body["database"]["password"], "s3cret");
    assert!(!body.to_string().contains("s3cret"));
}

#[tokio::test]
async fn test_stats_count_backups_and_jobs() {
    let server = spawn_test_server().await;
    run_manual_backup(&server, json!({})).await;
    server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({"name": "nightly", "schedule": "0 2 * * *", "enabled": false}))
        .send()
        .await
        .unwrap();

    let body: Value = server
        .client
        .get(server.url("/api/v1/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalBackups"], 1);
    assert_eq!(body["successfulBackups"], 1);
    assert_eq!(body["failedBackups"], 0);
    assert_eq!(body["totalJobs"], 1);
    assert_eq!(body["activeJobs"], 0);
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_manual_backup_completes_and_appears_in_history() {
    let server = spawn_test_server().await;

    let record = run_manual_backup(&server, json!({"compression": false})).await;
    assert_eq!(record["status"], "completed");
    assert_eq!(record["type"], "local");
    assert!(record["name"].as_str().unwrap().starts_with("backup_"));
    assert!(record["path"].as_str().unwrap().ends_with(".sql"));
    assert!(record.get("error").is_none());
}

#[tokio::test]
async fn test_download_returns_artifact_bytes() {
    let server = spawn_test_server().await;
    let record = run_manual_backup(&server, json!({"compression": false})).await;
    let id = record["id"].as_i64().unwrap();

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/backups/{}/download", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(record["name"].as_str().unwrap()));
    assert_eq!(resp.text().await.unwrap(), SQL);
}

#[tokio::test]
async fn test_delete_backup_then_404() {
    let server = spawn_test_server().await;
    let record = run_manual_backup(&server, json!({})).await;
    let id = record["id"].as_i64().unwrap();

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/backups/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let history: Vec<Value> = server
        .client
        .get(server.url("/api/v1/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history.is_empty());

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/backups/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_and_list_jobs() {
    let server = spawn_test_server().await;

    let resp = server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({
            "name": "nightly",
            "schedule": "0 2 * * *",
            "scheduleText": "Every day at 02:00"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["enabled"], true);
    assert_eq!(created["type"], "full");

    let jobs: Vec<Value> = server
        .client
        .get(server.url("/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["name"], "nightly");
    assert_eq!(jobs[0]["scheduleText"], "Every day at 02:00");
    assert_eq!(jobs[0]["status"], "active");
    assert!(jobs[0]["nextRun"]
        .as_str()
        .unwrap()
        .parse::<chrono::DateTime<chrono::Utc>>()
        .is_ok());
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected() {
    let server = spawn_test_server().await;

    let resp = server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({"name": "broken", "schedule": "every tuesday"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_schedule");

    // a leading seconds field is not part of the five-field form
    let resp = server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({"name": "too-precise", "schedule": "0 0 * * * *"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let jobs: Vec<Value> = server
        .client
        .get(server.url("/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_toggle_job_pauses_and_resumes() {
    let server = spawn_test_server().await;
    let created: Value = server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({"name": "hourly", "schedule": "0 * * * *"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    let toggle_url = server.url(&format!("/api/v1/jobs/{}/toggle", id));

    let body: Value = server.client.post(&toggle_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["enabled"], false);

    let jobs: Vec<Value> = server
        .client
        .get(server.url("/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs[0]["status"], "paused");
    assert_eq!(jobs[0]["nextRun"], "paused");

    let body: Value = server.client.post(&toggle_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["enabled"], true);
}

#[tokio::test]
async fn test_delete_job_via_http() {
    let server = spawn_test_server().await;
    let created: Value = server
        .client
        .post(server.url("/api/v1/jobs"))
        .json(&json!({"name": "weekly", "schedule": "0 3 * * 0"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = server.url(&format!("/api/v1/jobs/{}", created["id"]));

    let resp = server.client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server.client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}
