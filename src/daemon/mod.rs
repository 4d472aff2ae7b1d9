pub mod scheduler;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

use crate::backend;
use crate::backup::{BackupService, PgDumpProducer, PipelineSettings};
use crate::daemon::scheduler::{SchedulerEngine, SystemClock};
use crate::models::Config;
use crate::server::{self, AppState};
use crate::storage::jobs::JsonJobStore;
use crate::storage::records::JsonRecordStore;
use crate::storage::{JobStore, RecordStore};

const APP_DIR: &str = "pg-backup-manager";

// ---------------------------------------------------------------------------
// PidFile
// ---------------------------------------------------------------------------

/// Single-instance guard. Created with O_EXCL; a file left behind by a dead
/// process is taken over.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn acquire(&self) -> Result<()> {
        if self.path.exists() {
            let content =
                std::fs::read_to_string(&self.path).context("Failed to read existing PID file")?;
            let existing_pid: u32 = content
                .trim()
                .parse()
                .context("Failed to parse PID from PID file")?;

            if is_process_alive(existing_pid) {
                anyhow::bail!(
                    "Daemon is already running (PID {}). PID file: {}",
                    existing_pid,
                    self.path.display()
                );
            }

            tracing::warn!("Removing stale PID file (PID {} is gone)", existing_pid);
            std::fs::remove_file(&self.path).context("Failed to remove stale PID file")?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .context("Failed to create PID file")?;
        write!(file, "{}", std::process::id()).context("Failed to write PID file")?;
        file.flush().context("Failed to flush PID file")?;

        tracing::info!("PID file acquired: {}", self.path.display());
        Ok(())
    }

    pub fn release(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove PID file")?;
            tracing::info!("PID file released: {}", self.path.display());
        }
        Ok(())
    }

    /// PID recorded in the file, if the file exists and that process is alive.
    pub fn running_pid(&self) -> Option<u32> {
        let pid: u32 = std::fs::read_to_string(&self.path).ok()?.trim().parse().ok()?;
        is_process_alive(pid).then_some(pid)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // signal 0 only checks for existence
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

// ---------------------------------------------------------------------------
// Config and data dir resolution
// ---------------------------------------------------------------------------

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolution order:
///   1. explicit `--config` path (must exist)
///   2. `$PGBM_CONFIG_DIR/config.json`
///   3. `<--data-dir>/config.json`, when a data dir was given
///   4. platform config dir
///   5. `<default data dir>/config.json`
///   6. built-in defaults
pub fn load_config(config_path: Option<&Path>, data_dir_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_path {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return read_config_file(path);
    }

    let mut candidates = Vec::new();
    if let Ok(dir) = std::env::var("PGBM_CONFIG_DIR") {
        candidates.push(PathBuf::from(dir).join("config.json"));
    }
    if let Some(dir) = data_dir_override {
        candidates.push(dir.join("config.json"));
    }
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR).join("config.json"));
    }
    candidates.push(resolve_data_dir(None).join("config.json"));

    for path in candidates {
        if path.exists() {
            return read_config_file(&path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

/// `override_dir`, then `$PGBM_DATA_DIR`, then the platform data dir.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("PGBM_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// `--data-dir`, then the config's `data_dir`, then [`resolve_data_dir`].
pub fn effective_data_dir(override_dir: Option<&Path>, config: &Config) -> PathBuf {
    match (override_dir, config.data_dir.as_deref()) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(dir)) => dir.to_path_buf(),
        (None, None) => resolve_data_dir(None),
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// stderr plus `<data_dir>/daemon.log`. Falls back to stderr alone when the
/// log file cannot be opened. Keep the returned guard alive for the whole run.
pub fn init_logging(data_dir: &Path) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = data_dir.join("daemon.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    match file {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let installed = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .is_ok();
            if installed {
                tracing::info!("Logging to stderr and {}", log_path.display());
            }
            Some(guard)
        }
        Err(e) => {
            let installed = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init()
                .is_ok();
            if installed {
                tracing::warn!(
                    "Could not open {}: {}. Logging to stderr only.",
                    log_path.display(),
                    e
                );
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The core services, wired from a validated config.
pub struct Services {
    pub records: Arc<dyn RecordStore>,
    pub jobs: Arc<dyn JobStore>,
    pub pipeline: Arc<BackupService>,
    pub engine: Arc<SchedulerEngine>,
}

pub async fn build_services(config: &Config, data_dir: &Path) -> Result<Services> {
    config.validate()?;

    let records: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(data_dir.to_path_buf()).await?);
    let jobs: Arc<dyn JobStore> = Arc::new(JsonJobStore::new(data_dir.to_path_buf()).await?);
    let backend = backend::from_config(config).await?;

    let dumper = PgDumpProducer::new(&config.database);
    match dumper.locate() {
        Some(path) => tracing::debug!("Using dump binary at {}", path.display()),
        None => tracing::warn!(
            "'{}' was not found on PATH; backups will fail until it is installed",
            config.database.dump_binary
        ),
    }

    let pipeline = Arc::new(BackupService::new(
        Arc::clone(&records),
        backend,
        Arc::new(dumper),
        PipelineSettings::from_config(config),
    ));
    let engine = Arc::new(SchedulerEngine::new(
        Arc::clone(&jobs),
        Arc::clone(&pipeline),
        Arc::new(SystemClock),
        config.scheduler.timezone.clone(),
    ));

    Ok(Services {
        records,
        jobs,
        pipeline,
        engine,
    })
}

// ---------------------------------------------------------------------------
// Daemon bootstrap
// ---------------------------------------------------------------------------

/// Run the daemon in the foreground until Ctrl+C or SIGTERM.
///
/// Order: config, data dir, logging, PID file, services, scheduler, HTTP.
/// Shutdown reverses it and waits for backups already running to finish.
pub async fn start_daemon(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = load_config(config_path, data_dir_override)?;
    if let Some(host) = host_override {
        config.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    let data_dir = effective_data_dir(data_dir_override, &config);
    config.data_dir = Some(data_dir.clone());
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let _log_guard = init_logging(&data_dir);
    tracing::info!("Data directory: {}", data_dir.display());

    let pid_file = PidFile::new(data_dir.join("pgbm.pid"));
    pid_file.acquire()?;

    let result = run(config, &data_dir).await;

    if let Err(e) = pid_file.release() {
        tracing::error!("Failed to release PID file: {}", e);
    }
    result
}

async fn run(config: Config, data_dir: &Path) -> Result<()> {
    let services = build_services(&config, data_dir).await?;
    services.engine.start().await;

    let config = Arc::new(config);
    let state = Arc::new(AppState {
        pipeline: Arc::clone(&services.pipeline),
        engine: Arc::clone(&services.engine),
        config: Arc::clone(&config),
        start_time: Instant::now(),
    });

    let router = server::create_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    wait_for_signal().await?;

    let _ = shutdown_tx.send(());
    services.engine.stop();
    services.pipeline.drain().await;

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
        Err(e) => tracing::error!("HTTP server task failed: {}", e),
    }

    tracing::info!("Daemon exited cleanly");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
