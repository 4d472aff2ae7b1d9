use std::path::Path;

use anyhow::Context;
use reqwest::Client;
use serde_json::Value;

use super::{base_url, handle_request_error, read_json};
use crate::backup::BackupOptions;
use crate::daemon::{self as core, PidFile};
use crate::server::routes::StatsResponse;

/// Which parts of a dump the `backup` command leaves out.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupFlags {
    pub no_data: bool,
    pub no_schema: bool,
    pub no_compress: bool,
}

impl BackupFlags {
    pub fn into_options(self, default_compression: bool) -> anyhow::Result<BackupOptions> {
        if self.no_data && self.no_schema {
            anyhow::bail!("--no-data and --no-schema together would dump nothing");
        }
        Ok(BackupOptions {
            include_data: !self.no_data,
            include_schema: !self.no_schema,
            compression: default_compression && !self.no_compress,
        })
    }
}

/// pgbm start
pub async fn cmd_start(
    config: Option<&str>,
    data_dir: Option<&str>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    core::start_daemon(
        config.map(Path::new),
        data_dir.map(Path::new),
        None,
        port,
    )
    .await
}

/// pgbm backup
///
/// Runs against the ledger files directly, so it refuses to run while a
/// daemon owns the same data directory.
pub async fn cmd_backup(
    config_path: Option<&str>,
    data_dir: Option<&str>,
    flags: BackupFlags,
) -> anyhow::Result<()> {
    let config = core::load_config(config_path.map(Path::new), data_dir.map(Path::new))?;
    let data_dir = core::effective_data_dir(data_dir.map(Path::new), &config);

    let pid_file = PidFile::new(data_dir.join("pgbm.pid"));
    if let Some(pid) = pid_file.running_pid() {
        anyhow::bail!(
            "A daemon (PID {}) is using {}. Trigger the backup through its API instead.",
            pid,
            data_dir.display()
        );
    }

    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let services = core::build_services(&config, &data_dir).await?;
    let options = flags.into_options(services.pipeline.settings().default_compression)?;

    println!("Starting backup of '{}'...", config.database.database);
    let record = services.pipeline.create_backup(options).await?;

    // let the retention sweep finish before the process exits
    services.pipeline.drain().await;

    println!("Backup '{}' completed (id {}).", record.name, record.id);
    println!("  Size:     {}", record.size);
    if let Some(path) = &record.path {
        println!("  Location: {}", path);
    }
    Ok(())
}

/// pgbm status
pub async fn cmd_status(host: &str, port: u16, verbose: bool) -> anyhow::Result<()> {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", base_url(host, port)))
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let health: Value = read_json(response).await?;

    let response = client
        .get(format!("{}/api/v1/stats", base_url(host, port)))
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let stats: StatsResponse = read_json(response).await?;

    let daemon_status = health["status"].as_str().unwrap_or("unknown");
    let version = health["version"].as_str().unwrap_or("unknown");
    let uptime = health["uptime_seconds"].as_u64().unwrap_or(0);
    let storage = health["storage"].as_str().unwrap_or("unknown");
    let data_dir = health["data_dir"].as_str().unwrap_or("unknown");

    println!("Daemon Status: {}", daemon_status);
    println!("  Data Dir:    {}", data_dir);
    println!("  API:         {}", base_url(host, port));
    println!("  Storage:     {}", storage);
    println!(
        "  Jobs:        {} active / {} total",
        stats.active_jobs, stats.total_jobs
    );
    println!(
        "  Backups:     {} total, {} completed, {} failed, {} running",
        stats.total_backups, stats.successful_backups, stats.failed_backups, stats.running_backups
    );
    if let Some(last) = health.get("last_backup") {
        println!(
            "  Last Backup: {} ({}, {})",
            last["name"].as_str().unwrap_or("?"),
            last["status"].as_str().unwrap_or("?"),
            last["timestamp"].as_str().unwrap_or("?")
        );
    }
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&health)?);
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
