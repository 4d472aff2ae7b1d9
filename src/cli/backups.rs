use std::path::PathBuf;

use anyhow::Context;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::Client;

use super::{base_url, ensure_success, handle_request_error, read_json};
use crate::models::{BackupRecord, RecordStatus};

/// pgbm history
pub async fn cmd_history(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/backups", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let records: Vec<BackupRecord> = read_json(response).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No backups yet.");
        return Ok(());
    }

    println!(
        "{:<6}{:<26}{:<7}{:<11}{:<10}{:<21}",
        "ID", "NAME", "TYPE", "STATUS", "SIZE", "STARTED"
    );
    for record in &records {
        println!(
            "{:<6}{:<26}{:<7}{:<11}{:<10}{:<21}",
            record.id,
            record.name,
            record.storage.to_string(),
            status_label(record.status),
            if record.size.is_empty() { "-" } else { record.size.as_str() },
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(error) = &record.error {
            println!("      error: {}", error);
        }
    }

    Ok(())
}

fn status_label(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Running => "running",
        RecordStatus::Completed => "completed",
        RecordStatus::Failed => "failed",
    }
}

/// File name from a `Content-Disposition: attachment; filename="..."` value.
fn attachment_name(disposition: &str) -> Option<String> {
    let (_, rest) = disposition.split_once("filename=")?;
    let name = rest.trim().trim_matches('"');
    // Keep only the final path component.
    let name = name.rsplit(['/', '\\']).next()?;
    if name.is_empty() || name == ".." || name == "." {
        None
    } else {
        Some(name.to_string())
    }
}

/// pgbm download
pub async fn cmd_download(
    host: &str,
    port: u16,
    id: i64,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/backups/{}/download", base_url(host, port), id);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let response = ensure_success(response).await?;

    let suggested = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(attachment_name);
    let target = match (output, suggested) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(name)) => PathBuf::from(name),
        (None, None) => PathBuf::from(format!("backup_{}", id)),
    };

    let bytes = response
        .bytes()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read download: {}", e))?;
    tokio::fs::write(&target, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!(
        "Saved backup {} to {} ({}).",
        id,
        target.display(),
        crate::backup::format_size(bytes.len() as u64)
    );
    Ok(())
}

/// pgbm delete
pub async fn cmd_delete(host: &str, port: u16, id: i64) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/backups/{}", base_url(host, port), id);

    let response = client
        .delete(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    ensure_success(response).await?;

    println!("Backup {} removed from history. The stored artifact was kept.", id);
    Ok(())
}
