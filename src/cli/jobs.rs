use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use super::{base_url, ensure_success, handle_request_error, read_json};
use crate::models::{JobKind, NewScheduledJob, ScheduledJob};
use crate::server::routes::ToggleResponse;

/// "in 5m", "2h ago", and so on, relative to now.
pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    format_relative_to(dt, Utc::now())
}

fn format_relative_to(dt: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(*dt);
    let future = diff.num_seconds() < 0;
    let secs = diff.num_seconds().unsigned_abs();

    let amount = if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    };

    if future {
        format!("in {}", amount)
    } else {
        format!("{} ago", amount)
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Render the `nextRun` field: a timestamp or one of the status markers.
fn describe_next_run(value: &Value) -> String {
    match value.as_str() {
        Some(text) => match text.parse::<DateTime<Utc>>() {
            Ok(dt) => format_relative_time(&dt),
            Err(_) => text.to_string(),
        },
        None => "-".to_string(),
    }
}

/// pgbm jobs list
pub async fn cmd_list(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/jobs", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let body: Value = read_json(response).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let jobs = body.as_array().unwrap_or(&empty_vec);

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<6}{:<18}{:<16}{:<9}{:<14}{:<20}",
        "ID", "NAME", "SCHEDULE", "STATUS", "LAST RUN", "NEXT RUN"
    );

    for job in jobs {
        let id = job["id"].as_i64().map(|id| id.to_string()).unwrap_or_else(|| "?".to_string());
        let name = job["name"].as_str().unwrap_or("?");
        let schedule = job["schedule"].as_str().unwrap_or("?");
        let status = job["status"].as_str().unwrap_or("?");

        let last_run = match job["lastRun"].as_str() {
            Some(ts) => match ts.parse::<DateTime<Utc>>() {
                Ok(dt) => format_relative_time(&dt),
                Err(_) => "-".to_string(),
            },
            None => "never".to_string(),
        };

        println!(
            "{:<6}{:<18}{:<16}{:<9}{:<14}{:<20}",
            id,
            truncate(name, 17),
            truncate(schedule, 15),
            status,
            last_run,
            describe_next_run(&job["nextRun"])
        );
    }

    Ok(())
}

/// pgbm jobs add
pub async fn cmd_add(
    host: &str,
    port: u16,
    name: &str,
    schedule: &str,
    label: Option<&str>,
    disabled: bool,
) -> anyhow::Result<()> {
    let new = NewScheduledJob {
        name: name.to_string(),
        kind: JobKind::Full,
        schedule: schedule.to_string(),
        schedule_text: label.unwrap_or_default().to_string(),
        enabled: !disabled,
    };

    let client = Client::new();
    let url = format!("{}/api/v1/jobs", base_url(host, port));

    let response = client
        .post(&url)
        .json(&new)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let job: ScheduledJob = read_json(response).await?;

    println!("Job '{}' created (id {}).", job.name, job.id);
    println!("  Schedule: {}", job.schedule);
    if !job.schedule_text.is_empty() {
        println!("  Label:    {}", job.schedule_text);
    }
    println!("  Enabled:  {}", job.enabled);

    Ok(())
}

/// pgbm jobs toggle
pub async fn cmd_toggle(host: &str, port: u16, id: i64) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/jobs/{}/toggle", base_url(host, port), id);

    let response = client
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let toggled: ToggleResponse = read_json(response).await?;

    if toggled.enabled {
        println!("Job {} resumed.", id);
    } else {
        println!("Job {} paused.", id);
    }
    Ok(())
}

/// pgbm jobs remove
pub async fn cmd_remove(host: &str, port: u16, id: i64) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/api/v1/jobs/{}", base_url(host, port), id);

    let response = client
        .delete(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    ensure_success(response).await?;

    println!("Job {} removed.", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_relative_past_and_future() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(format_relative_to(&(now - Duration::seconds(30)), now), "30s ago");
        assert_eq!(format_relative_to(&(now - Duration::minutes(5)), now), "5m ago");
        assert_eq!(format_relative_to(&(now + Duration::hours(2)), now), "in 2h");
        assert_eq!(format_relative_to(&(now + Duration::days(3)), now), "in 3d");
    }

    #[test]
    fn test_describe_next_run_markers() {
        assert_eq!(describe_next_run(&Value::String("paused".into())), "paused");
        assert_eq!(
            describe_next_run(&Value::String("computation failed".into())),
            "computation failed"
        );
        assert_eq!(describe_next_run(&Value::Null), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("nightly", 17), "nightly");
        assert_eq!(truncate("a-very-long-job-name-indeed", 10), "a-very-...");
    }
}
