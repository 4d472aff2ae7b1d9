use chrono::{DateTime, Utc};
use croner::parser::{CronParser, Seconds};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::BackupError;

/// What a scheduled job produces. Scheduled fires currently always run a full
/// backup regardless of this value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Full,
}

/// A persisted recurring backup job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: JobKind,
    /// Cadence expression; the source of truth for firing.
    pub schedule: String,
    /// Cosmetic label shown next to the schedule.
    #[serde(default)]
    pub schedule_text: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScheduledJob {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: JobKind,
    pub schedule: String,
    #[serde(default)]
    pub schedule_text: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
}

/// Read-time next fire, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum NextRun {
    At(DateTime<Utc>),
    Paused,
    /// The stored schedule could not be evaluated.
    Unavailable,
}

impl NextRun {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            NextRun::At(t) => Some(*t),
            _ => None,
        }
    }
}

impl Serialize for NextRun {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NextRun::At(t) => serializer.serialize_str(&t.to_rfc3339()),
            NextRun::Paused => serializer.serialize_str("paused"),
            NextRun::Unavailable => serializer.serialize_str("computation failed"),
        }
    }
}

/// A job as returned by listings: persisted fields plus computed status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: ScheduledJob,
    pub status: JobStatus,
    pub next_run: NextRun,
}

/// Validate a NewScheduledJob before anything is persisted.
pub fn validate_new_job(job: &NewScheduledJob) -> Result<(), BackupError> {
    if job.name.trim().is_empty() {
        return Err(BackupError::Validation("Job name cannot be empty".to_string()));
    }
    validate_cron(&job.schedule)
}

/// Parse a five-field cron expression (minute hour day-of-month month
/// day-of-week). A leading seconds field is rejected.
pub fn parse_schedule(expr: &str) -> Result<croner::Cron, BackupError> {
    CronParser::builder()
        .seconds(Seconds::Disallowed)
        .build()
        .parse(expr)
        .map_err(|e| BackupError::Cron(format!("Invalid cron expression '{}': {}", expr, e)))
}

pub fn validate_cron(expr: &str) -> Result<(), BackupError> {
    parse_schedule(expr).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_new_job() -> NewScheduledJob {
        NewScheduledJob {
            name: "nightly".to_string(),
            kind: JobKind::Full,
            schedule: "0 2 * * *".to_string(),
            schedule_text: "Every day at 02:00".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn test_new_job_defaults_from_json() {
        let json = r#"{"name":"nightly","schedule":"0 2 * * *"}"#;
        let job: NewScheduledJob = serde_json::from_str(json).expect("deserialize");
        assert!(job.enabled);
        assert_eq!(job.kind, JobKind::Full);
        assert_eq!(job.schedule_text, "");
    }

    #[test]
    fn test_new_job_camel_case_fields() {
        let json = r#"{"name":"n","type":"full","schedule":"* * * * *","scheduleText":"every minute","enabled":false}"#;
        let job: NewScheduledJob = serde_json::from_str(json).expect("deserialize");
        assert_eq!(job.schedule_text, "every minute");
        assert!(!job.enabled);
    }

    #[test]
    fn test_unknown_job_type_rejected() {
        let json = r#"{"name":"n","type":"incremental","schedule":"* * * * *"}"#;
        assert!(serde_json::from_str::<NewScheduledJob>(json).is_err());
    }

    #[test]
    fn test_validation_valid_job_succeeds() {
        assert!(validate_new_job(&make_new_job()).is_ok());
    }

    #[test]
    fn test_validation_empty_name_rejected() {
        let mut job = make_new_job();
        job.name = "  ".to_string();
        match validate_new_job(&job) {
            Err(BackupError::Validation(msg)) => assert!(msg.contains("empty")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_validation_invalid_cron_rejected() {
        let mut job = make_new_job();
        job.schedule = "not a cron".to_string();
        match validate_new_job(&job) {
            Err(BackupError::Cron(msg)) => assert!(msg.contains("not a cron")),
            other => panic!("Expected Cron, got: {:?}", other),
        }
    }

    #[test]
    fn test_validation_out_of_range_field_rejected() {
        assert!(validate_cron("61 * * * *").is_err());
        assert!(validate_cron("*/15 * * * *").is_ok());
    }

    #[test]
    fn test_validation_rejects_seconds_field() {
        assert!(matches!(validate_cron("* * * * * *"), Err(BackupError::Cron(_))));
        assert!(matches!(validate_cron("0 0 * * * *"), Err(BackupError::Cron(_))));
        assert!(validate_cron("0 0 * * *").is_ok());
    }

    #[test]
    fn test_next_run_serializes_markers() {
        assert_eq!(serde_json::to_string(&NextRun::Paused).unwrap(), "\"paused\"");
        assert_eq!(
            serde_json::to_string(&NextRun::Unavailable).unwrap(),
            "\"computation failed\""
        );
    }

    #[test]
    fn test_job_view_flattens_job_fields() {
        let view = JobView {
            job: ScheduledJob {
                id: 7,
                name: "nightly".to_string(),
                kind: JobKind::Full,
                schedule: "0 2 * * *".to_string(),
                schedule_text: String::new(),
                enabled: false,
                last_run: None,
            },
            status: JobStatus::Paused,
            next_run: NextRun::Paused,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "full");
        assert_eq!(json["status"], "paused");
        assert_eq!(json["nextRun"], "paused");
        assert!(json["lastRun"].is_null());
    }
}
