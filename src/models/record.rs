use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StorageKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Running)
    }
}

/// One backup attempt in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub storage: StorageKind,
    /// Human-readable size, empty until known.
    #[serde(default)]
    pub size: String,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
    /// Final storage location, only set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Diagnostic text, only set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fields supplied when an attempt starts; the store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub name: String,
    pub storage: StorageKind,
    pub timestamp: DateTime<Utc>,
}

/// The single terminal update applied to a `running` record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Completed { size: String, path: String },
    Failed { size: String, error: String },
}

impl RecordOutcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            RecordOutcome::Completed { .. } => RecordStatus::Completed,
            RecordOutcome::Failed { .. } => RecordStatus::Failed,
        }
    }

    /// Apply this outcome to a record; all fields change together.
    pub fn apply(self, record: &mut BackupRecord) {
        match self {
            RecordOutcome::Completed { size, path } => {
                record.status = RecordStatus::Completed;
                record.size = size;
                record.path = Some(path);
                record.error = None;
            }
            RecordOutcome::Failed { size, error } => {
                record.status = RecordStatus::Failed;
                record.size = size;
                record.path = None;
                record.error = Some(error);
            }
        }
    }
}

/// Ledger counts for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total_backups: usize,
    pub successful_backups: usize,
    pub failed_backups: usize,
    pub running_backups: usize,
}
