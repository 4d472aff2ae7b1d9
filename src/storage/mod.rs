pub mod jobs;
pub mod json;
pub mod records;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    BackupRecord, LedgerSummary, NewBackupRecord, NewScheduledJob, RecordOutcome, ScheduledJob,
};

/// Ordered ledger of backup attempts.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, new: NewBackupRecord) -> Result<i64>;
    async fn update_record(&self, id: i64, outcome: RecordOutcome) -> Result<()>;
    /// Most recent first, by timestamp.
    async fn list_records(&self, limit: usize) -> Result<Vec<BackupRecord>>;
    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>>;
    async fn delete_record(&self, id: i64) -> Result<()>;
    async fn summary(&self) -> Result<LedgerSummary>;
}

/// Durable truth for scheduled jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, new: NewScheduledJob) -> Result<ScheduledJob>;
    /// Descending by id.
    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>>;
    async fn get_job(&self, id: i64) -> Result<Option<ScheduledJob>>;
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()>;
    async fn set_last_run(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn delete_job(&self, id: i64) -> Result<()>;
}
