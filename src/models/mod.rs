pub mod config;
pub mod job;
pub mod record;

pub use config::{Config, DatabaseConfig, LocalConfig, S3Config, StorageConfig, StorageKind};
pub use job::{JobKind, JobStatus, JobView, NewScheduledJob, NextRun, ScheduledJob};
pub use record::{BackupRecord, LedgerSummary, NewBackupRecord, RecordOutcome, RecordStatus};
