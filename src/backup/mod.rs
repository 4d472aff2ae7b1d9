pub mod dump;
pub mod retention;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::backend::StorageBackend;
use crate::daemon::scheduler::{Clock, SystemClock};
use crate::errors::BackupError;
use crate::models::{
    BackupRecord, Config, LedgerSummary, NewBackupRecord, RecordOutcome, RecordStatus,
};
use crate::storage::RecordStore;

pub use dump::{BackupOptions, DumpProducer, PgDumpProducer};
pub use validate::{format_size, Verdict};

/// Number of records returned by [`BackupService::get_backup_history`].
pub const HISTORY_LIMIT: usize = 100;

/// Pipeline knobs taken from the config file.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scratch_dir: PathBuf,
    pub verify_content: bool,
    /// Used when a manual request does not say whether to compress.
    pub default_compression: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_dir: config.scratch_dir(),
            verify_content: config.storage.local.verify_content,
            default_compression: config.storage.local.compression,
        }
    }
}

/// Bytes of a stored artifact plus the file name to present it under.
#[derive(Debug, Clone)]
pub struct BackupDownload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Hands out `backup_<YYYYMMDD_HHMMSS>` names, suffixing `_<n>` when the
/// same second was already used by this process.
#[derive(Debug, Default)]
struct NameAllocator {
    last: Mutex<Option<(i64, u32)>>,
}

impl NameAllocator {
    fn next(&self, now: DateTime<Utc>) -> String {
        let base = format!("backup_{}", now.format("%Y%m%d_%H%M%S"));
        let second = now.timestamp();

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let n = match *last {
            Some((s, count)) if s == second => count + 1,
            _ => 1,
        };
        *last = Some((second, n));

        if n == 1 {
            base
        } else {
            format!("{}_{}", base, n)
        }
    }
}

/// One end-to-end backup attempt at a time per call; calls may overlap freely.
pub struct BackupService {
    records: Arc<dyn RecordStore>,
    backend: Arc<dyn StorageBackend>,
    dumper: Arc<dyn DumpProducer>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    names: NameAllocator,
    /// Background attempts and retention sweeps; [`BackupService::drain`] waits on these.
    attempts: TaskTracker,
}

impl BackupService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        backend: Arc<dyn StorageBackend>,
        dumper: Arc<dyn DumpProducer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            records,
            backend,
            dumper,
            clock: Arc::new(SystemClock),
            settings,
            names: NameAllocator::default(),
            attempts: TaskTracker::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Tracker for work that must finish before the process exits.
    pub fn attempts(&self) -> &TaskTracker {
        &self.attempts
    }

    /// Run [`BackupService::create_backup`] on a tracked background task.
    pub fn spawn_backup(
        self: &Arc<Self>,
        options: BackupOptions,
    ) -> JoinHandle<Result<BackupRecord, BackupError>> {
        let service = Arc::clone(self);
        self.attempts
            .spawn(async move { service.create_backup(options).await })
    }

    /// Wait for every tracked attempt and sweep to finish. Work spawned
    /// while draining is waited on too.
    pub async fn drain(&self) {
        self.attempts.close();
        let in_flight = self.attempts.len();
        if in_flight > 0 {
            tracing::info!("Waiting for {} background backup task(s) to finish", in_flight);
        }
        self.attempts.wait().await;
    }

    /// Run one backup attempt: dump, validate, store, record.
    ///
    /// The ledger row is created before the dump starts and always receives
    /// exactly one terminal update before this returns, unless the update
    /// itself fails (logged).
    pub async fn create_backup(&self, options: BackupOptions) -> Result<BackupRecord, BackupError> {
        let timestamp = self.clock.now();
        let name = self.names.next(timestamp);
        let storage = self.backend.kind();

        let id = self
            .records
            .insert_record(NewBackupRecord {
                name: name.clone(),
                storage,
                timestamp,
            })
            .await
            .map_err(BackupError::ledger)?;

        let mut record = BackupRecord {
            id,
            name: name.clone(),
            storage,
            size: String::new(),
            status: RecordStatus::Running,
            timestamp,
            path: None,
            error: None,
        };

        tracing::info!(
            "Backup '{}' (id {}) started: data={}, schema={}, compression={}",
            name,
            id,
            options.include_data,
            options.include_schema,
            options.compression
        );

        let file_name = self.dumper.artifact_name(&name, &options);
        let artifact = self.settings.scratch_dir.join(&file_name);

        let result = self.run_stages(&options, &file_name, &artifact).await;
        remove_scratch(&artifact).await;

        match result {
            Ok((size, location)) => {
                tracing::info!("Backup '{}' completed: {} at {}", name, size, location);
                self.finish(
                    &mut record,
                    RecordOutcome::Completed {
                        size,
                        path: location,
                    },
                )
                .await;
                if let Some(sweep) = self.backend.retention_sweep() {
                    self.attempts.spawn(async move {
                        sweep.run().await;
                    });
                }
                Ok(record)
            }
            Err((size, err)) => {
                tracing::error!("Backup '{}' failed: {}", name, err);
                self.finish(
                    &mut record,
                    RecordOutcome::Failed {
                        size,
                        error: err.record_message(),
                    },
                )
                .await;
                Err(err)
            }
        }
    }

    /// Dump, stat, verify, size, store. Errors carry whatever size was known.
    async fn run_stages(
        &self,
        options: &BackupOptions,
        file_name: &str,
        artifact: &Path,
    ) -> Result<(String, String), (String, BackupError)> {
        if let Some(parent) = artifact.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| (String::new(), BackupError::from(e)))?;
        }

        self.dumper
            .produce(options, artifact)
            .await
            .map_err(|e| (String::new(), e))?;

        let report = validate::inspect(artifact, self.settings.verify_content)
            .await
            .map_err(|e| (String::new(), e))?;
        let size = report.size_text();

        match report.verdict {
            Verdict::Empty => {
                return Err((
                    size,
                    BackupError::EmptyArtifact("pg_dump generated an empty file".to_string()),
                ))
            }
            Verdict::ContentInvalid => {
                return Err((
                    size,
                    BackupError::ContentInvalid(
                        "backup file contains no CREATE or INSERT statements".to_string(),
                    ),
                ))
            }
            Verdict::Valid => {}
        }

        let key = self.backend.key_for(file_name);
        if let Err(e) = self.backend.store(&key, artifact).await {
            return Err((size, BackupError::storage(e)));
        }

        Ok((size, self.backend.location(&key)))
    }

    async fn finish(&self, record: &mut BackupRecord, outcome: RecordOutcome) {
        if let Err(e) = self.records.update_record(record.id, outcome.clone()).await {
            tracing::warn!(
                "Failed to record outcome of backup '{}' (id {}): {:#}",
                record.name,
                record.id,
                e
            );
        }
        outcome.apply(record);
    }

    /// The most recent records, newest first.
    pub async fn get_backup_history(&self) -> Result<Vec<BackupRecord>, BackupError> {
        self.records
            .list_records(HISTORY_LIMIT)
            .await
            .map_err(BackupError::ledger)
    }

    /// Remove the ledger row. The stored artifact is left in place.
    pub async fn delete_backup(&self, id: i64) -> Result<(), BackupError> {
        let record = self.find(id).await?;
        self.records
            .delete_record(id)
            .await
            .map_err(BackupError::ledger)?;
        if let Some(location) = record.path {
            tracing::debug!(
                "Backup record {} deleted; artifact left at {}",
                id,
                location
            );
        }
        Ok(())
    }

    pub async fn download_backup(&self, id: i64) -> Result<BackupDownload, BackupError> {
        let record = self.find(id).await?;
        if record.status != RecordStatus::Completed {
            return Err(BackupError::Validation(format!(
                "Backup {} is {:?}, only completed backups can be downloaded",
                id, record.status
            )));
        }
        if record.storage != self.backend.kind() {
            return Err(BackupError::Validation(format!(
                "Backup {} was stored on {} but the active storage is {}",
                id,
                record.storage,
                self.backend.kind()
            )));
        }
        let key = record
            .path
            .as_deref()
            .and_then(|location| self.backend.key_from_location(location))
            .ok_or_else(|| {
                BackupError::Validation(format!(
                    "Backup {} has no location the active storage can read",
                    id
                ))
            })?;

        let bytes = self
            .backend
            .retrieve(&key)
            .await
            .map_err(BackupError::storage)?;
        let file_name = key.rsplit('/').next().unwrap_or(&key).to_string();
        Ok(BackupDownload { file_name, bytes })
    }

    pub async fn summary(&self) -> Result<LedgerSummary, BackupError> {
        self.records.summary().await.map_err(BackupError::ledger)
    }

    async fn find(&self, id: i64) -> Result<BackupRecord, BackupError> {
        self.records
            .get_record(id)
            .await
            .map_err(BackupError::ledger)?
            .ok_or_else(|| BackupError::NotFound(format!("Backup record '{}' not found", id)))
    }
}

async fn remove_scratch(artifact: &Path) {
    match tokio::fs::remove_file(artifact).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove scratch artifact {}: {}",
            artifact.display(),
            e
        ),
    }
}
