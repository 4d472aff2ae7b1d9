use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::BackupError;
use crate::models::{BackupRecord, LedgerSummary, NewBackupRecord, RecordOutcome, RecordStatus};
use crate::storage::json::{self, Ledger};
use crate::storage::RecordStore;

/// Backup ledger persisted as `records.json` in the data directory.
pub struct JsonRecordStore {
    file_path: PathBuf,
    cache: RwLock<Ledger<BackupRecord>>,
}

impl JsonRecordStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let (file_path, ledger) = json::load(&data_dir, "records.json").await?;
        Ok(Self {
            file_path,
            cache: RwLock::new(ledger),
        })
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn insert_record(&self, new: NewBackupRecord) -> Result<i64> {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let id = ledger.allocate_id();
            ledger.items.push(BackupRecord {
                id,
                name: new.name,
                storage: new.storage,
                size: String::new(),
                status: RecordStatus::Running,
                timestamp: new.timestamp,
                path: None,
                error: None,
            });
            Ok(id)
        })
        .await
    }

    async fn update_record(&self, id: i64, outcome: RecordOutcome) -> Result<()> {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let record = ledger
                .items
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| BackupError::NotFound(format!("Backup record '{}' not found", id)))?;
            outcome.apply(record);
            Ok(())
        })
        .await
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<BackupRecord>> {
        let cache = self.cache.read().await;
        let mut records = cache.items.clone();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn get_record(&self, id: i64) -> Result<Option<BackupRecord>> {
        let cache = self.cache.read().await;
        Ok(cache.items.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_record(&self, id: i64) -> Result<()> {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let idx = ledger
                .items
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| BackupError::NotFound(format!("Backup record '{}' not found", id)))?;
            ledger.items.remove(idx);
            Ok(())
        })
        .await
    }

    async fn summary(&self) -> Result<LedgerSummary> {
        let cache = self.cache.read().await;
        let mut summary = LedgerSummary {
            total_backups: cache.items.len(),
            ..Default::default()
        };
        for record in &cache.items {
            match record.status {
                RecordStatus::Completed => summary.successful_backups += 1,
                RecordStatus::Failed => summary.failed_backups += 1,
                RecordStatus::Running => summary.running_backups += 1,
            }
        }
        Ok(summary)
    }
}
