use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::BackupError;
use crate::models::{NewScheduledJob, ScheduledJob};
use crate::storage::json::{self, Ledger};
use crate::storage::JobStore;

pub struct JsonJobStore {
    file_path: PathBuf,
    cache: RwLock<Ledger<ScheduledJob>>,
}

impl JsonJobStore {
    /// Create a new JsonJobStore, loading `jobs.json` from `data_dir` if present.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let (file_path, ledger) = json::load(&data_dir, "jobs.json").await?;
        Ok(Self {
            file_path,
            cache: RwLock::new(ledger),
        })
    }

    fn not_found(id: i64) -> anyhow::Error {
        BackupError::NotFound(format!("Job with id '{}' not found", id)).into()
    }

    async fn modify<F>(&self, id: i64, change: F) -> Result<()>
    where
        F: FnOnce(&mut ScheduledJob) + Send,
    {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let job = ledger
                .items
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| Self::not_found(id))?;
            change(job);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl JobStore for JsonJobStore {
    async fn insert_job(&self, new: NewScheduledJob) -> Result<ScheduledJob> {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let job = ScheduledJob {
                id: ledger.allocate_id(),
                name: new.name,
                kind: new.kind,
                schedule: new.schedule,
                schedule_text: new.schedule_text,
                enabled: new.enabled,
                last_run: None,
            };
            ledger.items.push(job.clone());
            Ok(job)
        })
        .await
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let cache = self.cache.read().await;
        let mut jobs = cache.items.clone();
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(jobs)
    }

    async fn get_job(&self, id: i64) -> Result<Option<ScheduledJob>> {
        let cache = self.cache.read().await;
        Ok(cache.items.iter().find(|j| j.id == id).cloned())
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.modify(id, |job| job.enabled = enabled).await
    }

    async fn set_last_run(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |job| job.last_run = Some(at)).await
    }

    async fn delete_job(&self, id: i64) -> Result<()> {
        json::commit(&self.file_path, &self.cache, |ledger| {
            let idx = ledger
                .items
                .iter()
                .position(|j| j.id == id)
                .ok_or_else(|| Self::not_found(id))?;
            ledger.items.remove(idx);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;
    use tempfile::TempDir;

    fn make_new_job(name: &str, enabled: bool) -> NewScheduledJob {
        NewScheduledJob {
            name: name.to_string(),
            kind: JobKind::Full,
            schedule: "*/5 * * * *".to_string(),
            schedule_text: "every five minutes".to_string(),
            enabled,
        }
    }

    async fn setup_store() -> (JsonJobStore, TempDir) {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = JsonJobStore::new(tmp_dir.path().to_path_buf())
            .await
            .expect("create store");
        (store, tmp_dir)
    }

    #[tokio::test]
    async fn test_insert_job_assigns_ids() {
        let (store, _tmp) = setup_store().await;
        let first = store.insert_job(make_new_job("a", true)).await.expect("insert");
        let second = store.insert_job(make_new_job("b", false)).await.expect("insert");
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(first.enabled);
        assert!(!second.enabled);
        assert!(first.last_run.is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_descending_by_id() {
        let (store, _tmp) = setup_store().await;
        for name in ["a", "b", "c"] {
            store.insert_job(make_new_job(name, true)).await.expect("insert");
        }
        let ids: Vec<i64> = store.list_jobs().await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let (store, _tmp) = setup_store().await;
        assert!(store.get_job(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_enabled_and_last_run() {
        let (store, _tmp) = setup_store().await;
        let job = store.insert_job(make_new_job("a", true)).await.unwrap();

        store.set_enabled(job.id, false).await.unwrap();
        let at = Utc::now();
        store.set_last_run(job.id, at).await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert!(!fetched.enabled);
        assert_eq!(fetched.last_run, Some(at));
    }

    #[tokio::test]
    async fn test_set_enabled_missing_job_is_not_found() {
        let (store, _tmp) = setup_store().await;
        let err = store.set_enabled(9, true).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackupError>(),
            Some(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_job() {
        let (store, _tmp) = setup_store().await;
        let job = store.insert_job(make_new_job("a", true)).await.unwrap();
        store.delete_job(job.id).await.unwrap();
        assert!(store.get_job(job.id).await.unwrap().is_none());
        assert!(store.delete_job(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete_and_reload() {
        let tmp_dir = TempDir::new().unwrap();
        {
            let store = JsonJobStore::new(tmp_dir.path().to_path_buf()).await.unwrap();
            store.insert_job(make_new_job("a", true)).await.unwrap();
            let b = store.insert_job(make_new_job("b", true)).await.unwrap();
            store.delete_job(b.id).await.unwrap();
        }
        let store = JsonJobStore::new(tmp_dir.path().to_path_buf()).await.unwrap();
        let c = store.insert_job(make_new_job("c", true)).await.unwrap();
        assert_eq!(c.id, 3);
        assert_eq!(store.list_jobs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let tmp_dir = TempDir::new().unwrap();
        let data_dir = tmp_dir.path().join("data");
        let store = JsonJobStore::new(data_dir.clone()).await.unwrap();
        let job = store.insert_job(make_new_job("nightly", true)).await.unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        assert!(store.set_enabled(job.id, false).await.is_err());
        assert!(store.set_last_run(job.id, Utc::now()).await.is_err());
        assert!(store.delete_job(job.id).await.is_err());
        assert!(store.insert_job(make_new_job("lost", true)).await.is_err());

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs, vec![job]);
    }
}
