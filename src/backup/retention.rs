use std::path::PathBuf;
use std::time::{Duration, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Best-effort removal of local artifacts older than the retention window.
///
/// Errors are swallowed: a sweep never changes the outcome of the backup
/// that scheduled it.
#[derive(Debug, Clone)]
pub struct RetentionSweep {
    dir: PathBuf,
    retention_days: u32,
}

impl RetentionSweep {
    pub fn new(dir: PathBuf, retention_days: u32) -> Self {
        Self {
            dir,
            retention_days,
        }
    }

    /// Artifacts last modified before this instant are removed.
    pub fn cutoff(&self, now: SystemTime) -> Option<SystemTime> {
        now.checked_sub(Duration::from_secs(
            u64::from(self.retention_days) * SECS_PER_DAY,
        ))
    }

    pub async fn run(&self) -> usize {
        self.run_at(SystemTime::now()).await
    }

    /// Sweep as if the current time were `now`. Returns the number of files removed.
    pub async fn run_at(&self, now: SystemTime) -> usize {
        let Some(cutoff) = self.cutoff(now) else {
            return 0;
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Retention sweep skipped for {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_backup_artifact(name) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::debug!("Retention sweep removed {}", name);
                    removed += 1;
                }
                Err(e) => tracing::debug!("Retention sweep could not remove {}: {}", name, e),
            }
        }

        if removed > 0 {
            tracing::info!(
                "Retention sweep removed {} artifact(s) older than {} day(s)",
                removed,
                self.retention_days
            );
        }
        removed
    }
}

/// Matches `backup_*.sql` and `backup_*.sql.gz`.
fn is_backup_artifact(name: &str) -> bool {
    name.starts_with("backup_") && (name.ends_with(".sql") || name.ends_with(".sql.gz"))
}
