use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// On-disk shape shared by the JSON ledgers. `next_id` only ever grows so ids
/// are never handed out twice, even after the highest row is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger<T> {
    pub next_id: i64,
    pub items: Vec<T>,
}

impl<T> Default for Ledger<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            items: Vec::new(),
        }
    }
}

impl<T> Ledger<T> {
    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Load a ledger file, creating the parent directory if needed.
///
/// A file that fails to parse is copied to `<name>.bak` and an empty ledger
/// is returned, so one bad write never prevents the daemon from starting.
pub async fn load<T: DeserializeOwned>(data_dir: &Path, file_name: &str) -> Result<(PathBuf, Ledger<T>)> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;

    let file_path = data_dir.join(file_name);
    if !file_path.exists() {
        return Ok((file_path, Ledger::default()));
    }

    let content = tokio::fs::read_to_string(&file_path)
        .await
        .with_context(|| format!("Failed to read {}", file_name))?;

    match serde_json::from_str::<Ledger<T>>(&content) {
        Ok(ledger) => Ok((file_path, ledger)),
        Err(e) => {
            tracing::warn!(
                "{} is corrupted ({}), creating backup and starting empty",
                file_name,
                e
            );
            let backup_path = data_dir.join(format!("{}.bak", file_name));
            if let Err(backup_err) = tokio::fs::copy(&file_path, &backup_path).await {
                tracing::error!("Failed to back up corrupted {}: {}", file_name, backup_err);
            }
            Ok((file_path, Ledger::default()))
        }
    }
}

/// Atomically write the ledger: `.tmp` first, then rename over the real file.
pub async fn persist<T: Serialize>(file_path: &Path, ledger: &Ledger<T>) -> Result<()> {
    let tmp_path = file_path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(ledger).context("Failed to serialize ledger")?;

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .context("Failed to write temporary ledger file")?;
    tokio::fs::rename(&tmp_path, file_path)
        .await
        .context("Failed to rename temporary ledger file")?;

    Ok(())
}

/// Apply `change` to a copy of the cached ledger and persist the copy. The
/// cache only takes the new state once the write succeeded.
pub async fn commit<T, R, F>(file_path: &Path, cache: &RwLock<Ledger<T>>, change: F) -> Result<R>
where
    T: Clone + Serialize + Send + Sync,
    R: Send,
    F: FnOnce(&mut Ledger<T>) -> Result<R> + Send,
{
    let mut cache = cache.write().await;
    let mut next = cache.clone();
    let out = change(&mut next)?;
    persist(file_path, &next).await?;
    *cache = next;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_id_is_monotonic() {
        let mut ledger: Ledger<String> = Ledger::default();
        assert_eq!(ledger.allocate_id(), 1);
        assert_eq!(ledger.allocate_id(), 2);
        assert_eq!(ledger.next_id, 3);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let (path, ledger) = load::<String>(tmp.path(), "things.json").await.unwrap();
        assert_eq!(path, tmp.path().join("things.json"));
        assert!(ledger.items.is_empty());
        assert_eq!(ledger.next_id, 1);
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("things.json");
        let ledger = Ledger {
            next_id: 5,
            items: vec!["a".to_string(), "b".to_string()],
        };
        persist(&path, &ledger).await.unwrap();
        assert!(!tmp.path().join("things.json.tmp").exists());

        let (_, loaded) = load::<String>(tmp.path(), "things.json").await.unwrap();
        assert_eq!(loaded.next_id, 5);
        assert_eq!(loaded.items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupted_file_backed_up_and_reset() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("things.json"), "{not json").unwrap();

        let (_, ledger) = load::<String>(tmp.path(), "things.json").await.unwrap();
        assert!(ledger.items.is_empty());

        let backup = std::fs::read_to_string(tmp.path().join("things.json.bak")).unwrap();
        assert_eq!(backup, "{not json");
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_cache_untouched() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("data");
        let (path, ledger) = load::<String>(&data_dir, "things.json").await.unwrap();
        let cache = RwLock::new(ledger);

        commit(&path, &cache, |l| {
            l.allocate_id();
            l.items.push("a".to_string());
            Ok(())
        })
        .await
        .unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        let result = commit(&path, &cache, |l| {
            l.allocate_id();
            l.items.push("b".to_string());
            Ok(())
        })
        .await;
        assert!(result.is_err());

        let cache = cache.read().await;
        assert_eq!(cache.items, vec!["a".to_string()]);
        assert_eq!(cache.next_id, 2);
    }
}
