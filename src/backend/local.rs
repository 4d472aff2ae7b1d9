use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::backend::StorageBackend;
use crate::backup::retention::RetentionSweep;
use crate::models::{LocalConfig, StorageKind};

/// Keeps artifacts in a directory on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
    retention_days: u32,
}

impl LocalBackend {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            root: config.backup_path.clone(),
            retention_days: config.retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key inside the root, refusing anything that could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            anyhow::bail!("Invalid storage key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn key_for(&self, file_name: &str) -> String {
        file_name.to_string()
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }

    fn key_from_location(&self, location: &str) -> Option<String> {
        Path::new(location)
            .strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().to_string())
            .filter(|key| !key.is_empty())
    }

    async fn store(&self, key: &str, artifact: &Path) -> Result<()> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create backup directory {}", parent.display()))?;
        }
        // copy rather than rename: the scratch dir is often on another filesystem
        tokio::fs::copy(artifact, &dest).await.with_context(|| {
            format!(
                "Failed to copy {} to {}",
                artifact.display(),
                dest.display()
            )
        })?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read {}", self.root.display()))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn retention_sweep(&self) -> Option<RetentionSweep> {
        if self.retention_days == 0 {
            return None;
        }
        Some(RetentionSweep::new(self.root.clone(), self.retention_days))
    }
}
