pub mod local;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::backup::retention::RetentionSweep;
use crate::errors::BackupError;
use crate::models::{Config, StorageKind};

/// Capability the pipeline stores finished artifacts through.
///
/// Implementations are peers: the pipeline only sees keys and the location
/// strings it records in the ledger.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Storage key for an artifact file name.
    fn key_for(&self, file_name: &str) -> String;

    /// Location recorded in the ledger for a stored key.
    fn location(&self, key: &str) -> String;

    /// Inverse of [`location`](Self::location). `None` when the location was
    /// not produced by this backend.
    fn key_from_location(&self, location: &str) -> Option<String>;

    async fn store(&self, key: &str, artifact: &Path) -> Result<()>;
    async fn retrieve(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Housekeeping to run after a successful store.
    fn retention_sweep(&self) -> Option<RetentionSweep> {
        None
    }
}

/// Build the backend selected by `storage.type`.
pub async fn from_config(config: &Config) -> Result<Arc<dyn StorageBackend>, BackupError> {
    match config.storage_kind()? {
        StorageKind::Local => Ok(Arc::new(local::LocalBackend::new(&config.storage.local))),
        StorageKind::S3 => {
            let backend = s3::S3Backend::connect(&config.storage.s3).await?;
            Ok(Arc::new(backend))
        }
    }
}
