use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cron error: {0}")]
    Cron(String),

    #[error("Unsupported storage type: {0}")]
    UnsupportedStorage(String),

    /// The dump utility exited unsuccessfully; carries its stderr verbatim.
    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Empty artifact: {0}")]
    EmptyArtifact(String),

    #[error("Content validation failed: {0}")]
    ContentInvalid(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackupError {
    /// Wrap a record-store failure, keeping the whole context chain. Typed
    /// errors raised by the store itself (e.g. `NotFound`) pass through.
    pub fn ledger(err: anyhow::Error) -> Self {
        match err.downcast::<BackupError>() {
            Ok(typed) => typed,
            Err(err) => BackupError::Ledger(format!("{:#}", err)),
        }
    }

    /// Text stored in a failed record's `error` field. A dump failure keeps
    /// the utility's stderr byte for byte, without the display prefix.
    pub fn record_message(&self) -> String {
        match self {
            BackupError::Dump(stderr) => stderr.clone(),
            other => other.to_string(),
        }
    }

    /// Wrap a storage-backend failure, keeping the whole context chain.
    pub fn storage(err: anyhow::Error) -> Self {
        BackupError::Storage(format!("{:#}", err))
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BackupError::Validation(_) => "validation_error",
            BackupError::Cron(_) => "invalid_schedule",
            BackupError::UnsupportedStorage(_) => "unsupported_storage",
            BackupError::Dump(_) => "dump_failed",
            BackupError::EmptyArtifact(_) => "empty_artifact",
            BackupError::ContentInvalid(_) => "content_invalid",
            BackupError::Storage(_) => "storage_error",
            BackupError::Ledger(_) => "ledger_error",
            BackupError::NotFound(_) => "not_found",
            BackupError::Timeout(_) => "timeout",
            BackupError::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        BackupError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        BackupError::Storage(err.to_string())
    }
}
