use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::BackupError;

/// Where finished artifacts are placed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Local => write!(f, "local"),
            StorageKind::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            other => Err(BackupError::UnsupportedStorage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Scratch directory for artifacts before they reach storage.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_db_user")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_dump_binary")]
    pub dump_binary: String,
    /// 0 disables the deadline.
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Kept as a string so an unknown kind surfaces as a validation error
    /// rather than a parse failure of the whole file.
    #[serde(rename = "type", default = "default_storage_type")]
    pub kind: String,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Retention window in days; 0 disables the sweep.
    #[serde(default = "default_retention")]
    pub retention: u32,
    #[serde(default = "default_true")]
    pub verify_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    /// IANA zone cadence expressions are evaluated in. UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_dump_binary() -> String {
    "pg_dump".to_string()
}

fn default_dump_timeout_secs() -> u64 {
    3600
}

fn default_storage_type() -> String {
    "local".to_string()
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("/var/backups/postgresql")
}

fn default_true() -> bool {
    true
}

fn default_retention() -> u32 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_prefix() -> String {
    "postgresql-backups".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            temp_dir: None,
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            username: default_db_user(),
            password: String::new(),
            dump_binary: default_dump_binary(),
            dump_timeout_secs: default_dump_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_type(),
            local: LocalConfig::default(),
            s3: S3Config::default(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            backup_path: default_backup_path(),
            compression: true,
            retention: default_retention(),
            verify_content: true,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            region: default_region(),
            prefix: default_prefix(),
        }
    }
}

impl Config {
    /// Parsed storage kind, or `UnsupportedStorage`.
    pub fn storage_kind(&self) -> Result<StorageKind, BackupError> {
        self.storage.kind.parse()
    }

    /// Reject configurations that cannot work before anything is started.
    pub fn validate(&self) -> Result<(), BackupError> {
        let kind = self.storage_kind()?;
        if kind == StorageKind::S3 && self.storage.s3.bucket.trim().is_empty() {
            return Err(BackupError::Validation(
                "storage.s3.bucket is required when storage.type is s3".to_string(),
            ));
        }
        if let Some(ref tz) = self.scheduler.timezone {
            tz.parse::<chrono_tz::Tz>().map_err(|e| {
                BackupError::Validation(format!("Invalid timezone '{}': {}", tz, e))
            })?;
        }
        Ok(())
    }

    /// Directory the dump utility writes into before the artifact is stored.
    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Copy safe to hand to API clients: credentials blanked out.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if !copy.database.password.is_empty() {
            copy.database.password = "********".to_string();
        }
        if !copy.storage.s3.secret_key.is_empty() {
            copy.storage.s3.secret_key = "********".to_string();
        }
        copy
    }
}
