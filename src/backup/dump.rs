use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::errors::BackupError;
use crate::models::DatabaseConfig;

/// What one backup attempt should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    pub include_data: bool,
    pub include_schema: bool,
    pub compression: bool,
}

impl BackupOptions {
    /// Data and schema, compressed. Scheduled fires always use this.
    pub fn full() -> Self {
        Self {
            include_data: true,
            include_schema: true,
            compression: true,
        }
    }
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// Produces a dump artifact at a given path.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    /// File name of the artifact for a backup named `base`.
    fn artifact_name(&self, base: &str, options: &BackupOptions) -> String {
        if options.compression {
            format!("{}.sql.gz", base)
        } else {
            format!("{}.sql", base)
        }
    }

    /// Write the dump to `target`. Failures carry the utility's diagnostics.
    async fn produce(&self, options: &BackupOptions, target: &Path) -> Result<(), BackupError>;
}

/// Runs the `pg_dump` executable.
pub struct PgDumpProducer {
    binary: String,
    host: String,
    port: u16,
    database: String,
    username: String,
    password: String,
    timeout: Option<Duration>,
}

impl PgDumpProducer {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            binary: config.dump_binary.clone(),
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: (config.dump_timeout_secs > 0)
                .then(|| Duration::from_secs(config.dump_timeout_secs)),
        }
    }

    /// Where the dump binary resolves on PATH, if anywhere.
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.binary).ok()
    }

    /// Command-line arguments for one run. The password is never among them.
    pub fn args(&self, options: &BackupOptions, target: &Path) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-U".to_string(),
            self.username.clone(),
            "-d".to_string(),
            self.database.clone(),
            "-f".to_string(),
            target.display().to_string(),
            "--verbose".to_string(),
        ];
        if !options.include_data {
            args.push("--schema-only".to_string());
        }
        if !options.include_schema {
            args.push("--data-only".to_string());
        }
        if options.compression {
            args.push("--compress=6".to_string());
        }
        args
    }
}

#[async_trait]
impl DumpProducer for PgDumpProducer {
    async fn produce(&self, options: &BackupOptions, target: &Path) -> Result<(), BackupError> {
        let mut command = Command::new(&self.binary);
        command
            .args(self.args(options, target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.password.is_empty() {
            command.env("PGPASSWORD", &self.password);
        }

        tracing::debug!(
            "Running {} against {}:{}/{}",
            self.binary,
            self.host,
            self.port,
            self.database
        );

        let mut child = command
            .spawn()
            .map_err(|e| BackupError::Dump(format!("failed to start {}: {}", self.binary, e)))?;

        // --verbose output can be large; drain it so the child never blocks on a full pipe.
        let mut stderr_pipe = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await,
            None => Ok(child.wait().await),
        };

        let status = match waited {
            Ok(status) => status.map_err(|e| {
                BackupError::Dump(format!("failed to wait for {}: {}", self.binary, e))
            })?,
            Err(_) => {
                let _ = child.kill().await;
                stderr_reader.abort();
                let limit = self.timeout.unwrap_or_default();
                return Err(BackupError::Timeout(format!(
                    "{} did not finish within {:?} and was killed",
                    self.binary, limit
                )));
            }
        };

        let stderr = stderr_reader.await.unwrap_or_default();
        if status.success() {
            return Ok(());
        }

        Err(dump_failure(&self.binary, &status, &stderr))
    }
}

/// Error for an unsuccessful exit: the captured stderr verbatim, or the exit
/// status when the utility printed nothing.
fn dump_failure(binary: &str, status: &dyn std::fmt::Display, stderr: &[u8]) -> BackupError {
    let diagnostic = String::from_utf8_lossy(stderr);
    if diagnostic.trim().is_empty() {
        BackupError::Dump(format!("{} exited with {}", binary, status))
    } else {
        BackupError::Dump(diagnostic.into_owned())
    }
}
