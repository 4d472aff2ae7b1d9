use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{Credentials, Region};
use s3::primitives::ByteStream;

use crate::backend::StorageBackend;
use crate::errors::BackupError;
use crate::models::{S3Config, StorageKind};

/// Key and location conventions for one bucket/prefix pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Layout {
    pub bucket: String,
    pub prefix: String,
}

impl S3Layout {
    pub fn new(bucket: &str, prefix: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn key_for(&self, file_name: &str) -> String {
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    pub fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    pub fn key_from_location(&self, location: &str) -> Option<String> {
        let rest = location.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket != self.bucket || key.is_empty() {
            return None;
        }
        Some(key.to_string())
    }
}

/// Object-storage backend for S3 and S3-compatible services.
pub struct S3Backend {
    client: s3::Client,
    layout: S3Layout,
}

impl S3Backend {
    /// Build a client from static credentials. A custom endpoint switches to
    /// path-style addressing, which most S3-compatible services require.
    pub async fn connect(config: &S3Config) -> Result<Self, BackupError> {
        if config.bucket.trim().is_empty() {
            return Err(BackupError::Validation(
                "storage.s3.bucket is required when storage.type is s3".to_string(),
            ));
        }

        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "Static",
            ));
        }
        let sdk_config = loader.load().await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        tracing::debug!(
            "S3 backend ready: bucket={}, prefix={}, endpoint={:?}",
            config.bucket,
            config.prefix,
            config.endpoint
        );

        Ok(Self {
            client: s3::Client::from_conf(s3_config),
            layout: S3Layout::new(&config.bucket, &config.prefix),
        })
    }

    pub fn layout(&self) -> &S3Layout {
        &self.layout
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    fn key_for(&self, file_name: &str) -> String {
        self.layout.key_for(file_name)
    }

    fn location(&self, key: &str) -> String {
        self.layout.location(key)
    }

    fn key_from_location(&self, location: &str) -> Option<String> {
        self.layout.key_from_location(location)
    }

    async fn store(&self, key: &str, artifact: &Path) -> Result<()> {
        let body = ByteStream::from_path(artifact)
            .await
            .with_context(|| format!("Failed to open {} for upload", artifact.display()))?;

        self.client
            .put_object()
            .bucket(&self.layout.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", self.layout.location(key)))?;

        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.layout.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to get {}", self.layout.location(key)))?;

        let data = object
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", self.layout.location(key)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.layout.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete {}", self.layout.location(key)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.layout.key_for(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.layout.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .with_context(|| {
                    format!("Failed to list s3://{}/{}", self.layout.bucket, full_prefix)
                })?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
