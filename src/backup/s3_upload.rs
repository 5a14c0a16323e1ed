// pgbackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;

use crate::config::RemoteConfig;

/// Bucket-style object storage the artifact is uploaded to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, file_path: &Path, key: &str) -> Result<()>;

    /// Human-readable location of a key, for logs and notifications.
    fn describe(&self, key: &str) -> String;
}

/// S3-compatible storage (AWS, MinIO, DigitalOcean Spaces, ...).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
    bucket_name: String,
}

impl S3ObjectStore {
    pub async fn connect(remote: &RemoteConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&remote.endpoint_url)
            .region(Region::new(remote.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &remote.access_key_id,
                &remote.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        // Self-hosted endpoints rarely support virtual-hosted bucket names.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(s3_config),
            bucket_name: remote.bucket_name.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, file_path: &Path, key: &str) -> Result<()> {
        info!(
            "Uploading {} to bucket {} with key {}",
            file_path.display(),
            self.bucket_name,
            key
        );

        let body = ByteStream::from_path(file_path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", file_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload file {} to bucket {} with key {}",
                    file_path.display(),
                    self.bucket_name,
                    key
                )
            })?;

        info!("✅ Uploaded to remote: {}", self.describe(key));
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket_name, key)
    }
}
