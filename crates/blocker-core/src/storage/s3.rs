//! S3-compatible object store backend (AWS S3, MinIO, R2, ...).

use super::{chunk_object_name, ChunkStore};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::info;

/// Connection settings for [`S3ChunkStore::connect`].
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    /// Bucket holding the chunks
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint URL; enables path-style addressing
    pub endpoint: Option<String>,
    /// Prefix prepended to every object name
    pub prefix: String,
    /// Static access key; the default provider chain is used when absent
    pub access_key: Option<String>,
    /// Static secret key paired with `access_key`
    pub secret_key: Option<String>,
}

/// Stores each chunk as the object `<prefix><key>.blk`.
#[derive(Debug, Clone)]
pub struct S3ChunkStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ChunkStore {
    /// Build the client. No request is made until the first chunk operation.
    pub async fn connect(settings: S3Settings) -> Result<Self> {
        if settings.bucket.is_empty() {
            return Err(BlockerError::Config("S3 bucket name is empty".into()));
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let (Some(access), Some(secret)) = (settings.access_key, settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access, secret, None, None, "static",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        info!(bucket = %settings.bucket, region = %settings.region, "using S3 chunk storage");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            prefix: settings.prefix,
        })
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, chunk_object_name(key))
    }
}

#[async_trait]
impl ChunkStore for S3ChunkStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn save_chunk(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .content_type("application/octet-stream")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| BlockerError::Backend(format!("S3 put {key}: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    BlockerError::ChunkNotFound(key.to_string())
                } else {
                    BlockerError::Backend(format!("S3 get {key}: {}", DisplayErrorContext(&e)))
                }
            })?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| BlockerError::Backend(format!("S3 read body {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn chunk_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(BlockerError::Backend(format!(
                "S3 head {key}: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn delete_chunk(&self, key: &str) -> Result<()> {
        // S3 reports success for absent objects.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| BlockerError::Backend(format!("S3 delete {key}: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn object_keys_use_prefix_and_suffix() {
        let store = S3ChunkStore::connect(S3Settings {
            bucket: "blocks".into(),
            region: "eu-central-1".into(),
            endpoint: Some("http://127.0.0.1:9000".into()),
            prefix: "blocker/".into(),
            access_key: Some("k".into()),
            secret_key: Some("s".into()),
        })
        .await
        .unwrap();
        assert_eq!(store.object_key("abc123"), "blocker/abc123.blk");
    }

    #[tokio::test]
    async fn empty_bucket_is_config_error() {
        let err = S3ChunkStore::connect(S3Settings::default()).await.unwrap_err();
        assert!(matches!(err, BlockerError::Config(_)));
    }
}
