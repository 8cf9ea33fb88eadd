//! AWS KMS data-key service.

use super::aead::EncryptionKey;
use super::envelope::{DataKey, DataKeyService};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::config::{Credentials, Region};
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client;
use tracing::info;

/// Connection settings for [`AwsKmsService::connect`].
#[derive(Debug, Clone, Default)]
pub struct AwsKmsSettings {
    /// AWS region, e.g. `eu-central-1`
    pub region: String,
    /// Master key to mint data keys under; the first listed key when `None`
    pub key_id: Option<String>,
    /// Static access key; the default provider chain is used when absent
    pub access_key: Option<String>,
    /// Static secret key paired with `access_key`
    pub secret_key: Option<String>,
}

/// Mints AES-256 data keys from AWS KMS.
#[derive(Debug, Clone)]
pub struct AwsKmsService {
    client: Client,
    key_id: String,
}

impl AwsKmsService {
    /// Build a KMS client and resolve the master key.
    pub async fn connect(settings: AwsKmsSettings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let (Some(access), Some(secret)) = (settings.access_key, settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access, secret, None, None, "blocker",
            ));
        }
        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);

        let key_id = match settings.key_id.filter(|k| !k.is_empty()) {
            Some(id) => id,
            None => Self::first_key_id(&client).await?,
        };
        info!(region = %settings.region, key_id = %key_id, "using AWS KMS for encryption");
        Ok(Self { client, key_id })
    }

    /// Master key used to mint data keys
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn first_key_id(client: &Client) -> Result<String> {
        let out = client
            .list_keys()
            .send()
            .await
            .map_err(|e| BlockerError::Backend(format!("list KMS keys: {}", DisplayErrorContext(&e))))?;
        out.keys()
            .iter()
            .find_map(|k| k.key_id().map(str::to_string))
            .ok_or_else(|| BlockerError::Config("no AWS KMS key available for encryption".into()))
    }
}

#[async_trait]
impl DataKeyService for AwsKmsService {
    fn name(&self) -> &'static str {
        "aws-kms"
    }

    async fn generate_data_key(&self) -> Result<DataKey> {
        let out = self
            .client
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| BlockerError::EncryptionFailed(DisplayErrorContext(&e).to_string()))?;

        let plaintext = out
            .plaintext()
            .ok_or_else(|| BlockerError::EncryptionFailed("KMS returned no plaintext key".into()))?;
        let wrapped = out
            .ciphertext_blob()
            .ok_or_else(|| BlockerError::EncryptionFailed("KMS returned no wrapped key".into()))?;
        Ok(DataKey {
            plaintext: EncryptionKey::from_slice(plaintext.as_ref())?,
            wrapped: wrapped.as_ref().to_vec(),
        })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<EncryptionKey> {
        let out = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .send()
            .await
            .map_err(|e| BlockerError::Backend(format!("KMS decrypt: {}", DisplayErrorContext(&e))))?;
        let plaintext = out
            .plaintext()
            .ok_or_else(|| BlockerError::Backend("KMS decrypt returned no plaintext".into()))?;
        EncryptionKey::from_slice(plaintext.as_ref())
    }
}
