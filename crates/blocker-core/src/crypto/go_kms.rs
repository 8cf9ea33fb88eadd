//! Go-KMS data-key service: JSON over HTTP with HMAC-signed requests.

use super::aead::EncryptionKey;
use super::envelope::{DataKey, DataKeyService};
use super::signing;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const API_PREFIX: &str = "/api/v1/go-kms";
const NEW_KEY_DESCRIPTION: &str = "Blocker AES Encrypt/Decrypt Key";

/// Byte fields travel as standard base64 strings.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(bytes: &T, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(d)?.unwrap_or_default();
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
struct KeyMetadata {
    #[serde(rename = "KeyId")]
    key_id: String,
    #[serde(rename = "CreationDate")]
    creation_date: Option<DateTime<Utc>>,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Serialize)]
struct ListKeysRequest {}

#[derive(Deserialize)]
struct ListKeysResponse {
    #[serde(rename = "KeyMetadata", default)]
    key_metadata: Vec<KeyMetadata>,
}

#[derive(Serialize)]
struct CreateKeyRequest<'a> {
    #[serde(rename = "Description")]
    description: &'a str,
}

#[derive(Deserialize)]
struct CreateKeyResponse {
    #[serde(rename = "KeyMetadata")]
    key_metadata: KeyMetadata,
}

#[derive(Serialize)]
struct GenerateDataKeyRequest<'a> {
    #[serde(rename = "KeyID")]
    key_id: &'a str,
}

#[derive(Deserialize)]
struct GenerateDataKeyResponse {
    #[serde(rename = "Plaintext", with = "b64")]
    plaintext: Vec<u8>,
    #[serde(rename = "CiphertextBlob", with = "b64")]
    ciphertext_blob: Vec<u8>,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    #[serde(rename = "CiphertextBlob", serialize_with = "b64::serialize")]
    ciphertext_blob: &'a [u8],
}

#[derive(Deserialize)]
struct DecryptResponse {
    #[serde(rename = "Plaintext", with = "b64")]
    plaintext: Vec<u8>,
}

/// Client for a Go-KMS deployment.
#[derive(Debug)]
pub struct GoKmsService {
    http: reqwest::Client,
    base_url: String,
    auth_key: Vec<u8>,
    key_id: String,
}

impl GoKmsService {
    /// Connect to `base_url`. Without an explicit `key_id` the newest key is
    /// selected, and one is created when the service holds none.
    pub async fn connect(
        base_url: &str,
        auth_key: &str,
        key_id: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        if accept_invalid_certs {
            warn!("Go-KMS client accepts invalid TLS certificates; do not use in production");
        }
        let http = reqwest::Client::builder()
            .user_agent("Blocker")
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(BlockerError::backend)?;

        let mut svc = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_key: auth_key.as_bytes().to_vec(),
            key_id: String::new(),
        };
        svc.key_id = match key_id.filter(|k| !k.is_empty()) {
            Some(id) => id,
            None => svc.newest_key_id().await?,
        };
        info!(url = %svc.base_url, key_id = %svc.key_id, "using Go-KMS for encryption");
        Ok(svc)
    }

    /// Master key used to mint data keys
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn call<Req, Resp>(&self, action: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let resource = format!("{API_PREFIX}/{action}");
        let date = signing::request_date(Utc::now());
        let auth = signing::sign(&self.auth_key, "POST", &date, &resource)?;

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, resource))
            .header("x-kms-date", &date)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(body)
            .send()
            .await
            .map_err(BlockerError::backend)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BlockerError::Backend(format!(
                "Go-KMS {action} returned {status}: {text}"
            )));
        }
        resp.json::<Resp>().await.map_err(BlockerError::backend)
    }

    async fn newest_key_id(&self) -> Result<String> {
        let listed: ListKeysResponse = self.call("listkeys", &ListKeysRequest {}).await?;
        if let Some(newest) = listed
            .key_metadata
            .into_iter()
            .max_by_key(|k| k.creation_date)
        {
            debug!(key_id = %newest.key_id, description = %newest.description, "selected newest Go-KMS key");
            return Ok(newest.key_id);
        }

        let created: CreateKeyResponse = self
            .call(
                "createkey",
                &CreateKeyRequest {
                    description: NEW_KEY_DESCRIPTION,
                },
            )
            .await?;
        if created.key_metadata.key_id.is_empty() {
            return Err(BlockerError::Config(
                "Go-KMS returned no key to use for encryption".into(),
            ));
        }
        info!(key_id = %created.key_metadata.key_id, "created Go-KMS key");
        Ok(created.key_metadata.key_id)
    }
}

#[async_trait]
impl DataKeyService for GoKmsService {
    fn name(&self) -> &'static str {
        "go-kms"
    }

    async fn generate_data_key(&self) -> Result<DataKey> {
        let resp: GenerateDataKeyResponse = self
            .call(
                "generatedatakey",
                &GenerateDataKeyRequest {
                    key_id: &self.key_id,
                },
            )
            .await
            .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?;
        Ok(DataKey {
            plaintext: EncryptionKey::from_slice(&resp.plaintext)?,
            wrapped: resp.ciphertext_blob,
        })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<EncryptionKey> {
        let resp: DecryptResponse = self
            .call(
                "decrypt",
                &DecryptRequest {
                    ciphertext_blob: wrapped,
                },
            )
            .await?;
        EncryptionKey::from_slice(&resp.plaintext)
    }
}
