//! Data-key service that wraps keys under a master key held in process memory.
//! Used for local development and tests where no external KMS is reachable.

use super::aead::{self, EncryptionAlgorithm, EncryptionKey};
use super::envelope::{DataKey, DataKeyService};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;

/// Wraps each data key with AES-256-GCM under a local master key (KEK).
#[derive(Debug)]
pub struct InProcessKeyService {
    master: EncryptionKey,
}

impl InProcessKeyService {
    /// Create a service around `master`
    pub fn new(master: EncryptionKey) -> Self {
        Self { master }
    }
}

#[async_trait]
impl DataKeyService for InProcessKeyService {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn generate_data_key(&self) -> Result<DataKey> {
        let plaintext = EncryptionKey::generate();
        let wrapped = aead::seal(&plaintext.0, &self.master, EncryptionAlgorithm::AesGcm256)?;
        Ok(DataKey { plaintext, wrapped })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<EncryptionKey> {
        let mut material = aead::open(wrapped, &self.master, EncryptionAlgorithm::AesGcm256)?;
        let key = EncryptionKey::from_slice(&material);
        zeroize::Zeroize::zeroize(&mut material);
        key.map_err(|_| BlockerError::MalformedEnvelope("unwrapped data key is not 32 bytes".into()))
    }
}
