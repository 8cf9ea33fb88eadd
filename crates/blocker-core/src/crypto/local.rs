//! Local symmetric cipher backed by a key file on disk.

use super::aead::{self, EncryptionAlgorithm, EncryptionKey};
use super::CipherProvider;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Encrypts every chunk with one long-lived key held in memory.
#[derive(Debug, Clone)]
pub struct LocalCipher {
    key: EncryptionKey,
    algorithm: EncryptionAlgorithm,
}

impl LocalCipher {
    /// Wrap an existing key.
    pub fn new(key: EncryptionKey, algorithm: EncryptionAlgorithm) -> Self {
        Self { key, algorithm }
    }

    /// Read the key at `path`, or generate one and persist it with owner-only
    /// permissions when the file does not exist yet.
    pub async fn load_or_generate(path: &Path, algorithm: EncryptionAlgorithm) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(material) => {
                let key = EncryptionKey::from_slice(&material).map_err(|_| {
                    BlockerError::Config(format!(
                        "key file {} must hold exactly 32 bytes, found {}",
                        path.display(),
                        material.len()
                    ))
                })?;
                info!(path = %path.display(), "loaded local encryption key");
                Ok(Self::new(key, algorithm))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = EncryptionKey::generate();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, key.0).await?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                        .await?;
                }
                info!(path = %path.display(), "generated new local encryption key");
                Ok(Self::new(key, algorithm))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CipherProvider for LocalCipher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aead::seal(plaintext, &self.key, self.algorithm)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        aead::open(ciphertext, &self.key, self.algorithm)
    }
}
