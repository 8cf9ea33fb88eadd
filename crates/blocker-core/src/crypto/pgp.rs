//! OpenPGP cipher: chunks become PGP messages encrypted to a public key.
//!
//! Messages use an AES-256 session key (SEIPD v1) and carry no PGP-level
//! compression, since chunks are already compressed when they arrive here.
//! The secret key must not be passphrase protected.

use super::CipherProvider;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::ser::Serialize;
use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, Message, SignedPublicKey, SignedSecretKey};
use std::path::Path;
use tracing::info;

/// Encrypts to an armored public key and decrypts with the matching secret key.
#[derive(Clone)]
pub struct PgpCipher {
    public: SignedPublicKey,
    secret: SignedSecretKey,
}

impl std::fmt::Debug for PgpCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgpCipher")
            .field("key_id", &self.public.key_id())
            .finish_non_exhaustive()
    }
}

impl PgpCipher {
    /// Parse ASCII-armored key blocks.
    pub fn from_armored(public: &str, secret: &str) -> Result<Self> {
        let (public, _) = SignedPublicKey::from_armor_single(public.as_bytes())
            .map_err(|e| BlockerError::Config(format!("invalid PGP public key: {e}")))?;
        let (secret, _) = SignedSecretKey::from_armor_single(secret.as_bytes())
            .map_err(|e| BlockerError::Config(format!("invalid PGP secret key: {e}")))?;
        let has_encryption_key = public.is_encryption_key()
            || public.public_subkeys.iter().any(|k| k.is_encryption_key());
        if !has_encryption_key {
            return Err(BlockerError::Config(
                "PGP public key has no encryption-capable key".into(),
            ));
        }
        Ok(Self { public, secret })
    }

    /// Read armored keys from `public_path` and `secret_path`.
    pub async fn load(public_path: &Path, secret_path: &Path) -> Result<Self> {
        let public = read_key(public_path).await?;
        let secret = read_key(secret_path).await?;
        let cipher = Self::from_armored(&public, &secret)?;
        info!(
            public = %public_path.display(),
            key_id = ?cipher.public.key_id(),
            "loaded PGP keys"
        );
        Ok(cipher)
    }

    fn seal(&self, plaintext: &[u8]) -> pgp::errors::Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let literal = Message::new_literal_bytes("", plaintext);
        // Prefer an encryption subkey; the primary key is the fallback.
        let encrypted = match self
            .public
            .public_subkeys
            .iter()
            .find(|k| k.is_encryption_key())
        {
            Some(subkey) => {
                literal.encrypt_to_keys_seipdv1(&mut rng, SymmetricKeyAlgorithm::AES256, &[subkey])?
            }
            None => literal.encrypt_to_keys_seipdv1(
                &mut rng,
                SymmetricKeyAlgorithm::AES256,
                &[&self.public],
            )?,
        };
        encrypted.to_bytes()
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let message = Message::from_bytes(ciphertext)
            .map_err(|e| BlockerError::MalformedEnvelope(format!("not a PGP message: {e}")))?;
        let (decrypted, _) = message
            .decrypt(String::new, &[&self.secret])
            .map_err(|_| BlockerError::DecryptionAuthFailed)?;
        let content = decrypted
            .decompress()
            .and_then(|m| m.get_content())
            .map_err(|_| BlockerError::DecryptionAuthFailed)?;
        content.ok_or_else(|| BlockerError::MalformedEnvelope("PGP message has no literal data".into()))
    }
}

async fn read_key(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        BlockerError::Config(format!("cannot read PGP key {}: {e}", path.display()))
    })
}

#[async_trait]
impl CipherProvider for PgpCipher {
    fn name(&self) -> &'static str {
        "pgp"
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal(plaintext)
            .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.open(ciphertext)
    }
}
