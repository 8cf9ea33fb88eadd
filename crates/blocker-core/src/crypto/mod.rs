//! Cipher providers applied to compressed chunks.
//!
//! Three families implement [`CipherProvider`]:
//! - [`LocalCipher`]: one symmetric key persisted to a local key file
//! - [`EnvelopeCipher`]: a fresh data key per payload, wrapped by a
//!   [`DataKeyService`] ([`AwsKmsService`], [`GoKmsService`] or
//!   [`InProcessKeyService`])
//! - [`PgpCipher`]: OpenPGP messages encrypted to a public key

mod aead;
mod aws_kms;
mod envelope;
mod go_kms;
mod in_process;
mod local;
mod pgp;
pub mod signing;

pub use aead::{EncryptionAlgorithm, EncryptionKey, NONCE_LEN, TAG_LEN};
pub use aws_kms::{AwsKmsService, AwsKmsSettings};
pub use envelope::{open_envelope, seal_envelope, DataKey, DataKeyService, EnvelopeCipher};
pub use go_kms::GoKmsService;
pub use in_process::InProcessKeyService;
pub use local::LocalCipher;
pub use pgp::PgpCipher;

use crate::error::Result;
use async_trait::async_trait;

/// Symmetric transform applied after compression on write and before
/// decompression on read.
#[async_trait]
pub trait CipherProvider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext`, embedding whatever the provider needs to decrypt it.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`CipherProvider::encrypt`].
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Release any key material held for the chunk with content hash `hash`.
    /// Called once the chunk is physically deleted. Providers without
    /// per-chunk keys have nothing to do.
    async fn forget(&self, _hash: &str) -> Result<()> {
        Ok(())
    }
}
