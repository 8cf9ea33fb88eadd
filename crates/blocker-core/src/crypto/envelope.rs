//! Envelope encryption: a one-time data key encrypts the payload and travels
//! with it, wrapped by a master key that never leaves the key service.
//!
//! Wire layout of a sealed chunk:
//!
//! ```text
//! +----------------+-------------------+----------------------------+
//! | u32 BE: len(W) | W: wrapped key    | nonce || ciphertext || tag |
//! +----------------+-------------------+----------------------------+
//! ```

use super::aead::{self, EncryptionAlgorithm, EncryptionKey};
use super::CipherProvider;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use tracing::debug;

const LEN_PREFIX: usize = 4;

/// A freshly minted data key: plaintext for immediate use, wrapped for storage.
pub struct DataKey {
    /// Key material used to encrypt one payload, then dropped (zeroized)
    pub plaintext: EncryptionKey,
    /// The same key encrypted under the service's master key
    pub wrapped: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &self.plaintext)
            .field("wrapped_len", &self.wrapped.len())
            .finish()
    }
}

/// A key-management service able to mint and unwrap data keys.
#[async_trait]
pub trait DataKeyService: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Request a fresh 256-bit data key
    async fn generate_data_key(&self) -> Result<DataKey>;

    /// Unwrap a key previously returned in [`DataKey::wrapped`]
    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<EncryptionKey>;
}

/// Frame a wrapped key and a sealed payload into one envelope.
pub fn seal_envelope(wrapped_key: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(wrapped_key.len()).map_err(|_| {
        BlockerError::InvalidInput(format!("wrapped key of {} bytes", wrapped_key.len()))
    })?;
    let mut out = Vec::with_capacity(LEN_PREFIX + wrapped_key.len() + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(wrapped_key);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split an envelope into `(wrapped_key, payload)`. Never truncates silently.
pub fn open_envelope(envelope: &[u8]) -> Result<(&[u8], &[u8])> {
    if envelope.len() < LEN_PREFIX {
        return Err(BlockerError::MalformedEnvelope(format!(
            "envelope of {} bytes has no length prefix",
            envelope.len()
        )));
    }
    let (prefix, rest) = envelope.split_at(LEN_PREFIX);
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let key_len = u32::from_be_bytes(len_bytes) as usize;
    if key_len == 0 || rest.len() < key_len {
        return Err(BlockerError::MalformedEnvelope(format!(
            "wrapped key length {} does not fit in {} remaining bytes",
            key_len,
            rest.len()
        )));
    }
    Ok(rest.split_at(key_len))
}

/// [`CipherProvider`] that envelopes each payload under a fresh data key from `S`.
#[derive(Debug)]
pub struct EnvelopeCipher<S> {
    service: S,
    algorithm: EncryptionAlgorithm,
}

impl<S: DataKeyService> EnvelopeCipher<S> {
    /// Create an envelope cipher over `service`; payloads use AES-256-GCM.
    pub fn new(service: S) -> Self {
        Self {
            service,
            algorithm: EncryptionAlgorithm::AesGcm256,
        }
    }

    /// The underlying key service
    pub fn service(&self) -> &S {
        &self.service
    }
}

#[async_trait]
impl<S: DataKeyService> CipherProvider for EnvelopeCipher<S> {
    fn name(&self) -> &'static str {
        self.service.name()
    }

    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let data_key = self.service.generate_data_key().await?;
        let sealed = aead::seal(plaintext, &data_key.plaintext, self.algorithm)?;
        debug!(
            service = self.service.name(),
            wrapped_len = data_key.wrapped.len(),
            "sealed payload under fresh data key"
        );
        seal_envelope(&data_key.wrapped, &sealed)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let (wrapped, sealed) = open_envelope(ciphertext)?;
        let key = self.service.decrypt_data_key(wrapped).await?;
        aead::open(sealed, &key, self.algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::InProcessKeyService;
    use proptest::prelude::*;

    #[test]
    fn envelope_framing_splits_exactly() {
        let env = seal_envelope(b"wrapped-key", b"payload").unwrap();
        assert_eq!(&env[..4], &11u32.to_be_bytes());
        let (key, payload) = open_envelope(&env).unwrap();
        assert_eq!(key, b"wrapped-key");
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn short_envelopes_are_rejected() {
        assert!(matches!(
            open_envelope(&[0, 0]),
            Err(BlockerError::MalformedEnvelope(_))
        ));
        let mut env = seal_envelope(b"abcdef", b"").unwrap();
        env.truncate(7);
        assert!(matches!(
            open_envelope(&env),
            Err(BlockerError::MalformedEnvelope(_))
        ));
        assert!(open_envelope(&[0, 0, 0, 0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn each_encrypt_uses_a_new_data_key() {
        let cipher = EnvelopeCipher::new(InProcessKeyService::new(EncryptionKey::generate()));
        let a = cipher.encrypt(b"same bytes").await.unwrap();
        let b = cipher.encrypt(b"same bytes").await.unwrap();
        let (wa, _) = open_envelope(&a).unwrap();
        let (wb, _) = open_envelope(&b).unwrap();
        assert_ne!(wa, wb);
        assert_eq!(cipher.decrypt(&a).await.unwrap(), b"same bytes");
        assert_eq!(cipher.decrypt(&b).await.unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn tampered_payload_fails_auth() {
        let cipher = EnvelopeCipher::new(InProcessKeyService::new(EncryptionKey::generate()));
        let mut env = cipher.encrypt(b"important").await.unwrap();
        let last = env.len() - 1;
        env[last] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&env).await,
            Err(BlockerError::DecryptionAuthFailed)
        ));
    }

    proptest! {
        #[test]
        fn prop_envelope_roundtrip(data in prop::collection::vec(0u8..=255, 0..16_384)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let cipher = EnvelopeCipher::new(InProcessKeyService::new(EncryptionKey([5u8; 32])));
            let back = rt.block_on(async {
                let sealed = cipher.encrypt(&data).await.unwrap();
                cipher.decrypt(&sealed).await.unwrap()
            });
            prop_assert_eq!(back, data);
        }
    }
}
