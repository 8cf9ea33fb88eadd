//! AES-256-GCM and ChaCha20-Poly1305 AEAD sealing with a prepended random nonce

use crate::error::{BlockerError, Result};
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce length shared by both AEADs.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length shared by both AEADs.
pub const TAG_LEN: usize = 16;

/// 256-bit (32-byte) symmetric key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl EncryptionKey {
    /// Generate a fresh key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Build a key from exactly 32 bytes of material
    pub fn from_slice(material: &[u8]) -> Result<Self> {
        let key: [u8; 32] = material.try_into().map_err(|_| {
            BlockerError::MalformedEnvelope(format!(
                "expected 32 bytes of key material, got {}",
                material.len()
            ))
        })?;
        Ok(Self(key))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM, hardware accelerated on x86 with AES-NI
    #[default]
    #[serde(rename = "aes-256-gcm")]
    AesGcm256,
    /// ChaCha20-Poly1305, constant-time, fast on non-AES hardware
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

/// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
pub fn seal(plaintext: &[u8], key: &EncryptionKey, algo: EncryptionAlgorithm) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?;
            cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?
        }
    };

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the output of [`seal`]. Tampering or a wrong key yields `DecryptionAuthFailed`.
pub fn open(sealed: &[u8], key: &EncryptionKey, algo: EncryptionAlgorithm) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(BlockerError::MalformedEnvelope(format!(
            "ciphertext of {} bytes is shorter than nonce and tag",
            sealed.len()
        )));
    }
    let (nonce, body) = sealed.split_at(NONCE_LEN);

    match algo {
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), body)
                .map_err(|_| BlockerError::DecryptionAuthFailed)
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| BlockerError::EncryptionFailed(e.to_string()))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), body)
                .map_err(|_| BlockerError::DecryptionAuthFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey([42u8; 32])
    }

    proptest! {
        #[test]
        fn prop_aesgcm_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let sealed = seal(&data, &test_key(), EncryptionAlgorithm::AesGcm256).unwrap();
            prop_assert_eq!(sealed.len(), data.len() + NONCE_LEN + TAG_LEN);
            let opened = open(&sealed, &test_key(), EncryptionAlgorithm::AesGcm256).unwrap();
            prop_assert_eq!(opened, data);
        }
        #[test]
        fn prop_chacha_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let sealed = seal(&data, &test_key(), EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
            let opened = open(&sealed, &test_key(), EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
            prop_assert_eq!(opened, data);
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let a = seal(b"same", &test_key(), EncryptionAlgorithm::AesGcm256).unwrap();
        let b = seal(b"same", &test_key(), EncryptionAlgorithm::AesGcm256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = seal(b"secret", &test_key(), EncryptionAlgorithm::AesGcm256).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            open(&sealed, &test_key(), EncryptionAlgorithm::AesGcm256),
            Err(BlockerError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(b"secret", &test_key(), EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
        let wrong = EncryptionKey([99u8; 32]);
        assert!(matches!(
            open(&sealed, &wrong, EncryptionAlgorithm::ChaCha20Poly1305),
            Err(BlockerError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn short_input_is_malformed() {
        assert!(matches!(
            open(&[0u8; 10], &test_key(), EncryptionAlgorithm::AesGcm256),
            Err(BlockerError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn key_from_slice_checks_length() {
        assert!(EncryptionKey::from_slice(&[1u8; 32]).is_ok());
        assert!(EncryptionKey::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn algorithm_names() {
        assert_eq!(
            serde_json::to_string(&EncryptionAlgorithm::ChaCha20Poly1305).unwrap(),
            "\"chacha20-poly1305\""
        );
        let a: EncryptionAlgorithm = serde_json::from_str("\"aes-256-gcm\"").unwrap();
        assert_eq!(a, EncryptionAlgorithm::AesGcm256);
    }

    #[test]
    fn debug_redacts_key() {
        assert_eq!(format!("{:?}", test_key()), "EncryptionKey([REDACTED])");
    }
}
