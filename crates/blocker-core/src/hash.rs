//! Content fingerprinting: SHA-256 over chunks and whole streams

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read granularity when hashing a stream.
const STREAM_READ_SIZE: usize = 64 * 1024;

/// A 32-byte SHA-256 digest identifying content. Rendered as lowercase hex it is the CAS key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the SHA-256 hash of exactly the given bytes
pub fn content_hash(data: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(data).into())
}

/// Compute the SHA-256 hash of everything remaining in `reader`.
/// The reader is consumed; seeking back is the caller's business.
pub async fn hash_stream<R>(reader: &mut R) -> std::io::Result<ContentHash>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_READ_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(content_hash(b"hello world"), content_hash(b"hello world"));
    }

    #[test]
    fn different_data_produces_different_hashes() {
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            content_hash(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            content_hash(b"abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn stream_hash_matches_slice_hash() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut cursor = std::io::Cursor::new(data.clone());
        let streamed = hash_stream(&mut cursor).await.unwrap();
        assert_eq!(streamed, content_hash(&data));
    }

    proptest! {
        #[test]
        fn prop_hex_is_lowercase_64(data in prop::collection::vec(0u8..=255, 0..4096)) {
            let hex = content_hash(&data).to_hex();
            prop_assert_eq!(hex.len(), 64);
            prop_assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
