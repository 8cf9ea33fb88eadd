//! Chunk storage providers.
//!
//! Every backend offers the same contract: saving under an existing key
//! overwrites, and reads or deletes of an absent key fail with
//! [`BlockerError::ChunkNotFound`](crate::error::BlockerError::ChunkNotFound).

mod couch;
mod disk;
mod memory;
mod s3;

pub use couch::CouchChunkStore;
pub use disk::DiskChunkStore;
pub use memory::MemoryChunkStore;
pub use s3::{S3ChunkStore, S3Settings};

use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Suffix appended to a storage key to form the physical object name.
pub const CHUNK_SUFFIX: &str = ".blk";

/// Persists opaque chunk payloads by storage key.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Store `data` under `key`, replacing any previous payload.
    async fn save_chunk(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Fetch the payload stored under `key`.
    async fn get_chunk(&self, key: &str) -> Result<Bytes>;

    /// Whether a payload is stored under `key`.
    async fn chunk_exists(&self, key: &str) -> Result<bool>;

    /// Remove the payload stored under `key`.
    async fn delete_chunk(&self, key: &str) -> Result<()>;
}

/// Object name for a storage key.
pub fn chunk_object_name(key: &str) -> String {
    format!("{key}{CHUNK_SUFFIX}")
}

/// Storage keys become file and object names; only hex-like tokens are accepted.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.len() < 2 || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BlockerError::InvalidInput(format!(
            "invalid storage key {key:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_carry_suffix() {
        assert_eq!(chunk_object_name("abcd"), "abcd.blk");
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("ab").is_ok());
        assert!(validate_key("e3b0c44298fc1c149afbf4c8996fb924").is_ok());
        assert!(validate_key("a").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("ab/cd").is_err());
    }
}
