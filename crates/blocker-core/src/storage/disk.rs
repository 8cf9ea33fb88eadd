//! Local filesystem chunk store sharded by the first two key characters.

use super::{chunk_object_name, validate_key, ChunkStore};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores each chunk at `root/<k0>/<k1>/<key>.blk`.
#[derive(Debug, Clone)]
pub struct DiskChunkStore {
    root: PathBuf,
}

impl DiskChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "disk chunk store ready");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, key: &str) -> PathBuf {
        self.root.join(&key[0..1]).join(&key[1..2])
    }

    fn chunk_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.shard_dir(key).join(chunk_object_name(key)))
    }
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn save_chunk(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.chunk_path(key)?;
        tokio::fs::create_dir_all(self.shard_dir(key)).await?;

        // Readers never observe a half-written chunk.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        let path = self.chunk_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlockerError::ChunkNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn chunk_exists(&self, key: &str) -> Result<bool> {
        let path = self.chunk_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete_chunk(&self, key: &str) -> Result<()> {
        let path = self.chunk_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlockerError::ChunkNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn chunk_lands_in_two_level_shard() {
        let dir = TempDir::new().unwrap();
        let store = DiskChunkStore::open(dir.path()).await.unwrap();
        store.save_chunk("abcdef", b"payload").await.unwrap();
        let expected = dir.path().join("a").join("b").join("abcdef.blk");
        assert_eq!(std::fs::read(expected).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn save_get_exists_delete() {
        let dir = TempDir::new().unwrap();
        let store = DiskChunkStore::open(dir.path()).await.unwrap();
        assert!(!store.chunk_exists("ff00").await.unwrap());

        store.save_chunk("ff00", b"one").await.unwrap();
        store.save_chunk("ff00", b"two").await.unwrap();
        assert!(store.chunk_exists("ff00").await.unwrap());
        assert_eq!(&store.get_chunk("ff00").await.unwrap()[..], b"two");

        store.delete_chunk("ff00").await.unwrap();
        assert!(!store.chunk_exists("ff00").await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = DiskChunkStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get_chunk("0000").await,
            Err(BlockerError::ChunkNotFound(_))
        ));
        assert!(matches!(
            store.delete_chunk("0000").await,
            Err(BlockerError::ChunkNotFound(_))
        ));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = DiskChunkStore::open(dir.path()).await.unwrap();
        store.save_chunk("1234", b"x").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("1").join("2"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["1234.blk".to_string()]);
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = DiskChunkStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.save_chunk("../x", b"").await,
            Err(BlockerError::InvalidInput(_))
        ));
    }
}
