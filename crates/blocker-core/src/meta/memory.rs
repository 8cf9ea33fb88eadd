//! In-memory metadata stores, used for tests and when no database is reachable.

use super::{BlockInfo, BlockInfoStore, BlockedFile, ManifestStore};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// [`BlockInfo`] rows in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlockInfoStore {
    rows: DashMap<String, BlockInfo>,
}

impl MemoryBlockInfoStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row exists
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl BlockInfoStore for MemoryBlockInfoStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_block_info(&self, hash: &str) -> Result<BlockInfo> {
        self.rows
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| BlockerError::BlockInfoNotFound(hash.to_string()))
    }

    async fn save_block_info(&self, info: &BlockInfo) -> Result<()> {
        self.rows.insert(info.hash.clone(), info.clone());
        Ok(())
    }

    async fn delete_block_info(&self, hash: &str) -> Result<()> {
        self.rows
            .remove(hash)
            .map(|_| ())
            .ok_or_else(|| BlockerError::BlockInfoNotFound(hash.to_string()))
    }
}

/// [`BlockedFile`] manifests in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    files: DashMap<String, BlockedFile>,
}

impl MemoryManifestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of manifests
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no manifest exists
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_blocked_file(&self, id: &str) -> Result<BlockedFile> {
        self.files
            .get(id)
            .map(|f| f.value().clone())
            .ok_or_else(|| BlockerError::ManifestNotFound(id.to_string()))
    }

    async fn save_blocked_file(&self, file: &BlockedFile) -> Result<()> {
        self.files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn delete_blocked_file(&self, id: &str) -> Result<()> {
        self.files
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BlockerError::ManifestNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn block_info_crud() {
        let store = MemoryBlockInfoStore::new();
        assert!(matches!(
            store.get_block_info("h").await,
            Err(BlockerError::BlockInfoNotFound(_))
        ));

        let mut info = BlockInfo::new("h", "k", 1, Utc::now());
        store.save_block_info(&info).await.unwrap();
        info.ref_count = 2;
        store.save_block_info(&info).await.unwrap();
        assert_eq!(store.get_block_info("h").await.unwrap().ref_count, 2);
        assert_eq!(store.len(), 1);

        store.delete_block_info("h").await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete_block_info("h").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn manifest_crud() {
        let store = MemoryManifestStore::new();
        let file = BlockedFile {
            id: "id1".into(),
            file_hash: "fh".into(),
            length: 0,
            blocks: vec![],
            name: None,
            content_type: None,
            created: Utc::now(),
        };
        store.save_blocked_file(&file).await.unwrap();
        assert_eq!(store.get_blocked_file("id1").await.unwrap(), file);
        store.delete_blocked_file("id1").await.unwrap();
        assert!(matches!(
            store.get_blocked_file("id1").await,
            Err(BlockerError::ManifestNotFound(_))
        ));
        assert!(matches!(
            store.delete_blocked_file("id1").await,
            Err(BlockerError::ManifestNotFound(_))
        ));
    }
}
