//! In-memory chunk store with operation counters.

use super::ChunkStore;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Chunks held in a concurrent map. Counts saves and deletes so tests can
/// observe how often the engine touches physical storage.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: DashMap<String, Bytes>,
    saves: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryChunkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently stored
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when no chunk is stored
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total `save_chunk` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Total successful `delete_chunk` calls so far
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save_chunk(&self, key: &str, data: &[u8]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.chunks
            .insert(key.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        self.chunks
            .get(key)
            .map(|c| c.value().clone())
            .ok_or_else(|| BlockerError::ChunkNotFound(key.to_string()))
    }

    async fn chunk_exists(&self, key: &str) -> Result<bool> {
        Ok(self.chunks.contains_key(key))
    }

    async fn delete_chunk(&self, key: &str) -> Result<()> {
        match self.chunks.remove(key) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(BlockerError::ChunkNotFound(key.to_string())),
        }
    }
}
