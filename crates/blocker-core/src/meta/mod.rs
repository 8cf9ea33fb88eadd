//! Chunk metadata (BlockInfo) and manifest (BlockedFile) records and their stores.

mod couch;
mod memory;

pub use couch::{CouchBlockInfoStore, CouchManifestStore, BLOCK_INFO_PREFIX, MANIFEST_PREFIX};
pub use memory::{MemoryBlockInfoStore, MemoryManifestStore};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference-counted metadata row for one stored chunk, keyed by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    /// Content hash of the plaintext chunk (lowercase hex)
    pub hash: String,
    /// Key the chunk payload is stored under
    pub storage_key: String,
    /// Live manifest entries referencing this chunk
    pub ref_count: u64,
    /// When the chunk was first stored
    pub created: DateTime<Utc>,
    /// Last write, read, or copy that touched the chunk
    pub last_used: DateTime<Utc>,
}

impl BlockInfo {
    /// A fresh row with both timestamps set to `now`.
    pub fn new(hash: impl Into<String>, storage_key: impl Into<String>, ref_count: u64, now: DateTime<Utc>) -> Self {
        Self {
            hash: hash.into(),
            storage_key: storage_key.into(),
            ref_count,
            created: now,
            last_used: now,
        }
    }
}

/// One entry of a manifest's block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    /// 1-based position of the chunk within the file
    pub position: u32,
    /// Content hash of the chunk
    pub hash: String,
}

/// Manifest describing how to rebuild one logical file from chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedFile {
    /// Unique ID, never reused
    pub id: String,
    /// Content hash of the whole file
    pub file_hash: String,
    /// Total byte length of the file
    pub length: u64,
    /// Ordered chunk references
    pub blocks: Vec<FileBlock>,
    /// Original file name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Creation time
    #[serde(rename = "time", default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl BlockedFile {
    /// Positions run 1, 2, 3, ... without gaps.
    pub fn is_contiguous(&self) -> bool {
        self.blocks
            .iter()
            .enumerate()
            .all(|(i, b)| b.position as usize == i + 1)
    }
}

/// Descriptive metadata attached to a new manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMeta {
    /// Original file name
    pub name: Option<String>,
    /// MIME type
    pub content_type: Option<String>,
}

impl FileMeta {
    /// Metadata carrying only a file name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            content_type: None,
        }
    }
}

/// CRUD over [`BlockInfo`] rows. Gets and deletes of absent hashes fail
/// with `BlockInfoNotFound`; saves upsert.
#[async_trait]
pub trait BlockInfoStore: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;
    /// Fetch the row for `hash`
    async fn get_block_info(&self, hash: &str) -> Result<BlockInfo>;
    /// Insert or replace the row keyed by `info.hash`
    async fn save_block_info(&self, info: &BlockInfo) -> Result<()>;
    /// Remove the row for `hash`
    async fn delete_block_info(&self, hash: &str) -> Result<()>;
}

/// CRUD over [`BlockedFile`] manifests. Gets and deletes of absent IDs fail
/// with `ManifestNotFound`; saves upsert.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;
    /// Fetch manifest `id`
    async fn get_blocked_file(&self, id: &str) -> Result<BlockedFile>;
    /// Insert or replace the manifest keyed by `file.id`
    async fn save_blocked_file(&self, file: &BlockedFile) -> Result<()>;
    /// Remove manifest `id`
    async fn delete_blocked_file(&self, id: &str) -> Result<()>;
}
