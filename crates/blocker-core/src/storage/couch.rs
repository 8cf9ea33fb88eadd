//! Document-database chunk store: one CouchDB document per chunk.

use super::{chunk_object_name, ChunkStore};
use crate::couch::{CouchClient, CouchSettings};
use crate::error::{BlockerError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize)]
struct ChunkDoc {
    data: String,
}

/// Stores each chunk base64-encoded in the document `<key>.blk`.
#[derive(Debug, Clone)]
pub struct CouchChunkStore {
    client: CouchClient,
}

impl CouchChunkStore {
    /// Connect to the database described by `settings`.
    pub async fn connect(settings: &CouchSettings) -> Result<Self> {
        let client = CouchClient::connect(settings).await?;
        info!(url = %settings.url, database = %settings.database, "using CouchDB chunk storage");
        Ok(Self { client })
    }
}

#[async_trait]
impl ChunkStore for CouchChunkStore {
    fn name(&self) -> &'static str {
        "couch"
    }

    async fn save_chunk(&self, key: &str, data: &[u8]) -> Result<()> {
        let doc = ChunkDoc {
            data: STANDARD.encode(data),
        };
        self.client.put_doc(&chunk_object_name(key), &doc).await
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        let doc: ChunkDoc = self
            .client
            .get_doc(&chunk_object_name(key))
            .await?
            .ok_or_else(|| BlockerError::ChunkNotFound(key.to_string()))?;
        let data = STANDARD
            .decode(doc.data)
            .map_err(|e| BlockerError::Backend(format!("chunk {key} is not valid base64: {e}")))?;
        Ok(Bytes::from(data))
    }

    async fn chunk_exists(&self, key: &str) -> Result<bool> {
        Ok(self.client.head_rev(&chunk_object_name(key)).await?.is_some())
    }

    async fn delete_chunk(&self, key: &str) -> Result<()> {
        if self.client.delete_doc(&chunk_object_name(key)).await? {
            Ok(())
        } else {
            Err(BlockerError::ChunkNotFound(key.to_string()))
        }
    }
}
