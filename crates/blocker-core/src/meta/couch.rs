//! CouchDB-backed metadata stores.

use super::{BlockInfo, BlockInfoStore, BlockedFile, ManifestStore};
use crate::couch::CouchClient;
use crate::error::{BlockerError, Result};
use async_trait::async_trait;

/// Document ID prefix for BlockInfo rows.
pub const BLOCK_INFO_PREFIX: &str = "blocker:bi:";
/// Document ID prefix for manifests.
pub const MANIFEST_PREFIX: &str = "blocker:bf:";

/// BlockInfo rows stored as `blocker:bi:<hash>` documents.
#[derive(Debug, Clone)]
pub struct CouchBlockInfoStore {
    client: CouchClient,
}

impl CouchBlockInfoStore {
    /// Use an already connected client
    pub fn new(client: CouchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockInfoStore for CouchBlockInfoStore {
    fn name(&self) -> &'static str {
        "couch"
    }

    async fn get_block_info(&self, hash: &str) -> Result<BlockInfo> {
        self.client
            .get_doc(&format!("{BLOCK_INFO_PREFIX}{hash}"))
            .await?
            .ok_or_else(|| BlockerError::BlockInfoNotFound(hash.to_string()))
    }

    async fn save_block_info(&self, info: &BlockInfo) -> Result<()> {
        self.client
            .put_doc(&format!("{BLOCK_INFO_PREFIX}{}", info.hash), info)
            .await
    }

    async fn delete_block_info(&self, hash: &str) -> Result<()> {
        if self
            .client
            .delete_doc(&format!("{BLOCK_INFO_PREFIX}{hash}"))
            .await?
        {
            Ok(())
        } else {
            Err(BlockerError::BlockInfoNotFound(hash.to_string()))
        }
    }
}

/// Manifests stored as `blocker:bf:<id>` documents.
#[derive(Debug, Clone)]
pub struct CouchManifestStore {
    client: CouchClient,
}

impl CouchManifestStore {
    /// Use an already connected client
    pub fn new(client: CouchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestStore for CouchManifestStore {
    fn name(&self) -> &'static str {
        "couch"
    }

    async fn get_blocked_file(&self, id: &str) -> Result<BlockedFile> {
        self.client
            .get_doc(&format!("{MANIFEST_PREFIX}{id}"))
            .await?
            .ok_or_else(|| BlockerError::ManifestNotFound(id.to_string()))
    }

    async fn save_blocked_file(&self, file: &BlockedFile) -> Result<()> {
        self.client
            .put_doc(&format!("{MANIFEST_PREFIX}{}", file.id), file)
            .await
    }

    async fn delete_blocked_file(&self, id: &str) -> Result<()> {
        if self
            .client
            .delete_doc(&format!("{MANIFEST_PREFIX}{id}"))
            .await?
        {
            Ok(())
        } else {
            Err(BlockerError::ManifestNotFound(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couch::CouchSettings;
    use mockito::{Matcher, Server};
    use serde_json::json;

    async fn client(server: &mut Server) -> CouchClient {
        server.mock("PUT", "/meta").with_status(201).create_async().await;
        CouchClient::connect(&CouchSettings {
            url: server.url(),
            database: "meta".into(),
            username: None,
            password: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn block_info_documents_are_prefixed() {
        let mut server = Server::new_async().await;
        let store = CouchBlockInfoStore::new(client(&mut server).await);
        server
            .mock("GET", "/meta/blocker:bi:abc")
            .with_status(200)
            .with_body(
                json!({
                    "_id": "blocker:bi:abc", "_rev": "2-x",
                    "hash": "abc", "storageKey": "k", "refCount": 3,
                    "created": "2024-01-01T00:00:00Z", "lastUsed": "2024-01-02T00:00:00Z"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let info = store.get_block_info("abc").await.unwrap();
        assert_eq!(info.ref_count, 3);
        assert_eq!(info.storage_key, "k");
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let mut server = Server::new_async().await;
        let infos = CouchBlockInfoStore::new(client(&mut server).await);
        let files = CouchManifestStore::new(client(&mut server).await);
        server
            .mock("GET", Matcher::Regex("^/meta/blocker:".into()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", Matcher::Regex("^/meta/blocker:".into()))
            .with_status(404)
            .create_async()
            .await;
        assert!(matches!(
            infos.get_block_info("zz").await,
            Err(BlockerError::BlockInfoNotFound(_))
        ));
        assert!(matches!(
            infos.delete_block_info("zz").await,
            Err(BlockerError::BlockInfoNotFound(_))
        ));
        assert!(matches!(
            files.get_blocked_file("nope").await,
            Err(BlockerError::ManifestNotFound(_))
        ));
        assert!(matches!(
            files.delete_blocked_file("nope").await,
            Err(BlockerError::ManifestNotFound(_))
        ));
    }
}
