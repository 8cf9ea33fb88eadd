//! Immutable configuration and one-shot backend resolution.
//!
//! Configuration is read once at startup. Each tagged backend section is then
//! resolved into a trait object that the engine owns for its lifetime; a
//! selection that cannot be satisfied fails here with `BlockerError::Config`
//! instead of inside a request.

use crate::compression::CompressionAlgorithm;
use crate::couch::{CouchClient, CouchSettings};
use crate::crypto::{
    AwsKmsService, AwsKmsSettings, CipherProvider, EncryptionAlgorithm, EnvelopeCipher,
    GoKmsService, LocalCipher, PgpCipher,
};
use crate::engine::BlockEngine;
use crate::error::{BlockerError, Result};
use crate::meta::{
    BlockInfoStore, CouchBlockInfoStore, CouchManifestStore, ManifestStore, MemoryBlockInfoStore,
    MemoryManifestStore,
};
use crate::storage::{ChunkStore, CouchChunkStore, DiskChunkStore, S3ChunkStore, S3Settings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 30 KiB chunks
pub const BLOCK_SIZE_30K: usize = 30 * 1024;
/// 100 KiB chunks
pub const BLOCK_SIZE_100K: usize = 100 * 1024;
/// 1 MiB chunks
pub const BLOCK_SIZE_1M: usize = 1024 * 1024;
/// 4 MiB chunks, the default
pub const BLOCK_SIZE_4M: usize = 4 * 1024 * 1024;

const DEFAULT_KMS_REGION: &str = "eu-central-1";
const DEFAULT_COUCH_URL: &str = "http://localhost:5984";

/// Chunking and transform settings. Write-time and read-time values must agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per chunk (the last chunk of a file may be shorter)
    pub chunk_size: usize,
    /// Compress chunks before encryption
    pub use_compression: bool,
    /// Algorithm used when compression is on
    pub compression: CompressionAlgorithm,
    /// Encrypt chunks with the configured cipher
    pub use_encryption: bool,
    /// Store chunks under random keys instead of their content hash
    pub random_storage_keys: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: BLOCK_SIZE_4M,
            use_compression: true,
            compression: CompressionAlgorithm::Lz4,
            use_encryption: true,
            random_storage_keys: true,
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BlockerError::Config("chunk_size must be greater than zero".into()));
        }
        if let CompressionAlgorithm::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(BlockerError::Config(format!(
                    "zstd level {level} is outside 1..=22"
                )));
            }
        }
        Ok(())
    }
}

/// Where chunk payloads live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Local directory, sharded two levels deep
    Disk {
        /// Root directory; `BLOCKER_DISK_DIR` or `tmp/blocker` when unset
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// S3-compatible object store
    S3 {
        /// Bucket; `BLOCKER_S3_BUCKET` when unset
        #[serde(default)]
        bucket: Option<String>,
        /// Region
        #[serde(default = "default_s3_region")]
        region: String,
        /// Custom endpoint (MinIO, R2, ...)
        #[serde(default)]
        endpoint: Option<String>,
        /// Object name prefix
        #[serde(default)]
        prefix: String,
        /// Access key; `BLOCKER_S3_KEY` when unset
        #[serde(default)]
        access_key: Option<String>,
        /// Secret key; `BLOCKER_S3_SECRET` when unset
        #[serde(default)]
        secret_key: Option<String>,
    },
    /// CouchDB documents
    Couch {
        /// Server URL; `CB_HOST` or `http://localhost:5984` when unset
        #[serde(default)]
        url: Option<String>,
        /// Database name
        #[serde(default = "default_chunk_db")]
        database: String,
        /// Basic-auth user
        #[serde(default)]
        username: Option<String>,
        /// Basic-auth password
        #[serde(default)]
        password: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Disk { path: None }
    }
}

/// Which cipher provider encrypts chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CipherConfig {
    /// One symmetric key kept in a local key file
    Local {
        /// Key file; `<tmp>/blocks/aes.key` when unset
        #[serde(default)]
        key_path: Option<PathBuf>,
        /// AEAD algorithm
        #[serde(default)]
        algorithm: EncryptionAlgorithm,
    },
    /// Envelope encryption with AWS KMS data keys
    AwsKms {
        /// Region; `BLOCKER_KMS_REGION` or `eu-central-1` when unset
        #[serde(default)]
        region: Option<String>,
        /// Master key; `BLOCKER_KMS_KEY_ID`, else the first listed key
        #[serde(default)]
        key_id: Option<String>,
        /// Access key; `BLOCKER_KMS_KEY` when unset
        #[serde(default)]
        access_key: Option<String>,
        /// Secret key; `BLOCKER_KMS_SECRET` when unset
        #[serde(default)]
        secret_key: Option<String>,
    },
    /// Envelope encryption with Go-KMS data keys
    GoKms {
        /// Service URL; `BLOCKER_GOKMS_URL` when unset
        #[serde(default)]
        url: Option<String>,
        /// Shared signing key; `BLOCKER_GOKMS_AUTHKEY` when unset
        #[serde(default)]
        auth_key: Option<String>,
        /// Master key; `BLOCKER_GOKMS_KEYID`, else the newest key
        #[serde(default)]
        key_id: Option<String>,
        /// Skip TLS verification; `BLOCKER_GOKMS_IGNORE_BAD_TLS_CERT=true` also enables it
        #[serde(default)]
        accept_invalid_certs: bool,
    },
    /// OpenPGP messages encrypted to an armored public key
    Pgp {
        /// Armored public key; `BLOCKER_PGP_PUBLICKEY` when unset
        #[serde(default)]
        public_key_path: Option<PathBuf>,
        /// Armored, unprotected secret key; `BLOCKER_PGP_PRIVATEKEY` when unset
        #[serde(default)]
        private_key_path: Option<PathBuf>,
    },
}

impl Default for CipherConfig {
    fn default() -> Self {
        CipherConfig::Local {
            key_path: None,
            algorithm: EncryptionAlgorithm::default(),
        }
    }
}

/// Where BlockInfo rows and manifests live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MetadataConfig {
    /// Process memory; lost on restart
    #[default]
    Memory,
    /// CouchDB documents
    Couch {
        /// Server URL; `CB_HOST` or `http://localhost:5984` when unset
        #[serde(default)]
        url: Option<String>,
        /// Database name
        #[serde(default = "default_meta_db")]
        database: String,
        /// Basic-auth user
        #[serde(default)]
        username: Option<String>,
        /// Basic-auth password
        #[serde(default)]
        password: Option<String>,
        /// Use in-memory stores when the database cannot be reached
        #[serde(default = "default_true")]
        fallback_to_memory: bool,
    },
}

/// Everything needed to build a [`BlockEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlockerConfig {
    /// Chunking and transforms
    pub engine: EngineConfig,
    /// Chunk storage backend
    pub storage: StorageConfig,
    /// Cipher backend, used when `engine.use_encryption` is set
    pub cipher: CipherConfig,
    /// Metadata backend
    pub metadata: MetadataConfig,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_chunk_db() -> String {
    "blocker_chunks".to_string()
}

fn default_meta_db() -> String {
    "blocker_meta".to_string()
}

fn default_true() -> bool {
    true
}

/// `value`, else a non-empty environment variable.
fn or_env(value: &Option<String>, var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

fn required(value: &Option<String>, var: &str, what: &str) -> Result<String> {
    or_env(value, var).ok_or_else(|| {
        BlockerError::Config(format!("{what} is not configured (set it or {var})"))
    })
}

fn required_path(value: &Option<PathBuf>, var: &str, what: &str) -> Result<PathBuf> {
    value
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from))
        .ok_or_else(|| BlockerError::Config(format!("{what} is not configured (set it or {var})")))
}

/// Resolve the chunk storage backend.
pub async fn open_chunk_store(config: &StorageConfig) -> Result<Arc<dyn ChunkStore>> {
    match config {
        StorageConfig::Disk { path } => {
            let root = path
                .clone()
                .or_else(|| std::env::var_os("BLOCKER_DISK_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("tmp").join("blocker"));
            info!(root = %root.display(), "using disk chunk storage");
            Ok(Arc::new(DiskChunkStore::open(root).await?))
        }
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
            prefix,
            access_key,
            secret_key,
        } => {
            let settings = S3Settings {
                bucket: required(bucket, "BLOCKER_S3_BUCKET", "S3 bucket")?,
                region: region.clone(),
                endpoint: endpoint.clone(),
                prefix: prefix.clone(),
                access_key: or_env(access_key, "BLOCKER_S3_KEY"),
                secret_key: or_env(secret_key, "BLOCKER_S3_SECRET"),
            };
            Ok(Arc::new(S3ChunkStore::connect(settings).await?))
        }
        StorageConfig::Couch {
            url,
            database,
            username,
            password,
        } => {
            let settings = couch_settings(url, database, username, password);
            Ok(Arc::new(CouchChunkStore::connect(&settings).await?))
        }
    }
}

/// Resolve the cipher backend.
pub async fn open_cipher(config: &CipherConfig) -> Result<Arc<dyn CipherProvider>> {
    match config {
        CipherConfig::Local {
            key_path,
            algorithm,
        } => {
            let path = key_path
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("blocks").join("aes.key"));
            Ok(Arc::new(LocalCipher::load_or_generate(&path, *algorithm).await?))
        }
        CipherConfig::AwsKms {
            region,
            key_id,
            access_key,
            secret_key,
        } => {
            let settings = AwsKmsSettings {
                region: or_env(region, "BLOCKER_KMS_REGION")
                    .unwrap_or_else(|| DEFAULT_KMS_REGION.to_string()),
                key_id: or_env(key_id, "BLOCKER_KMS_KEY_ID"),
                access_key: or_env(access_key, "BLOCKER_KMS_KEY"),
                secret_key: or_env(secret_key, "BLOCKER_KMS_SECRET"),
            };
            let service = AwsKmsService::connect(settings).await?;
            Ok(Arc::new(EnvelopeCipher::new(service)))
        }
        CipherConfig::GoKms {
            url,
            auth_key,
            key_id,
            accept_invalid_certs,
        } => {
            let url = required(url, "BLOCKER_GOKMS_URL", "Go-KMS URL")?;
            let auth_key = required(auth_key, "BLOCKER_GOKMS_AUTHKEY", "Go-KMS auth key")?;
            let insecure = *accept_invalid_certs
                || std::env::var("BLOCKER_GOKMS_IGNORE_BAD_TLS_CERT")
                    .is_ok_and(|v| v.eq_ignore_ascii_case("true"));
            let service = GoKmsService::connect(
                &url,
                &auth_key,
                or_env(key_id, "BLOCKER_GOKMS_KEYID"),
                insecure,
            )
            .await?;
            Ok(Arc::new(EnvelopeCipher::new(service)))
        }
        CipherConfig::Pgp {
            public_key_path,
            private_key_path,
        } => {
            let public = required_path(public_key_path, "BLOCKER_PGP_PUBLICKEY", "PGP public key")?;
            let private =
                required_path(private_key_path, "BLOCKER_PGP_PRIVATEKEY", "PGP private key")?;
            Ok(Arc::new(PgpCipher::load(&public, &private).await?))
        }
    }
}

/// Resolved metadata backends.
#[derive(Clone)]
pub struct MetadataStores {
    /// BlockInfo rows
    pub block_infos: Arc<dyn BlockInfoStore>,
    /// Manifests
    pub manifests: Arc<dyn ManifestStore>,
}

impl MetadataStores {
    /// Fresh in-memory stores
    pub fn in_memory() -> Self {
        Self {
            block_infos: Arc::new(MemoryBlockInfoStore::new()),
            manifests: Arc::new(MemoryManifestStore::new()),
        }
    }
}

/// Resolve the metadata backend, falling back to memory when allowed.
pub async fn open_metadata(config: &MetadataConfig) -> Result<MetadataStores> {
    match config {
        MetadataConfig::Memory => {
            info!("using in-memory metadata");
            Ok(MetadataStores::in_memory())
        }
        MetadataConfig::Couch {
            url,
            database,
            username,
            password,
            fallback_to_memory,
        } => {
            let settings = couch_settings(url, database, username, password);
            match CouchClient::connect(&settings).await {
                Ok(client) => {
                    info!(url = %settings.url, database = %settings.database, "using CouchDB metadata");
                    Ok(MetadataStores {
                        block_infos: Arc::new(CouchBlockInfoStore::new(client.clone())),
                        manifests: Arc::new(CouchManifestStore::new(client)),
                    })
                }
                Err(e) if *fallback_to_memory => {
                    warn!(url = %settings.url, error = %e, "metadata database unreachable, using in-memory metadata");
                    Ok(MetadataStores::in_memory())
                }
                Err(e) => Err(BlockerError::Config(format!(
                    "metadata database {} unreachable: {e}",
                    settings.url
                ))),
            }
        }
    }
}

fn couch_settings(
    url: &Option<String>,
    database: &str,
    username: &Option<String>,
    password: &Option<String>,
) -> CouchSettings {
    CouchSettings {
        url: or_env(url, "CB_HOST").unwrap_or_else(|| DEFAULT_COUCH_URL.to_string()),
        database: database.to_string(),
        username: username.clone(),
        password: password.clone(),
    }
}

impl BlockEngine {
    /// Resolve every backend named in `config` and assemble an engine.
    pub async fn from_config(config: &BlockerConfig) -> Result<Self> {
        config.engine.validate()?;
        let chunks = open_chunk_store(&config.storage).await?;
        let metadata = open_metadata(&config.metadata).await?;
        let cipher = if config.engine.use_encryption {
            Some(open_cipher(&config.cipher).await?)
        } else {
            None
        };
        BlockEngine::new(
            config.engine.clone(),
            chunks,
            metadata.block_infos,
            metadata.manifests,
            cipher,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn engine_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.chunk_size, BLOCK_SIZE_4M);
        assert!(c.use_compression);
        assert!(c.use_encryption);
        assert!(c.validate().is_ok());
        assert_eq!(BLOCK_SIZE_30K, 30_720);
    }

    #[test]
    fn bad_zstd_level_rejected() {
        let c = EngineConfig {
            compression: CompressionAlgorithm::Zstd { level: 40 },
            ..EngineConfig::default()
        };
        assert!(matches!(c.validate(), Err(BlockerError::Config(_))));
    }

    #[test]
    fn tagged_sections_parse_from_json() {
        let cfg: BlockerConfig = serde_json::from_value(serde_json::json!({
            "engine": { "chunk_size": 30720, "use_encryption": false },
            "storage": { "kind": "s3", "bucket": "b", "prefix": "p/" },
            "cipher": { "kind": "go-kms", "url": "https://kms", "auth_key": "k" },
            "metadata": { "kind": "couch", "url": "http://db:5984" }
        }))
        .unwrap();
        assert_eq!(cfg.engine.chunk_size, 30_720);
        assert!(cfg.engine.use_compression);
        assert!(matches!(cfg.storage, StorageConfig::S3 { ref region, .. } if region == "us-east-1"));
        assert!(matches!(cfg.cipher, CipherConfig::GoKms { accept_invalid_certs: false, .. }));
        assert!(matches!(
            cfg.metadata,
            MetadataConfig::Couch { fallback_to_memory: true, ref database, .. } if database == "blocker_meta"
        ));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: BlockerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, BlockerConfig::default());
        assert!(matches!(cfg.storage, StorageConfig::Disk { path: None }));
        assert_eq!(cfg.metadata, MetadataConfig::Memory);
    }

    #[test]
    fn unknown_backend_kind_is_rejected() {
        let res: std::result::Result<StorageConfig, _> =
            serde_json::from_value(serde_json::json!({ "kind": "tape" }));
        assert!(res.is_err());
    }

    #[test]
    fn explicit_values_win_over_environment() {
        assert_eq!(
            or_env(&Some("explicit".into()), "BLOCKER_TEST_UNUSED_VAR"),
            Some("explicit".into())
        );
        assert_eq!(or_env(&Some(String::new()), "BLOCKER_TEST_UNUSED_VAR"), None);
        assert!(matches!(
            required(&None, "BLOCKER_TEST_UNUSED_VAR", "thing"),
            Err(BlockerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn disk_and_local_cipher_resolve() {
        let dir = TempDir::new().unwrap();
        let cfg = BlockerConfig {
            engine: EngineConfig {
                chunk_size: 1024,
                ..EngineConfig::default()
            },
            storage: StorageConfig::Disk {
                path: Some(dir.path().join("chunks")),
            },
            cipher: CipherConfig::Local {
                key_path: Some(dir.path().join("aes.key")),
                algorithm: EncryptionAlgorithm::ChaCha20Poly1305,
            },
            metadata: MetadataConfig::Memory,
        };
        let engine = BlockEngine::from_config(&cfg).await.unwrap();
        assert_eq!(engine.chunk_store().name(), "disk");

        let file = engine
            .block_bytes(&vec![9u8; 3000], crate::meta::FileMeta::default())
            .await
            .unwrap();
        assert_eq!(engine.unblock_to_vec(&file.id).await.unwrap(), vec![9u8; 3000]);
        assert!(dir.path().join("aes.key").exists());
    }

    #[tokio::test]
    async fn pgp_cipher_resolves_from_key_paths() {
        let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data");
        let cfg: CipherConfig = serde_json::from_value(serde_json::json!({
            "kind": "pgp",
            "public_key_path": data.join("pgp_public.asc"),
            "private_key_path": data.join("pgp_secret.asc"),
        }))
        .unwrap();
        let cipher = open_cipher(&cfg).await.unwrap();
        assert_eq!(cipher.name(), "pgp");
        let sealed = cipher.encrypt(b"chunk").await.unwrap();
        assert_eq!(cipher.decrypt(&sealed).await.unwrap(), b"chunk");
    }

    #[test]
    fn pgp_paths_are_required() {
        assert!(matches!(
            required_path(&None, "BLOCKER_TEST_UNUSED_VAR", "PGP public key"),
            Err(BlockerError::Config(_))
        ));
        assert_eq!(
            required_path(&Some(PathBuf::from("/k.asc")), "BLOCKER_TEST_UNUSED_VAR", "key").unwrap(),
            PathBuf::from("/k.asc")
        );
    }

    #[tokio::test]
    async fn unreachable_metadata_falls_back_or_fails() {
        let unreachable = |fallback| MetadataConfig::Couch {
            url: Some("http://127.0.0.1:1".into()),
            database: "m".into(),
            username: None,
            password: None,
            fallback_to_memory: fallback,
        };
        let stores = open_metadata(&unreachable(true)).await.unwrap();
        assert_eq!(stores.block_infos.name(), "memory");
        assert!(matches!(
            open_metadata(&unreachable(false)).await,
            Err(BlockerError::Config(_))
        ));
    }
}
