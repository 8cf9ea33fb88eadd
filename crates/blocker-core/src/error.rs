//! Error types for the blocker core

/// Result alias used across the core.
pub type Result<T> = std::result::Result<T, BlockerError>;

/// All errors that can occur while blocking, reconstructing, copying or deleting files
#[derive(Debug, thiserror::Error)]
pub enum BlockerError {
    /// No manifest (BlockedFile) exists under the given ID
    #[error("Blocked file not found: {0}")]
    ManifestNotFound(String),
    /// No BlockInfo row exists for the given content hash
    #[error("Block info not found for hash {0}")]
    BlockInfoNotFound(String),
    /// The storage provider holds no chunk under the given storage key
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
    /// Local I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A remote backend (object store, document database, key service) failed
    #[error("Backend error: {0}")]
    Backend(String),
    /// Reconstructed chunk content does not hash to the recorded content hash
    #[error("Integrity check failed for chunk {hash}: content hashes to {actual}")]
    Integrity {
        /// Hash recorded in the manifest
        hash: String,
        /// Hash of the bytes actually recovered
        actual: String,
    },
    /// Missing or invalid configuration detected at startup
    #[error("Configuration error: {0}")]
    Config(String),
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    /// Decryption authentication tag mismatch; data may be corrupted or tampered
    #[error("Decryption failed: authentication tag mismatch (data may be corrupted)")]
    DecryptionAuthFailed,
    /// Ciphertext or key envelope is too short or otherwise malformed
    #[error("Malformed ciphertext envelope: {0}")]
    MalformedEnvelope(String),
    /// Encryption is enabled but no cipher provider or key is available
    #[error("Missing encryption key: encryption is enabled but no key is available")]
    MissingKey,
    /// JSON (de)serialization of a record failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Caller supplied an unusable argument (empty ID, unseekable stream, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BlockerError {
    /// True for the not-found family: manifest, block info or chunk absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BlockerError::ManifestNotFound(_)
                | BlockerError::BlockInfoNotFound(_)
                | BlockerError::ChunkNotFound(_)
        )
    }

    pub(crate) fn backend(e: impl std::fmt::Display) -> Self {
        BlockerError::Backend(e.to_string())
    }
}
