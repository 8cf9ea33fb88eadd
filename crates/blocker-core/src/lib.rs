#![warn(missing_docs)]

//! Blocker core: a content-addressed, deduplicating block store.
//!
//! Files are split into fixed-size chunks. Each chunk is identified by the
//! SHA-256 of its plaintext, compressed, encrypted and stored once no matter
//! how many files reference it. A [`BlockedFile`] manifest lists the chunk
//! hashes that rebuild a file, and reference-counted [`BlockInfo`] rows decide
//! when a chunk may be physically deleted.
//!
//! ```text
//! source ─► hash ─► chunk ─► compress ─► encrypt ─► ChunkStore
//!                     │
//!                     └────► BlockInfoStore (ref counts) ─► ManifestStore
//! ```

pub mod compression;
pub mod config;
pub mod couch;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod hash;
pub mod locks;
pub mod meta;
pub mod storage;

pub use compression::CompressionAlgorithm;
pub use config::{
    open_chunk_store, open_cipher, open_metadata, BlockerConfig, CipherConfig, EngineConfig,
    MetadataConfig, MetadataStores, StorageConfig,
};
pub use crypto::{CipherProvider, EncryptionAlgorithm, EncryptionKey};
pub use engine::BlockEngine;
pub use error::{BlockerError, Result};
pub use hash::{content_hash, ContentHash};
pub use meta::{BlockInfo, BlockInfoStore, BlockedFile, FileBlock, FileMeta, ManifestStore};
pub use storage::ChunkStore;
