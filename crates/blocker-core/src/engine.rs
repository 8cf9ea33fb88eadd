//! The block engine: chunking, deduplication, reconstruction and reference-counted deletion.
//!
//! Writes run in two phases. The chunking pass reads the source one chunk at a
//! time, stores chunks whose hash has no BlockInfo row yet, and remembers how
//! often each hash occurs. The commit pass then charges those references under
//! per-hash locks and only afterwards saves the manifest. Every charge is
//! recorded as it lands; when the commit or the manifest save fails, those
//! exact counts are released again, and a write cancelled mid-commit hands them
//! to a background task that does the same.

use crate::compression::{compress, decompress};
use crate::config::EngineConfig;
use crate::crypto::CipherProvider;
use crate::error::{BlockerError, Result};
use crate::hash::{content_hash, hash_stream};
use crate::locks::HashLocks;
use crate::meta::{BlockInfo, BlockInfoStore, BlockedFile, FileBlock, FileMeta, ManifestStore};
use crate::storage::ChunkStore;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use rand::RngCore;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

/// Hash seen during a chunking pass, awaiting its reference charge.
#[derive(Debug)]
struct PendingChunk {
    /// Storage key, when this pass stored the chunk itself
    stored_key: Option<String>,
    first_position: u32,
    occurrences: u64,
}

/// References charged by an in-flight write or copy, keyed by content hash.
///
/// `rollback` releases the charges in place; dropping the guard while it still
/// holds charges releases them from a task on the current runtime. `disarm`
/// keeps them once the manifest is saved.
struct ChargeGuard {
    engine: BlockEngine,
    charged: Vec<(String, u64)>,
}

impl ChargeGuard {
    fn new(engine: &BlockEngine) -> Self {
        Self {
            engine: engine.clone(),
            charged: Vec::new(),
        }
    }

    fn disarm(&mut self) {
        self.charged.clear();
    }

    async fn rollback(&mut self) {
        let charged = std::mem::take(&mut self.charged);
        self.engine.release_charges(&charged).await;
    }
}

impl Drop for ChargeGuard {
    fn drop(&mut self) {
        if self.charged.is_empty() {
            return;
        }
        let charged = std::mem::take(&mut self.charged);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(hashes = charged.len(), "write abandoned mid-commit, releasing its references");
                let engine = self.engine.clone();
                handle.spawn(async move { engine.release_charges(&charged).await });
            }
            Err(_) => {
                error!(hashes = charged.len(), "write abandoned outside a runtime, references stay charged");
            }
        }
    }
}

/// Orchestrates chunk storage, metadata and manifests for whole files.
#[derive(Clone)]
pub struct BlockEngine {
    config: EngineConfig,
    chunks: Arc<dyn ChunkStore>,
    block_infos: Arc<dyn BlockInfoStore>,
    manifests: Arc<dyn ManifestStore>,
    cipher: Option<Arc<dyn CipherProvider>>,
    locks: HashLocks,
}

impl std::fmt::Debug for BlockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockEngine")
            .field("config", &self.config)
            .field("chunks", &self.chunks.name())
            .field("block_infos", &self.block_infos.name())
            .field("manifests", &self.manifests.name())
            .field("cipher", &self.cipher.as_ref().map(|c| c.name()))
            .finish()
    }
}

impl BlockEngine {
    /// Assemble an engine. Fails when the configuration is invalid or
    /// encryption is enabled without a cipher.
    pub fn new(
        config: EngineConfig,
        chunks: Arc<dyn ChunkStore>,
        block_infos: Arc<dyn BlockInfoStore>,
        manifests: Arc<dyn ManifestStore>,
        cipher: Option<Arc<dyn CipherProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.use_encryption && cipher.is_none() {
            return Err(BlockerError::MissingKey);
        }
        Ok(Self {
            config,
            chunks,
            block_infos,
            manifests,
            cipher,
            locks: HashLocks::new(),
        })
    }

    /// The configuration this engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The chunk storage provider
    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.chunks
    }

    /// The BlockInfo store
    pub fn block_info_store(&self) -> &Arc<dyn BlockInfoStore> {
        &self.block_infos
    }

    // ---- write path ----

    /// Split `source` into chunks, store the new ones and save a manifest.
    ///
    /// The source is read twice (whole-file hash, then chunking) and must be
    /// seekable.
    #[instrument(skip(self, source, meta), fields(chunk_size = self.config.chunk_size))]
    pub async fn block_stream<R>(&self, source: &mut R, meta: FileMeta) -> Result<BlockedFile>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let file_hash = hash_stream(source).await?.to_hex();
        source.seek(SeekFrom::Start(0)).await?;

        let chunk_size = self.config.chunk_size;
        let mut buf = vec![0u8; chunk_size];
        let mut blocks: Vec<FileBlock> = Vec::new();
        let mut pending: HashMap<String, PendingChunk> = HashMap::new();
        let mut length: u64 = 0;

        loop {
            let n = read_full(source, &mut buf).await?;
            if n == 0 {
                break;
            }
            let data = &buf[..n];
            let hash = content_hash(data).to_hex();
            let position = u32::try_from(blocks.len() + 1)
                .map_err(|_| BlockerError::InvalidInput("file has too many chunks".into()))?;

            if let Some(p) = pending.get_mut(&hash) {
                p.occurrences += 1;
            } else {
                let stored_key = match self.block_infos.get_block_info(&hash).await {
                    Ok(_) => {
                        debug!(%hash, position, "dedup hit");
                        None
                    }
                    Err(BlockerError::BlockInfoNotFound(_)) => {
                        let key = self.store_new_chunk(&hash, data).await?;
                        debug!(%hash, position, bytes = n, "stored new chunk");
                        Some(key)
                    }
                    Err(e) => return Err(e),
                };
                pending.insert(
                    hash.clone(),
                    PendingChunk {
                        stored_key,
                        first_position: position,
                        occurrences: 1,
                    },
                );
            }

            blocks.push(FileBlock { position, hash });
            length += n as u64;
            if n < chunk_size {
                break;
            }
        }

        let mut charges = ChargeGuard::new(self);
        let committed = self
            .commit_references(source, &blocks, pending, &mut buf, &mut charges.charged)
            .await;
        let saved = match committed {
            Ok(()) => {
                let file = BlockedFile {
                    id: uuid::Uuid::new_v4().to_string(),
                    file_hash,
                    length,
                    blocks,
                    name: meta.name,
                    content_type: meta.content_type,
                    created: Utc::now(),
                };
                let result = self.manifests.save_blocked_file(&file).await;
                result.map(|()| file)
            }
            Err(e) => Err(e),
        };

        match saved {
            Ok(file) => {
                charges.disarm();
                info!(id = %file.id, length = file.length, chunks = file.blocks.len(), "blocked file");
                Ok(file)
            }
            Err(e) => {
                warn!(error = %e, "write failed, releasing charged references");
                charges.rollback().await;
                Err(e)
            }
        }
    }

    /// Block an in-memory buffer.
    pub async fn block_bytes(&self, data: &[u8], meta: FileMeta) -> Result<BlockedFile> {
        let mut cursor = std::io::Cursor::new(data);
        self.block_stream(&mut cursor, meta).await
    }

    /// Block the file at `path`, recording its base name.
    pub async fn block_file(&self, path: &Path) -> Result<BlockedFile> {
        let mut file = tokio::fs::File::open(path).await?;
        let meta = FileMeta {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            content_type: None,
        };
        self.block_stream(&mut file, meta).await
    }

    async fn store_new_chunk(&self, hash: &str, data: &[u8]) -> Result<String> {
        let mut payload = if self.config.use_compression {
            compress(data, self.config.compression)?
        } else {
            data.to_vec()
        };
        if self.config.use_encryption {
            let cipher = self.cipher.as_ref().ok_or(BlockerError::MissingKey)?;
            payload = cipher.encrypt(&payload).await?;
        }
        let key = if self.config.random_storage_keys {
            random_storage_key()
        } else {
            hash.to_string()
        };
        self.chunks.save_chunk(&key, &payload).await?;
        Ok(key)
    }

    /// Charge one reference per manifest entry, hash by hash under its lock.
    /// Each successful charge is appended to `charged`.
    async fn commit_references<R>(
        &self,
        source: &mut R,
        blocks: &[FileBlock],
        mut pending: HashMap<String, PendingChunk>,
        buf: &mut [u8],
        charged: &mut Vec<(String, u64)>,
    ) -> Result<()>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        for block in blocks {
            let Some(chunk) = pending.remove(&block.hash) else {
                continue;
            };
            let hash = &block.hash;
            let _guard = self.locks.lock(hash).await;
            let now = Utc::now();

            match self.block_infos.get_block_info(hash).await {
                Ok(mut info) => {
                    if let Some(key) = chunk.stored_key.filter(|k| *k != info.storage_key) {
                        // Another writer committed the same chunk first.
                        debug!(%hash, %key, "discarding duplicate chunk copy");
                        tolerate_missing(self.chunks.delete_chunk(&key).await)?;
                    }
                    info.ref_count += chunk.occurrences;
                    info.last_used = now;
                    self.block_infos.save_block_info(&info).await?;
                }
                Err(BlockerError::BlockInfoNotFound(_)) => {
                    let still_stored = match chunk.stored_key {
                        Some(key) => self.chunks.chunk_exists(&key).await?.then_some(key),
                        None => None,
                    };
                    let key = match still_stored {
                        Some(key) => key,
                        None => {
                            warn!(%hash, "chunk vanished before commit, storing it again");
                            self.restore_chunk(source, chunk.first_position, hash, buf)
                                .await?
                        }
                    };
                    let info = BlockInfo::new(hash.clone(), key, chunk.occurrences, now);
                    self.block_infos.save_block_info(&info).await?;
                }
                Err(e) => return Err(e),
            }
            charged.push((hash.clone(), chunk.occurrences));
        }
        Ok(())
    }

    /// Re-read the chunk at `position` from the source and store it again.
    async fn restore_chunk<R>(
        &self,
        source: &mut R,
        position: u32,
        hash: &str,
        buf: &mut [u8],
    ) -> Result<String>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let offset = u64::from(position - 1) * self.config.chunk_size as u64;
        source.seek(SeekFrom::Start(offset)).await?;
        let n = read_full(source, buf).await?;
        let data = &buf[..n];
        if content_hash(data).to_hex() != hash {
            return Err(BlockerError::InvalidInput(
                "source changed while it was being blocked".into(),
            ));
        }
        self.store_new_chunk(hash, data).await
    }

    // ---- read path ----

    /// Fetch a manifest without reconstructing the file.
    pub async fn get_blocked_file(&self, id: &str) -> Result<BlockedFile> {
        let file = self.manifests.get_blocked_file(id).await?;
        if !file.is_contiguous() {
            error!(%id, "manifest block list has gaps");
            return Err(BlockerError::InvalidInput(format!(
                "manifest {id} has a non-contiguous block list"
            )));
        }
        Ok(file)
    }

    async fn fetch_chunk(&self, block: &FileBlock) -> Result<Bytes> {
        let info = match self.block_infos.get_block_info(&block.hash).await {
            Ok(info) => info,
            Err(e @ BlockerError::BlockInfoNotFound(_)) => {
                error!(hash = %block.hash, position = block.position, "manifest references a chunk without block info");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let payload = self.chunks.get_chunk(&info.storage_key).await?;
        let decrypted = if self.config.use_encryption {
            let cipher = self.cipher.as_ref().ok_or(BlockerError::MissingKey)?;
            cipher.decrypt(&payload).await?
        } else {
            payload.to_vec()
        };
        let plain = if self.config.use_compression {
            decompress(&decrypted, self.config.compression)?
        } else {
            decrypted
        };

        let actual = content_hash(&plain).to_hex();
        if actual != block.hash {
            error!(hash = %block.hash, %actual, "chunk failed integrity check");
            return Err(BlockerError::Integrity {
                hash: block.hash.clone(),
                actual,
            });
        }

        self.touch(&block.hash).await;
        debug!(hash = %block.hash, position = block.position, bytes = plain.len(), "fetched chunk");
        Ok(Bytes::from(plain))
    }

    /// Bump last-used. A failure here does not fail the read.
    async fn touch(&self, hash: &str) {
        let _guard = self.locks.lock(hash).await;
        let result: Result<()> = async {
            let mut info = self.block_infos.get_block_info(hash).await?;
            info.last_used = Utc::now();
            self.block_infos.save_block_info(&info).await
        }
        .await;
        if let Err(e) = result {
            warn!(%hash, error = %e, "could not update last-used time");
        }
    }

    /// Write the reconstructed file to `writer`, one chunk at a time.
    #[instrument(skip(self, writer))]
    pub async fn unblock_to_writer<W>(&self, id: &str, writer: &mut W) -> Result<BlockedFile>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let file = self.get_blocked_file(id).await?;
        self.write_blocks(&file, writer).await?;
        info!(%id, length = file.length, "unblocked file");
        Ok(file)
    }

    async fn write_blocks<W>(&self, file: &BlockedFile, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        for block in &file.blocks {
            let data = self.fetch_chunk(block).await?;
            writer.write_all(&data).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Reconstruct the whole file in memory.
    pub async fn unblock_to_vec(&self, id: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.unblock_to_writer(id, &mut out).await?;
        Ok(out)
    }

    /// Reconstruct the file into `target`.
    ///
    /// Chunks are written to a hidden sibling of `target` that is renamed over
    /// it only once every chunk has been verified, so a failed reconstruction
    /// leaves an existing `target` untouched.
    #[instrument(skip(self))]
    pub async fn unblock_file(&self, id: &str, target: &Path) -> Result<BlockedFile> {
        let file = self.get_blocked_file(id).await?;
        let staging = staging_path(target)?;
        let written: Result<()> = async {
            let out = tokio::fs::File::create(&staging).await?;
            let mut writer = tokio::io::BufWriter::new(out);
            self.write_blocks(&file, &mut writer).await?;
            writer.into_inner().sync_all().await?;
            tokio::fs::rename(&staging, target).await?;
            Ok(())
        }
        .await;

        match written {
            Ok(()) => {
                info!(%id, length = file.length, target = %target.display(), "unblocked file");
                Ok(file)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                    debug!(path = %staging.display(), error = %cleanup, "no staging file to remove");
                }
                Err(e)
            }
        }
    }

    /// Load the manifest, then yield the file's chunks in order as they are fetched.
    pub async fn unblock_stream(
        &self,
        id: &str,
    ) -> Result<(BlockedFile, BoxStream<'static, Result<Bytes>>)> {
        let file = self.get_blocked_file(id).await?;
        let engine = self.clone();
        let chunks = stream::iter(file.blocks.clone())
            .then(move |block| {
                let engine = engine.clone();
                async move { engine.fetch_chunk(&block).await }
            })
            .boxed();
        Ok((file, chunks))
    }

    // ---- delete / copy ----

    /// Delete manifest `id`, releasing one reference per block entry. Chunks
    /// whose count reaches zero are removed together with their BlockInfo.
    #[instrument(skip(self))]
    pub async fn delete_blocked_file(&self, id: &str) -> Result<()> {
        let file = self.manifests.get_blocked_file(id).await?;
        for (hash, count) in reference_counts(&file.blocks) {
            self.release(hash, count).await?;
        }
        self.manifests.delete_blocked_file(id).await?;
        info!(%id, chunks = file.blocks.len(), "deleted blocked file");
        Ok(())
    }

    async fn release(&self, hash: &str, count: u64) -> Result<()> {
        let _guard = self.locks.lock(hash).await;
        let mut info = match self.block_infos.get_block_info(hash).await {
            Ok(info) => info,
            Err(BlockerError::BlockInfoNotFound(_)) => {
                warn!(%hash, "no block info to release");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if info.ref_count > count {
            info.ref_count -= count;
            return self.block_infos.save_block_info(&info).await;
        }

        tolerate_missing(self.chunks.delete_chunk(&info.storage_key).await)?;
        tolerate_missing(self.block_infos.delete_block_info(hash).await)?;
        if let Some(cipher) = &self.cipher {
            cipher.forget(hash).await?;
        }
        debug!(%hash, "removed unreferenced chunk");
        Ok(())
    }

    /// Undo charges recorded by a failed or abandoned write.
    async fn release_charges(&self, charged: &[(String, u64)]) {
        for (hash, count) in charged {
            if let Err(e) = self.release(hash, *count).await {
                error!(%hash, count, error = %e, "could not release references of a failed write");
            }
        }
    }

    /// Duplicate manifest `id` under a new ID without copying chunk data.
    #[instrument(skip(self))]
    pub async fn copy_blocked_file(&self, id: &str) -> Result<BlockedFile> {
        let source = self.get_blocked_file(id).await?;
        let mut charges = ChargeGuard::new(self);
        let saved = match self.charge_copy(id, &source, &mut charges.charged).await {
            Ok(()) => {
                let copy = BlockedFile {
                    id: uuid::Uuid::new_v4().to_string(),
                    created: Utc::now(),
                    ..source
                };
                let result = self.manifests.save_blocked_file(&copy).await;
                result.map(|()| copy)
            }
            Err(e) => Err(e),
        };

        match saved {
            Ok(copy) => {
                charges.disarm();
                info!(source = %id, copy = %copy.id, "copied blocked file");
                Ok(copy)
            }
            Err(e) => {
                warn!(source = %id, error = %e, "copy failed, releasing charged references");
                charges.rollback().await;
                Err(e)
            }
        }
    }

    async fn charge_copy(
        &self,
        id: &str,
        source: &BlockedFile,
        charged: &mut Vec<(String, u64)>,
    ) -> Result<()> {
        for (hash, count) in reference_counts(&source.blocks) {
            let _guard = self.locks.lock(hash).await;
            let mut info = match self.block_infos.get_block_info(hash).await {
                Ok(info) => info,
                Err(e @ BlockerError::BlockInfoNotFound(_)) => {
                    error!(%hash, %id, "manifest references a chunk without block info");
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            info.ref_count += count;
            info.last_used = Utc::now();
            self.block_infos.save_block_info(&info).await?;
            charged.push((hash.to_string(), count));
        }
        Ok(())
    }
}

/// References per distinct hash, in first-occurrence order.
fn reference_counts(blocks: &[FileBlock]) -> Vec<(&str, u64)> {
    let mut order: Vec<(&str, u64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for block in blocks {
        match index.get(block.hash.as_str()) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(block.hash.as_str(), order.len());
                order.push((block.hash.as_str(), 1));
            }
        }
    }
    order
}

fn tolerate_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "already gone");
            Ok(())
        }
        other => other,
    }
}

/// Hidden, uniquely named path next to `target`.
fn staging_path(target: &Path) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        BlockerError::InvalidInput(format!("{} does not name a file", target.display()))
    })?;
    let staging = format!(
        ".{}.{}.part",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(target.with_file_name(staging))
}

/// Hex of 32 CSPRNG bytes.
fn random_storage_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Fill `buf` unless the reader hits end-of-stream first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
