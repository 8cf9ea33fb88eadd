//! LZ4 and Zstd compression applied to chunks before encryption

use crate::error::BlockerError;
use serde::{Deserialize, Serialize};

/// Compression algorithm selection.
///
/// Nothing is recorded per chunk: the algorithm in force when a chunk was
/// written must still be in force when it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression (passthrough)
    None,
    /// LZ4 block format with prepended size, fast default
    #[default]
    Lz4,
    /// Zstandard: higher ratio at higher CPU cost
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default)
        level: i32,
    },
}

/// Compress data with the given algorithm. Returns compressed bytes.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, BlockerError> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Zstd { level } => zstd::encode_all(data, level)
            .map_err(|e| BlockerError::CompressionFailed(e.to_string())),
    }
}

/// Decompress data using the algorithm that was used for compression.
pub fn decompress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, BlockerError> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| BlockerError::DecompressionFailed(e.to_string())),
        CompressionAlgorithm::Zstd { .. } => zstd::decode_all(data)
            .map_err(|e| BlockerError::DecompressionFailed(e.to_string())),
    }
}
