//! LZ4 compression of the shingle block.

use crate::types::error::{FuzzyError, FuzzyResult};

/// Compress raw block bytes with LZ4 (prepend size for decompression).
pub fn compress_block(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress an LZ4 block produced by [`compress_block`].
pub fn decompress_block(data: &[u8]) -> FuzzyResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| FuzzyError::Compression(e.to_string()))
}
