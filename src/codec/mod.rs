//! Block codec: zlib/deflate at best compression.
//!
//! The archive supports exactly one compression scheme.  Every compressed
//! block is a complete zlib stream, so it begins with the two-byte
//! signature `0x78 0xDA`.  The block table carries no per-block codec flag;
//! readers tell compressed blocks from stored ones by that signature alone
//! (see `block.rs`).

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

/// Leading bytes of every zlib stream written at best compression.
pub const ZLIB_SIGNATURE: [u8; 2] = [0x78, 0xDA];

/// Compression tag stored in the archive header.
pub const COMPRESSION_TAG: &[u8; 4] = b"zlib";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Block inflated to {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// True when `data` starts with the zlib signature this archive writes.
#[inline]
pub fn has_zlib_signature(data: &[u8]) -> bool {
    data.len() >= ZLIB_SIGNATURE.len() && data[..2] == ZLIB_SIGNATURE
}

/// Deflate one block into a standalone zlib stream.
pub fn compress_block(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))
}

/// Inflate one block, requiring exactly `expected_len` output bytes.
///
/// Reading stops one byte past `expected_len` so a corrupt stream cannot
/// inflate without bound.
pub fn inflate_block(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(expected_len);
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e: io::Error| CodecError::Decompression(e.to_string()))?;
    if out.len() != expected_len {
        return Err(CodecError::LengthMismatch { expected: expected_len, actual: out.len() });
    }
    Ok(out)
}
