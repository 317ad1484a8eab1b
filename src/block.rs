//! Per-entry block (de)compression.
//!
//! An entry is split into `block_size` chunks.  Each chunk is stored either
//! as a standalone zlib stream or verbatim; the block-size table records only
//! the stored length, with 0 standing for a full verbatim block.  Whether a
//! block is compressed is decided per block, so one entry may mix both.

use std::borrow::Cow;
use std::io::{ErrorKind, Read, Seek, Write};

use tracing::debug;

use crate::codec::{compress_block, has_zlib_signature, inflate_block, CodecError};
use crate::directory::{BlockTable, EntryRecord};
use crate::entry::{EntryData, Staging};
use crate::error::{IntegrityError, PsarcError, Result};

/// Name suffixes that are always stored without compression: Wwise audio,
/// compiled note charts and the app-id marker file.
pub const DEFAULT_RAW_SUFFIXES: &[&str] = &[".wem", ".sng", "appid.appid"];

pub fn is_literal<S: AsRef<str>>(name: &str, raw_suffixes: &[S]) -> bool {
    raw_suffixes.iter().any(|s| name.ends_with(s.as_ref()))
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// One entry after compression, ready to be laid out.
#[derive(Debug)]
pub struct CompressedEntry {
    pub uncompressed_len: u64,
    pub block_sizes:      Vec<u32>,
    pub payload:          EntryData,
    pub payload_len:      u64,
}

/// Choose the stored form of one chunk.
///
/// Deflated output is kept only when it is strictly smaller than the chunk,
/// so a full chunk that does not shrink is stored raw under the 0 sentinel.
/// A partial raw chunk that happens to start with the zlib signature keeps
/// its deflated form when that still fits, so readers never mistake it for a
/// stream.
fn encode_chunk<'a>(raw: &'a [u8], literal: bool, block_size: u32) -> Result<(u32, Cow<'a, [u8]>)> {
    let full = raw.len() == block_size as usize;
    if !literal {
        let deflated = compress_block(raw)?;
        let keep = deflated.len() < raw.len()
            || (!full && has_zlib_signature(raw) && deflated.len() < block_size as usize);
        if keep {
            return Ok((deflated.len() as u32, Cow::Owned(deflated)));
        }
    }
    let stored = if full { 0 } else { raw.len() as u32 };
    Ok((stored, Cow::Borrowed(raw)))
}

/// Compress everything `source` yields into a staged payload.
pub fn encode_entry<R: Read>(
    mut source: R,
    literal:    bool,
    block_size: u32,
    staging:    Staging,
) -> Result<CompressedEntry> {
    let mut payload     = EntryData::new(staging)?;
    let mut block_sizes = Vec::new();
    let mut chunk       = vec![0u8; block_size as usize];
    let mut uncompressed_len = 0u64;
    let mut payload_len      = 0u64;

    loop {
        let n = read_full(&mut source, &mut chunk)?;
        if n == 0 {
            break;
        }
        let (stored, bytes) = encode_chunk(&chunk[..n], literal, block_size)?;
        payload.write_all(&bytes)?;
        block_sizes.push(stored);
        uncompressed_len += n as u64;
        payload_len      += bytes.len() as u64;
        if n < chunk.len() {
            break;
        }
    }
    payload.rewind()?;

    Ok(CompressedEntry { uncompressed_len, block_sizes, payload, payload_len })
}

/// `read` until `buf` is full or the source is exhausted.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Bytes an entry's block run occupies in the archive.
pub fn compressed_len(record: &EntryRecord, blocks: &BlockTable, block_size: u32) -> u64 {
    blocks
        .run(record.start_block, record.block_count(block_size))
        .iter()
        .map(|&s| BlockTable::stored_len(s, block_size))
        .sum()
}

fn decode_block(bytes: &[u8], stored: u32, expected: usize) -> Result<Cow<'_, [u8]>> {
    if stored != 0 && has_zlib_signature(bytes) {
        match inflate_block(bytes, expected) {
            Ok(inflated) => return Ok(Cow::Owned(inflated)),
            // A verbatim block that merely starts with the signature.
            Err(e) if bytes.len() == expected => {
                debug!("block does not inflate ({e}), using it verbatim");
            }
            Err(e) => return Err(e.into()),
        }
    }
    if bytes.len() != expected {
        return Err(CodecError::LengthMismatch { expected, actual: bytes.len() }.into());
    }
    Ok(Cow::Borrowed(bytes))
}

/// Decode one entry from `reader`, which must be positioned at the entry's
/// offset, streaming each block into `out` as it is produced.
pub fn decode_entry<R: Read, W: Write>(
    mut reader: R,
    mut out:    W,
    name:       &str,
    record:     &EntryRecord,
    blocks:     &BlockTable,
    block_size: u32,
) -> Result<u64> {
    let run = blocks.run(record.start_block, record.block_count(block_size));
    let mut produced = 0u64;
    let mut buf = Vec::new();

    for &stored in run {
        let expected = (record.uncompressed_len - produced).min(u64::from(block_size)) as usize;
        buf.resize(BlockTable::stored_len(stored, block_size) as usize, 0);
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => IntegrityError::TruncatedEntry { name: name.to_owned() }.into(),
            _ => PsarcError::from(e),
        })?;
        let block = decode_block(&buf, stored, expected)?;
        out.write_all(&block)?;
        produced += block.len() as u64;
    }

    if produced != record.uncompressed_len {
        return Err(IntegrityError::EntryLengthMismatch {
            name:     name.to_owned(),
            expected: record.uncompressed_len,
            actual:   produced,
        }
        .into());
    }
    Ok(produced)
}
