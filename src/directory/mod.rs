//! Directory (table of contents): fixed-size entry records followed by the
//! block-size table shared by every entry.
//!
//! # Record layout
//! ```text
//! id (u32) | start block (u32) | uncompressed length (u64) | offset (u64) | zero padding
//! ```
//! Only the first 24 bytes carry data; records are padded to the header's
//! `record_size`.  Record 0 is always the manifest.
//!
//! # Block-size table
//! One slot per block in the archive, [`BlockWidth`] bytes each.  A stored 0
//! means "full raw block of exactly `block_size` bytes".

mod width;

pub use width::BlockWidth;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::crypto::{decrypt_directory, encrypt_directory};
use crate::error::{FormatError, IntegrityError, Result};
use crate::header::{Header, HEADER_SIZE};

/// Meaningful bytes at the front of every entry record.
pub const RECORD_DATA_LEN: usize = 24;

// ── EntryKind ────────────────────────────────────────────────────────────────

/// What a directory position holds.  `Data(i)` is the `i`-th public entry,
/// stored at directory position `i + 1` with on-disk id `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Manifest,
    Data(usize),
}

impl EntryKind {
    pub fn at_position(position: usize) -> Self {
        match position {
            0 => EntryKind::Manifest,
            n => EntryKind::Data(n - 1),
        }
    }

    pub fn position(self) -> usize {
        match self {
            EntryKind::Manifest => 0,
            EntryKind::Data(i)  => i + 1,
        }
    }

    pub fn id(self) -> u32 {
        self.position() as u32
    }
}

// ── EntryRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub id:               u32,
    pub start_block:      u32,
    pub uncompressed_len: u64,
    /// Absolute byte offset of the entry's first block.
    pub offset:           u64,
}

impl EntryRecord {
    /// Number of table slots this entry occupies.
    pub fn block_count(&self, block_size: u32) -> u64 {
        self.uncompressed_len.div_ceil(u64::from(block_size))
    }

    fn write<W: Write>(&self, mut writer: W, record_size: usize) -> Result<()> {
        writer.write_u32::<BigEndian>(self.id)?;
        writer.write_u32::<BigEndian>(self.start_block)?;
        writer.write_u64::<BigEndian>(self.uncompressed_len)?;
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_all(&vec![0u8; record_size - RECORD_DATA_LEN])?;
        Ok(())
    }

    fn read<R: Read>(mut reader: R) -> Result<Self> {
        Ok(Self {
            id:               reader.read_u32::<BigEndian>()?,
            start_block:      reader.read_u32::<BigEndian>()?,
            uncompressed_len: reader.read_u64::<BigEndian>()?,
            offset:           reader.read_u64::<BigEndian>()?,
        })
    }
}

// ── BlockTable ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTable(pub Vec<u32>);

impl BlockTable {
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Slots `start..start + count`.
    pub fn run(&self, start: u32, count: u64) -> &[u32] {
        let start = start as usize;
        &self.0[start..start + count as usize]
    }

    /// Bytes a stored size occupies on disk.
    #[inline]
    pub fn stored_len(stored: u32, block_size: u32) -> u64 {
        if stored == 0 { u64::from(block_size) } else { u64::from(stored) }
    }

    fn decode(bytes: &[u8], width: BlockWidth) -> Result<Self> {
        if bytes.len() % width.bytes() != 0 {
            return Err(FormatError::RaggedBlockTable { len: bytes.len(), width: width.bytes() }.into());
        }
        let mut reader = bytes;
        let mut sizes = Vec::with_capacity(bytes.len() / width.bytes());
        while !reader.is_empty() {
            sizes.push(width.read(&mut reader)?);
        }
        Ok(Self(sizes))
    }

    fn encode<W: Write>(&self, mut writer: W, width: BlockWidth) -> Result<()> {
        for &size in &self.0 {
            width.write(&mut writer, size)?;
        }
        Ok(())
    }
}

// ── Layout ───────────────────────────────────────────────────────────────────

/// Size bookkeeping of one packed entry, input to [`Directory::layout`].
#[derive(Debug, Clone, Copy)]
pub struct PackedSizes<'a> {
    pub uncompressed_len: u64,
    pub block_sizes:      &'a [u32],
    pub payload_len:      u64,
}

// ── Directory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    /// Every record, manifest first.
    pub records: Vec<EntryRecord>,
    pub blocks:  BlockTable,
}

impl Directory {
    /// Read and (if flagged) decrypt the directory that follows `header`.
    pub fn read<R: Read>(reader: R, header: &Header) -> Result<Self> {
        let expected = header.directory_body_len();
        let mut body = Vec::new();
        reader.take(expected as u64).read_to_end(&mut body)?;
        if body.len() != expected {
            return Err(IntegrityError::DirectorySizeMismatch {
                expected: expected as u64,
                actual:   body.len() as u64,
            }
            .into());
        }
        if header.is_encrypted() {
            decrypt_directory(&mut body);
        }

        let record_size = header.record_size as usize;
        let records_len = header.entry_count as usize * record_size;
        let records = body[..records_len]
            .chunks_exact(record_size)
            .map(EntryRecord::read)
            .collect::<Result<Vec<_>>>()?;
        let blocks = BlockTable::decode(&body[records_len..], header.block_width()?)?;

        let dir = Self { records, blocks };
        dir.validate(header.block_size)?;
        Ok(dir)
    }

    /// Every record's block run must lie inside the block table.
    fn validate(&self, block_size: u32) -> Result<()> {
        for record in &self.records {
            let start = u64::from(record.start_block);
            let end = start + record.block_count(block_size);
            if end > self.blocks.len() as u64 {
                return Err(FormatError::BlockRunOutOfRange {
                    id: record.id,
                    start,
                    end,
                    table_len: self.blocks.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Every record's stored blocks must end within a stream of
    /// `stream_len` bytes.
    pub fn check_extents(&self, block_size: u32, stream_len: u64) -> Result<()> {
        for record in &self.records {
            let stored: u64 = self
                .blocks
                .run(record.start_block, record.block_count(block_size))
                .iter()
                .map(|&s| BlockTable::stored_len(s, block_size))
                .sum();
            match record.offset.checked_add(stored) {
                Some(end) if end <= stream_len => {}
                end => {
                    return Err(IntegrityError::EntryPastEnd {
                        id: record.id,
                        end: end.unwrap_or(u64::MAX),
                        stream_len,
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Encode records and block table, encrypting the region when the header
    /// says so.  Returns the bytes that follow the header.
    pub fn encode(&self, header: &Header) -> Result<Vec<u8>> {
        let width = header.block_width()?;
        let mut body = Vec::with_capacity(header.directory_body_len());
        for record in &self.records {
            record.write(&mut body, header.record_size as usize)?;
        }
        self.blocks.encode(&mut body, width)?;
        if header.is_encrypted() {
            encrypt_directory(&mut body);
        }
        Ok(body)
    }

    /// Lay out packed entries (manifest first) back to back after the
    /// directory.  A pure fold: the block table and relative offsets are
    /// threaded through as the accumulator, then shifted by the final
    /// directory length.
    pub fn layout<'a, I>(entries: I, block_size: u32, encrypted: bool) -> Result<(Header, Self)>
    where
        I: IntoIterator<Item = PackedSizes<'a>>,
    {
        let mut header = Header::new(block_size, encrypted);
        let width = header.block_width()?;

        let (table, placed, _) = entries.into_iter().enumerate().try_fold(
            (Vec::new(), Vec::new(), 0u64),
            |(mut table, mut placed, data_offset), (position, entry)| {
                let start_block = u32::try_from(table.len())
                    .map_err(|_| FormatError::FieldOverflow("start block index"))?;
                table.extend_from_slice(entry.block_sizes);
                placed.push(EntryRecord {
                    id:               EntryKind::at_position(position).id(),
                    start_block,
                    uncompressed_len: entry.uncompressed_len,
                    offset:           data_offset,
                });
                Ok::<_, FormatError>((table, placed, data_offset + entry.payload_len))
            },
        )?;

        let directory_len = HEADER_SIZE
            + placed.len() * header.record_size as usize
            + table.len() * width.bytes();
        header.directory_len = u32::try_from(directory_len)
            .map_err(|_| FormatError::FieldOverflow("directory length"))?;
        header.entry_count = u32::try_from(placed.len())
            .map_err(|_| FormatError::FieldOverflow("entry count"))?;

        let records = placed
            .into_iter()
            .map(|r| EntryRecord { offset: r.offset + directory_len as u64, ..r })
            .collect();
        Ok((header, Self { records, blocks: BlockTable(table) }))
    }
}
