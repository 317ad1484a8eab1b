//! Error taxonomy for the archive engine.
//!
//! Three families are kept apart so callers can tell "this is not a valid
//! archive" from "the file could not be read":
//!
//! | Family            | Meaning                                            |
//! |-------------------|----------------------------------------------------|
//! | [`FormatError`]   | malformed header or directory; open fails          |
//! | [`IntegrityError`]| directory or entry data does not add up            |
//! | `Io`              | the underlying stream failed, surfaced verbatim    |

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, PsarcError>;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic number: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("Unsupported compression method: {0:?}")]
    UnsupportedCompression([u8; 4]),
    #[error("Block size {0} is not a power of 256")]
    BlockSizeNotPowerOf256(u64),
    #[error("Unsupported block-size table width: {0} bytes")]
    UnsupportedBlockWidth(u32),
    #[error("Entry record size {0} is smaller than the {min} meaningful bytes", min = crate::directory::RECORD_DATA_LEN)]
    RecordSizeTooSmall(u32),
    #[error("Directory length {declared} cannot hold the header and {entries} entry records")]
    DirectoryTooShort { declared: u32, entries: u32 },
    #[error("Block-size table of {len} bytes is not a multiple of the {width}-byte width")]
    RaggedBlockTable { len: usize, width: usize },
    #[error("Entry {id} spans blocks {start}..{end} but the table holds {table_len}")]
    BlockRunOutOfRange { id: u32, start: u64, end: u64, table_len: usize },
    #[error("Archive has no manifest entry")]
    MissingManifest,
    #[error("Manifest lists {names} names for {entries} data entries")]
    EntryCountMismatch { names: usize, entries: usize },
    #[error("Manifest is not valid UTF-8")]
    ManifestNotUtf8,
    #[error("Invalid entry name: {0:?}")]
    InvalidEntryName(String),
    #[error("Archive too large for a 32-bit field: {0}")]
    FieldOverflow(&'static str),
}

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Directory is {actual} bytes after decryption, expected {expected}")]
    DirectorySizeMismatch { expected: u64, actual: u64 },
    #[error("Entry {name:?} decoded to {actual} bytes, expected {expected}")]
    EntryLengthMismatch { name: String, expected: u64, actual: u64 },
    #[error("Entry {id} ends at byte {end} but the archive is {stream_len} bytes")]
    EntryPastEnd { id: u32, end: u64, stream_len: u64 },
    #[error("Entry {name:?} is cut short by the end of the archive")]
    TruncatedEntry { name: String },
    #[error("Block codec failure: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Error, Debug)]
pub enum PsarcError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Entry not found: {0}")]
    NotFound(String),
}

impl From<CodecError> for PsarcError {
    fn from(e: CodecError) -> Self {
        PsarcError::Integrity(IntegrityError::Codec(e))
    }
}

impl PsarcError {
    pub fn is_format(&self) -> bool {
        matches!(self, PsarcError::Format(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, PsarcError::Integrity(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, PsarcError::Io(_))
    }
}
