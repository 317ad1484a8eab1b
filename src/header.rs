//! Fixed 32-byte archive preamble.
//!
//! All fields are big-endian:
//!
//! ```text
//!  0  magic "PSAR"
//!  4  format version (major << 16 | minor)
//!  8  compression tag "zlib"
//! 12  total directory length (header included)
//! 16  entry count (manifest included)
//! 20  entry record size
//! 24  block size (power of 256)
//! 28  archive flags
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::codec::COMPRESSION_TAG;
use crate::directory::{BlockWidth, RECORD_DATA_LEN};
use crate::error::{FormatError, Result};

pub const MAGIC: &[u8; 4] = b"PSAR";
pub const VERSION: u32 = 0x0001_0004;
pub const HEADER_SIZE: usize = 32;
/// Record width written by this implementation.
pub const DEFAULT_RECORD_SIZE: u32 = 30;
pub const DEFAULT_BLOCK_SIZE: u32 = 65536;

/// Directory region (records + block table) is AES-CFB encrypted.
pub const FLAG_ENCRYPTED_DIRECTORY: u32 = 1 << 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version:       u32,
    pub directory_len: u32,
    pub entry_count:   u32,
    pub record_size:   u32,
    pub block_size:    u32,
    pub flags:         u32,
}

impl Header {
    pub fn new(block_size: u32, encrypted: bool) -> Self {
        Self {
            version:       VERSION,
            directory_len: HEADER_SIZE as u32,
            entry_count:   0,
            record_size:   DEFAULT_RECORD_SIZE,
            block_size,
            flags:         if encrypted { FLAG_ENCRYPTED_DIRECTORY } else { 0 },
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED_DIRECTORY != 0
    }

    pub fn major(&self) -> u16 { (self.version >> 16) as u16 }
    pub fn minor(&self) -> u16 { self.version as u16 }

    /// Width of one block-size table slot.  Validated at decode time.
    pub fn block_width(&self) -> Result<BlockWidth> {
        BlockWidth::for_block_size(u64::from(self.block_size))
    }

    /// Bytes following the header that belong to the directory.
    pub fn directory_body_len(&self) -> usize {
        self.directory_len as usize - HEADER_SIZE
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<BigEndian>(self.version)?;
        writer.write_all(COMPRESSION_TAG)?;
        writer.write_u32::<BigEndian>(self.directory_len)?;
        writer.write_u32::<BigEndian>(self.entry_count)?;
        writer.write_u32::<BigEndian>(self.record_size)?;
        writer.write_u32::<BigEndian>(self.block_size)?;
        writer.write_u32::<BigEndian>(self.flags)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(FormatError::InvalidMagic(magic).into());
        }
        let version = reader.read_u32::<BigEndian>()?;
        let (major, minor) = ((version >> 16) as u16, version as u16);
        if major != (VERSION >> 16) as u16 {
            return Err(FormatError::UnsupportedVersion { major, minor }.into());
        }
        let mut compression = [0u8; 4];
        reader.read_exact(&mut compression)?;
        if &compression != COMPRESSION_TAG {
            return Err(FormatError::UnsupportedCompression(compression).into());
        }

        let header = Self {
            version,
            directory_len: reader.read_u32::<BigEndian>()?,
            entry_count:   reader.read_u32::<BigEndian>()?,
            record_size:   reader.read_u32::<BigEndian>()?,
            block_size:    reader.read_u32::<BigEndian>()?,
            flags:         reader.read_u32::<BigEndian>()?,
        };

        header.block_width()?;
        if (header.record_size as usize) < RECORD_DATA_LEN {
            return Err(FormatError::RecordSizeTooSmall(header.record_size).into());
        }
        let min_len = HEADER_SIZE as u64 + u64::from(header.entry_count) * u64::from(header.record_size);
        if u64::from(header.directory_len) < min_len {
            return Err(FormatError::DirectoryTooShort {
                declared: header.directory_len,
                entries:  header.entry_count,
            }
            .into());
        }
        Ok(header)
    }
}
