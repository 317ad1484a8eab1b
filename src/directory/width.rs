use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{FormatError, Result};

/// Width of one block-size table slot, derived once from the block size.
///
/// A block size of `256^n` stores each compressed size in `n` bytes; a full
/// raw block is stored as 0, so every stored value fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockWidth {
    Two,
    Three,
    Four,
}

impl BlockWidth {
    pub fn for_block_size(block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(FormatError::BlockSizeNotPowerOf256(block_size).into());
        }
        let mut rest = block_size;
        let mut log = 0u32;
        while rest % 256 == 0 {
            rest /= 256;
            log += 1;
        }
        if rest != 1 {
            return Err(FormatError::BlockSizeNotPowerOf256(block_size).into());
        }
        match log {
            2 => Ok(BlockWidth::Two),
            3 => Ok(BlockWidth::Three),
            4 => Ok(BlockWidth::Four),
            n => Err(FormatError::UnsupportedBlockWidth(n).into()),
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            BlockWidth::Two   => 2,
            BlockWidth::Three => 3,
            BlockWidth::Four  => 4,
        }
    }

    pub fn read<R: Read>(self, mut reader: R) -> io::Result<u32> {
        match self {
            BlockWidth::Two   => reader.read_u16::<BigEndian>().map(u32::from),
            BlockWidth::Three => reader.read_u24::<BigEndian>(),
            BlockWidth::Four  => reader.read_u32::<BigEndian>(),
        }
    }

    /// Largest value one slot can hold.
    #[inline]
    pub fn max_value(self) -> u32 {
        match self {
            BlockWidth::Two   => u32::from(u16::MAX),
            BlockWidth::Three => 0x00FF_FFFF,
            BlockWidth::Four  => u32::MAX,
        }
    }

    /// Values that do not fit the slot are refused rather than truncated.
    pub fn write<W: Write>(self, mut writer: W, value: u32) -> Result<()> {
        if value > self.max_value() {
            return Err(FormatError::FieldOverflow("block size table slot").into());
        }
        match self {
            BlockWidth::Two   => writer.write_u16::<BigEndian>(value as u16)?,
            BlockWidth::Three => writer.write_u24::<BigEndian>(value)?,
            BlockWidth::Four  => writer.write_u32::<BigEndian>(value)?,
        }
        Ok(())
    }
}
