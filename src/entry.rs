//! Edit-time view of an archive: an ordered list of [`NamedEntry`] values.
//!
//! Entry payloads are staged in [`EntryData`] sinks, either in memory or in
//! anonymous temporary files.  Temporary files are unlinked by the OS when
//! the sink is dropped, so every staged payload is released on every exit
//! path of an edit, including entries a transform removed from the list.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{FormatError, Result};

/// Where entry payloads are staged during an edit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Staging {
    #[default]
    Memory,
    TempFile,
}

// ── EntryData ────────────────────────────────────────────────────────────────

/// A readable, writable, seekable byte sink.
#[derive(Debug)]
pub enum EntryData {
    Memory(Cursor<Vec<u8>>),
    TempFile(File),
}

impl EntryData {
    pub fn new(staging: Staging) -> io::Result<Self> {
        Ok(match staging {
            Staging::Memory   => EntryData::Memory(Cursor::new(Vec::new())),
            Staging::TempFile => EntryData::TempFile(tempfile::tempfile()?),
        })
    }

    pub fn from_bytes(staging: Staging, bytes: &[u8]) -> io::Result<Self> {
        let mut data = Self::new(staging)?;
        data.write_all(bytes)?;
        data.rewind()?;
        Ok(data)
    }

    /// Total byte length, independent of the current position.
    pub fn len(&mut self) -> io::Result<u64> {
        match self {
            EntryData::Memory(c)   => Ok(c.get_ref().len() as u64),
            EntryData::TempFile(f) => Ok(f.metadata()?.len()),
        }
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rewind and read the whole payload.
    pub fn to_vec(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Discard the current payload and write `bytes` in its place.
    pub fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            EntryData::Memory(c)   => *c = Cursor::new(bytes.to_vec()),
            EntryData::TempFile(f) => {
                f.set_len(0)?;
                f.rewind()?;
                f.write_all(bytes)?;
                f.rewind()?;
            }
        }
        Ok(())
    }
}

impl Read for EntryData {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryData::Memory(c)   => c.read(buf),
            EntryData::TempFile(f) => f.read(buf),
        }
    }
}

impl Write for EntryData {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EntryData::Memory(c)   => c.write(buf),
            EntryData::TempFile(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EntryData::Memory(c)   => c.flush(),
            EntryData::TempFile(f) => f.flush(),
        }
    }
}

impl Seek for EntryData {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            EntryData::Memory(c)   => c.seek(pos),
            EntryData::TempFile(f) => f.seek(pos),
        }
    }
}

// ── NamedEntry ───────────────────────────────────────────────────────────────

/// One entry as callers see it during an edit.
#[derive(Debug)]
pub struct NamedEntry {
    pub name: String,
    pub data: EntryData,
}

impl NamedEntry {
    pub fn new(name: impl Into<String>, data: EntryData) -> Self {
        Self { name: name.into(), data }
    }

    pub fn from_bytes(name: impl Into<String>, staging: Staging, bytes: &[u8]) -> io::Result<Self> {
        Ok(Self::new(name, EntryData::from_bytes(staging, bytes)?))
    }
}

/// Names are manifest lines, so they must be non-empty and single-line.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\n') || name.contains('\r') {
        return Err(FormatError::InvalidEntryName(name.to_owned()).into());
    }
    Ok(())
}
