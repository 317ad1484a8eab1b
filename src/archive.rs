//! Random-access [`Archive`] over any seekable, truncatable stream.
//!
//! ```no_run
//! use psarc::archive::{Archive, EditOptions};
//! use psarc::entry::{NamedEntry, Staging};
//!
//! // Pack a directory tree
//! psarc::archive::pack_directory("song_dir", "song.psarc", &EditOptions::default())?;
//!
//! // Read
//! let mut ar = Archive::open_path("song.psarc")?;
//! for info in ar.entries() {
//!     println!("{} {}", info.name, info.size);
//! }
//! ar.extract_all("out")?;
//!
//! // Edit: add one entry, drop another
//! psarc::archive::edit_path("song.psarc", &EditOptions::default(), |entries| {
//!     entries.retain(|e| e.name != "old.txt");
//!     entries.push(NamedEntry::from_bytes("new.txt", Staging::Memory, b"hi")?);
//!     Ok(())
//! })?;
//! # Ok::<(), psarc::PsarcError>(())
//! ```
//!
//! # Edit transactions
//! An edit decodes every entry into a staged sink, hands the ordered list to
//! the caller's transform, rebuilds the manifest, compresses all entries in
//! parallel and assembles the complete new image in a staging sink.  The
//! backing stream is only touched once the image is complete, then it is
//! overwritten and truncated.  An I/O failure during that final copy leaves
//! the stream undefined; [`edit_path`] avoids this by persisting the image
//! through a temporary file and an atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::block::{compressed_len, decode_entry, encode_entry, is_literal, CompressedEntry, DEFAULT_RAW_SUFFIXES};
use crate::directory::{BlockTable, BlockWidth, Directory, EntryKind, EntryRecord, PackedSizes};
use crate::entry::{validate_name, EntryData, NamedEntry, Staging};
use crate::error::{FormatError, IntegrityError, PsarcError, Result};
use crate::header::{Header, DEFAULT_BLOCK_SIZE, HEADER_SIZE};
use crate::perf::map_entries;

/// Compressed bytes read ahead before a parallel extraction batch runs.
const EXTRACT_BATCH_BYTES: u64 = 64 * 1024 * 1024;

const MANIFEST_LABEL: &str = "<manifest>";

// ── ArchiveStream ─────────────────────────────────────────────────────────────

/// A seekable backing stream that can also be truncated.
pub trait ArchiveStream: Read + Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl ArchiveStream for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl ArchiveStream for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        Ok(())
    }
}

impl<T: ArchiveStream + ?Sized> ArchiveStream for &mut T {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

// ── EditOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`Archive::edit`], [`Archive::create`] and
/// [`pack_directory`].
#[derive(Debug, Clone)]
pub struct EditOptions {
    /// Where entry payloads are staged while the archive is rebuilt.
    pub staging:      Staging,
    /// Encrypt the rewritten directory.
    pub encrypt:      bool,
    /// Block size; must be a power of 256.
    pub block_size:   u32,
    /// Entries whose names end with one of these are never deflated.
    pub raw_suffixes: Vec<String>,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            staging:      Staging::Memory,
            encrypt:      false,
            block_size:   DEFAULT_BLOCK_SIZE,
            raw_suffixes: DEFAULT_RAW_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EditOptions {
    pub fn with_staging(mut self, staging: Staging) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }
}

// ── EntryInfo ─────────────────────────────────────────────────────────────────

/// Lightweight descriptor returned by [`Archive::entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub name:            String,
    pub size:            u64,
    pub compressed_size: u64,
    pub blocks:          u64,
    pub offset:          u64,
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    name:   String,
    record: EntryRecord,
}

/// Everything materialized from the header and directory.  Replaced as a
/// unit by a committed edit.
#[derive(Debug, Clone)]
struct State {
    header:   Header,
    manifest: EntryRecord,
    entries:  Vec<Entry>,
    blocks:   BlockTable,
}

impl State {
    fn empty(options: &EditOptions) -> Self {
        Self {
            header:   Header::new(options.block_size, options.encrypt),
            manifest: EntryRecord {
                id:               EntryKind::Manifest.id(),
                start_block:      0,
                uncompressed_len: 0,
                offset:           HEADER_SIZE as u64,
            },
            entries:  Vec::new(),
            blocks:   BlockTable::default(),
        }
    }

    /// Split record 0 off as the manifest and pair the rest with `names`.
    fn assemble(header: Header, directory: Directory, names: Vec<String>) -> Result<Self> {
        let (manifest, records) = split_manifest(directory.records)?;
        if names.len() != records.len() {
            return Err(FormatError::EntryCountMismatch { names: names.len(), entries: records.len() }.into());
        }
        let entries = names
            .into_iter()
            .zip(records)
            .map(|(name, record)| Entry { name, record })
            .collect();
        Ok(Self { header, manifest, entries, blocks: directory.blocks })
    }
}

fn split_manifest(records: Vec<EntryRecord>) -> Result<(EntryRecord, Vec<EntryRecord>)> {
    let mut manifest = None;
    let mut data = Vec::with_capacity(records.len().saturating_sub(1));
    for (position, record) in records.into_iter().enumerate() {
        match EntryKind::at_position(position) {
            EntryKind::Manifest => manifest = Some(record),
            EntryKind::Data(_)  => data.push(record),
        }
    }
    let manifest = manifest.ok_or(FormatError::MissingManifest)?;
    Ok((manifest, data))
}

fn parse_manifest(bytes: Vec<u8>) -> Result<Vec<String>> {
    let text = String::from_utf8(bytes).map_err(|_| FormatError::ManifestNotUtf8)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(text.split('\n').map(str::to_owned).collect())
}

/// A fully built archive image, not yet written anywhere.
struct Staged {
    state: State,
    image: EntryData,
}

// ── Archive ───────────────────────────────────────────────────────────────────

pub struct Archive<S: ArchiveStream> {
    stream: S,
    state:  State,
}

impl Archive<File> {
    /// Open an archive file read-only.  Edits on the result fail; use
    /// [`Archive::open_path_writable`] or [`edit_path`] instead.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(File::open(path)?)
    }

    pub fn open_path_writable<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(OpenOptions::new().read(true).write(true).open(path)?)
    }
}

impl<S: ArchiveStream> Archive<S> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Parse header, directory and manifest.  Any structural inconsistency
    /// fails the open; no partial archive is returned.
    pub fn open(mut stream: S) -> Result<Self> {
        stream.rewind()?;
        let (header, directory) = {
            let mut reader = BufReader::new(&mut stream);
            let header = Header::read(&mut reader)?;
            let directory = Directory::read(&mut reader, &header)?;
            (header, directory)
        };
        let stream_len = stream.seek(SeekFrom::End(0))?;
        directory.check_extents(header.block_size, stream_len)?;

        let manifest = directory.records.first().cloned().ok_or(FormatError::MissingManifest)?;
        let mut bytes = Vec::new();
        stream.seek(SeekFrom::Start(manifest.offset))?;
        decode_entry(
            BufReader::new(&mut stream),
            &mut bytes,
            MANIFEST_LABEL,
            &manifest,
            &directory.blocks,
            header.block_size,
        )?;
        let names = parse_manifest(bytes)?;

        let state = State::assemble(header, directory, names)?;
        info!(
            "Opened archive: {} entries, block size {}, encrypted directory: {}",
            state.entries.len(),
            state.header.block_size,
            state.header.is_encrypted(),
        );
        Ok(Self { stream, state })
    }

    /// Build a new archive in `stream` from whatever `transform` pushes into
    /// an initially empty entry list.
    pub fn create<F>(stream: S, options: &EditOptions, transform: F) -> Result<Self>
    where
        F: FnOnce(&mut Vec<NamedEntry>) -> Result<()>,
    {
        let mut archive = Self { stream, state: State::empty(options) };
        archive.edit(options, transform)?;
        Ok(archive)
    }

    /// Write a zero-entry archive (manifest only) into `stream`.
    pub fn create_empty(stream: S, options: &EditOptions) -> Result<Self> {
        Self::create(stream, options, |_| Ok(()))
    }

    /// Release the backing stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn header(&self) -> &Header { &self.state.header }
    pub fn len(&self) -> usize { self.state.entries.len() }
    pub fn is_empty(&self) -> bool { self.state.entries.is_empty() }
    pub fn manifest_len(&self) -> u64 { self.state.manifest.uncompressed_len }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.state.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        let block_size = self.state.header.block_size;
        self.state
            .entries
            .iter()
            .map(|e| EntryInfo {
                name:            e.name.clone(),
                size:            e.record.uncompressed_len,
                compressed_size: compressed_len(&e.record, &self.state.blocks, block_size),
                blocks:          e.record.block_count(block_size),
                offset:          e.record.offset,
            })
            .collect()
    }

    pub fn stat(&self, name: &str) -> Option<EntryInfo> {
        self.entries().into_iter().find(|e| e.name == name)
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    fn position(&self, name: &str) -> Result<usize> {
        self.state
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PsarcError::NotFound(name.to_owned()))
    }

    fn decode_at<W: Write>(&mut self, index: usize, out: W) -> Result<u64> {
        let entry = &self.state.entries[index];
        self.stream.seek(SeekFrom::Start(entry.record.offset))?;
        decode_entry(
            BufReader::new(&mut self.stream),
            out,
            &entry.name,
            &entry.record,
            &self.state.blocks,
            self.state.header.block_size,
        )
    }

    /// Stream one entry's decoded bytes into `out`.
    pub fn read_entry_to<W: Write>(&mut self, name: &str, out: W) -> Result<u64> {
        let index = self.position(name)?;
        self.decode_at(index, out)
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_entry_to(name, &mut out)?;
        Ok(out)
    }

    /// Extract every entry to `dest/name`, creating intermediate directories.
    ///
    /// Compressed spans are read sequentially in batches; decoding and file
    /// writes within a batch run in parallel.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let block_size = self.state.header.block_size;

        let mut batch = Vec::new();
        let mut batch_bytes = 0u64;
        for index in 0..self.state.entries.len() {
            let entry = &self.state.entries[index];
            let len = compressed_len(&entry.record, &self.state.blocks, block_size);
            self.stream.seek(SeekFrom::Start(entry.record.offset))?;
            let mut raw = Vec::new();
            (&mut self.stream).take(len).read_to_end(&mut raw)?;
            if (raw.len() as u64) < len {
                return Err(IntegrityError::TruncatedEntry { name: entry.name.clone() }.into());
            }

            batch_bytes += len;
            batch.push((index, raw));
            if batch_bytes >= EXTRACT_BATCH_BYTES {
                extract_batch(&self.state, dest, std::mem::take(&mut batch))?;
                batch_bytes = 0;
            }
        }
        extract_batch(&self.state, dest, batch)?;

        info!("Extracted {} entries to {}", self.state.entries.len(), dest.display());
        Ok(())
    }

    // ── Edit ─────────────────────────────────────────────────────────────────

    /// Decode every entry into a staged sink, in manifest order.
    fn snapshot(&mut self, staging: Staging) -> Result<Vec<NamedEntry>> {
        (0..self.state.entries.len())
            .map(|index| -> Result<NamedEntry> {
                let mut data = EntryData::new(staging)?;
                self.decode_at(index, &mut data)?;
                data.rewind()?;
                Ok(NamedEntry::new(self.state.entries[index].name.clone(), data))
            })
            .collect()
    }

    fn stage<F>(&mut self, options: &EditOptions, transform: F) -> Result<Staged>
    where
        F: FnOnce(&mut Vec<NamedEntry>) -> Result<()>,
    {
        let mut entries = self.snapshot(options.staging)?;
        transform(&mut entries)?;
        build_image(entries, options)
    }

    /// Rewrite the archive from a transform over its ordered entry list.
    ///
    /// The transform may insert, remove, reorder or replace entries.  All
    /// staged payloads are dropped before this returns, whether the
    /// transform succeeds or not.
    pub fn edit<F>(&mut self, options: &EditOptions, transform: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<NamedEntry>) -> Result<()>,
    {
        let Staged { state, mut image } = self.stage(options, transform)?;

        self.stream.rewind()?;
        let written = io::copy(&mut image, &mut self.stream)?;
        self.stream.set_len(written)?;
        self.stream.flush()?;

        info!("Rewrote archive: {} entries, {} bytes", state.entries.len(), written);
        self.state = state;
        Ok(())
    }
}

// ── Image assembly ────────────────────────────────────────────────────────────

fn build_image(entries: Vec<NamedEntry>, options: &EditOptions) -> Result<Staged> {
    let block_size = options.block_size;
    let staging = options.staging;
    BlockWidth::for_block_size(u64::from(block_size))?;
    for entry in &entries {
        validate_name(&entry.name)?;
    }

    let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    let manifest = EntryData::from_bytes(Staging::Memory, names.join("\n").as_bytes())?;
    let jobs: Vec<(bool, EntryData)> = std::iter::once((false, manifest))
        .chain(entries.into_iter().map(|e| (is_literal(&e.name, &options.raw_suffixes), e.data)))
        .collect();

    let packed: Vec<CompressedEntry> = map_entries(jobs, |(literal, mut data)| {
        data.rewind()?;
        encode_entry(data, literal, block_size, staging)
    })?;

    let (header, directory) = Directory::layout(
        packed.iter().map(|p| PackedSizes {
            uncompressed_len: p.uncompressed_len,
            block_sizes:      &p.block_sizes,
            payload_len:      p.payload_len,
        }),
        block_size,
        options.encrypt,
    )?;
    debug!(
        "Laid out {} records, {} blocks, directory {} bytes",
        directory.records.len(),
        directory.blocks.len(),
        header.directory_len,
    );

    let mut image = EntryData::new(staging)?;
    {
        let mut writer = BufWriter::new(&mut image);
        header.write(&mut writer)?;
        writer.write_all(&directory.encode(&header)?)?;
        for mut p in packed {
            io::copy(&mut p.payload, &mut writer)?;
        }
        writer.flush()?;
    }
    image.rewind()?;

    let state = State::assemble(header, directory, names)?;
    Ok(Staged { state, image })
}

/// Write `image` next to `target` and atomically rename it into place.
fn persist_image(mut image: EntryData, target: &Path) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(target))?;
    io::copy(&mut image, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// ── Extraction ────────────────────────────────────────────────────────────────

/// Map an entry name onto a path below `root`.  Names are opaque strings,
/// but both `/` and `\` are treated as separators here, and names that would
/// escape `root` are refused.
fn entry_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(FormatError::InvalidEntryName(name.to_owned()).into()),
            part => {
                if Path::new(part).components().any(|c| !matches!(c, Component::Normal(_))) {
                    return Err(FormatError::InvalidEntryName(name.to_owned()).into());
                }
                path.push(part);
                pushed = true;
            }
        }
    }
    if !pushed {
        return Err(FormatError::InvalidEntryName(name.to_owned()).into());
    }
    Ok(path)
}

fn extract_batch(state: &State, dest: &Path, batch: Vec<(usize, Vec<u8>)>) -> Result<()> {
    let block_size = state.header.block_size;
    map_entries(batch, |(index, raw)| {
        let entry = &state.entries[index];
        let path = entry_path(dest, &entry.name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&path)?);
        decode_entry(&raw[..], &mut out, &entry.name, &entry.record, &state.blocks, block_size)?;
        out.flush()?;
        debug!("  extracted {}", entry.name);
        Ok(())
    })?;
    Ok(())
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Rewrite the archive at `path` through a temporary file in the same
/// directory, renaming it over the original only once it is complete.
pub fn edit_path<P, F>(path: P, options: &EditOptions, transform: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut Vec<NamedEntry>) -> Result<()>,
{
    let path = path.as_ref();
    let staged = Archive::open_path(path)?.stage(options, transform)?;
    persist_image(staged.image, path)?;
    info!("Rewrote {}: {} entries", path.display(), staged.state.entries.len());
    Ok(())
}

/// Every regular file below `root` as `(name, path)`, names relative to
/// `root` with `/` separators, in sorted walk order.
pub fn collect_files<P: AsRef<Path>>(root: P) -> Result<Vec<(String, PathBuf)>> {
    let root = root.as_ref();
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.into_path()));
    }
    Ok(files)
}

/// Pack every file below `source` into a new archive at `target`.
/// Returns the number of entries written.
pub fn pack_directory<P, Q>(source: P, target: Q, options: &EditOptions) -> Result<usize>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let target = target.as_ref();
    let files = collect_files(source.as_ref())?;
    let staging = options.staging;

    let mut tmp = NamedTempFile::new_in(parent_dir(target))?;
    let count = Archive::create(tmp.as_file_mut(), options, |entries| {
        for (name, path) in files {
            let mut data = EntryData::new(staging)?;
            io::copy(&mut File::open(&path)?, &mut data)?;
            debug!("  staged  {}", name);
            entries.push(NamedEntry::new(name, data));
        }
        Ok(())
    })?
    .len();
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    info!("Packed {} entries into {}", count, target.display());
    Ok(count)
}
