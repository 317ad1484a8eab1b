pub mod error;
pub mod header;
pub mod codec;
pub mod crypto;
pub mod directory;
pub mod block;
pub mod entry;
pub mod perf;
pub mod archive;

pub use error::{FormatError, IntegrityError, PsarcError, Result};
pub use header::Header;
pub use directory::{BlockWidth, Directory, EntryKind, EntryRecord};
pub use entry::{EntryData, NamedEntry, Staging};
pub use archive::{edit_path, pack_directory, Archive, ArchiveStream, EditOptions, EntryInfo};
