use clap::{Parser, Subcommand};
use psarc::archive::{edit_path, pack_directory, Archive, EditOptions};
use psarc::entry::{NamedEntry, Staging};
use psarc::header::HEADER_SIZE;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "psarc", about = "PSARC archive container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct EditArgs {
    /// Encrypt the rewritten directory
    #[arg(short, long)]
    encrypt: bool,
    /// Stage entry payloads in temporary files instead of memory
    #[arg(long)]
    temp_files: bool,
    /// Block size in bytes (power of 256)
    #[arg(long, default_value = "65536")]
    block_size: u32,
}

impl EditArgs {
    fn options(&self) -> EditOptions {
        EditOptions::default()
            .with_encryption(self.encrypt)
            .with_block_size(self.block_size)
            .with_staging(if self.temp_files { Staging::TempFile } else { Staging::Memory })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory tree into a new archive
    Pack {
        source: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Extract every entry of an archive
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List archive contents
    List {
        input: PathBuf,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show archive header fields
    Info {
        input: PathBuf,
    },
    /// Add or replace entries from files on disk
    Add {
        archive: PathBuf,
        /// Entry name (path inside the archive) for each file, in order
        #[arg(short, long, required = true, num_args = 1..)]
        name: Vec<String>,
        #[arg(short, long, required = true, num_args = 1..)]
        file: Vec<PathBuf>,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Remove entries by name
    Remove {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
        #[command(flatten)]
        edit: EditArgs,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { source, output, edit } => {
            let count = pack_directory(&source, &output, &edit.options())?;
            println!("Created: {} ({} entries)", output.display(), count);
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let mut ar = Archive::open_path(&input)?;
            ar.extract_all(&output_dir)?;
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let ar = Archive::open_path(&input)?;
            let entries = ar.entries();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }
            println!("Archive: {}", input.display());
            println!("{:<48} {:>12} {:>12} {:>7}", "Name", "Size", "Compressed", "Blocks");
            for info in entries {
                println!("{:<48} {:>12} {:>12} {:>7}",
                    info.name, info.size, info.compressed_size, info.blocks);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let ar = Archive::open_path(&input)?;
            let h  = ar.header();

            println!("── PSARC Archive ────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Format version {}.{}", h.major(), h.minor());
            println!("  Header size    {} B", HEADER_SIZE);
            println!("  Directory size {} B", h.directory_len);
            println!("  Record size    {} B", h.record_size);
            println!("  Block size     {} B", h.block_size);
            println!("  Encrypted      {}", h.is_encrypted());
            println!("  Entries        {}", ar.len());
            println!("  Manifest size  {} B", ar.manifest_len());
        }

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { archive, name, file, edit } => {
            if name.len() != file.len() {
                return Err("--name and --file must be given the same number of times".into());
            }
            let options = edit.options();
            let staging = options.staging;
            edit_path(&archive, &options, |entries| {
                for (name, path) in name.into_iter().zip(file) {
                    let data = std::fs::read(&path)?;
                    let entry = NamedEntry::from_bytes(name, staging, &data)?;
                    match entries.iter_mut().find(|e| e.name == entry.name) {
                        Some(existing) => *existing = entry,
                        None           => entries.push(entry),
                    }
                    println!("  added   {}", path.display());
                }
                Ok(())
            })?;
        }

        // ── Remove ───────────────────────────────────────────────────────────
        Commands::Remove { archive, names, edit } => {
            edit_path(&archive, &edit.options(), |entries| {
                let before = entries.len();
                entries.retain(|e| !names.contains(&e.name));
                println!("  removed {} entries", before - entries.len());
                Ok(())
            })?;
        }
    }

    Ok(())
}
