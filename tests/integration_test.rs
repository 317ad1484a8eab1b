use psarc::archive::{pack_directory, Archive, EditOptions};
use psarc::block::decode_entry;
use psarc::codec::ZLIB_SIGNATURE;
use psarc::directory::{BlockTable, Directory, EntryRecord, PackedSizes};
use psarc::entry::{NamedEntry, Staging};
use psarc::error::{FormatError, IntegrityError, PsarcError};
use psarc::header::{Header, HEADER_SIZE};
use std::fs;
use std::io::Cursor;

// ── helpers ──────────────────────────────────────────────────────────────────

fn create(entries: &[(&str, Vec<u8>)], options: &EditOptions) -> Vec<u8> {
    let staging = options.staging;
    let ar = Archive::create(Cursor::new(Vec::new()), options, |list| {
        for (name, data) in entries {
            list.push(NamedEntry::from_bytes(*name, staging, data)?);
        }
        Ok(())
    })
    .unwrap();
    ar.into_inner().into_inner()
}

fn parse(bytes: &[u8]) -> (Header, Directory) {
    let mut reader = bytes;
    let header = Header::read(&mut reader).unwrap();
    let directory = Directory::read(&mut reader, &header).unwrap();
    (header, directory)
}

fn manifest_text(bytes: &[u8]) -> String {
    let (header, dir) = parse(bytes);
    let record = &dir.records[0];
    let mut out = Vec::new();
    decode_entry(&bytes[record.offset as usize..], &mut out, "manifest", record, &dir.blocks, header.block_size)
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Deterministic incompressible bytes.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut x = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn sample_entries() -> Vec<(&'static str, Vec<u8>)> {
    let mut mixed = b"phrase iteration ".repeat(5000);
    mixed.extend(noise(70_000, 3));
    vec![
        ("manifests/songs/song_lead.json", br#"{"Entries":{"lead":{}}}"#.to_vec()),
        ("audio/windows/123456.wem", noise(150_000, 1)),
        ("songs/bin/generic/song_lead.sng", noise(1_000, 2)),
        ("gfxassets/album_art/mixed.bin", mixed),
        ("empty.txt", Vec::new()),
        ("appid.appid", b"248750".to_vec()),
    ]
}

// ── round trip ───────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_all_modes() {
    let entries = sample_entries();
    for staging in [Staging::Memory, Staging::TempFile] {
        for encrypt in [false, true] {
            let options = EditOptions::default().with_staging(staging).with_encryption(encrypt);
            let bytes = create(&entries, &options);

            let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
            assert_eq!(ar.header().is_encrypted(), encrypt);
            assert_eq!(ar.len(), entries.len());
            let names: Vec<&str> = ar.names().collect();
            assert_eq!(names, entries.iter().map(|(n, _)| *n).collect::<Vec<_>>());

            let out = tempfile::tempdir().unwrap();
            ar.extract_all(out.path()).unwrap();
            for (name, data) in &entries {
                assert_eq!(&fs::read(out.path().join(name)).unwrap(), data, "{name}");
                assert_eq!(&ar.read_entry(name).unwrap(), data);
            }
        }
    }
}

#[test]
fn test_identity_edit_is_byte_identical() {
    for encrypt in [false, true] {
        let options = EditOptions::default().with_encryption(encrypt);
        let original = create(&sample_entries(), &options);

        let mut ar = Archive::open(Cursor::new(original.clone())).unwrap();
        ar.edit(&options.clone().with_staging(Staging::TempFile), |_| Ok(())).unwrap();
        assert_eq!(ar.into_inner().into_inner(), original);
    }
}

#[test]
fn test_empty_archive() {
    let ar = Archive::create_empty(Cursor::new(Vec::new()), &EditOptions::default()).unwrap();
    let bytes = ar.into_inner().into_inner();
    let (header, dir) = parse(&bytes);
    assert_eq!(header.entry_count, 1);
    assert_eq!(dir.records[0].uncompressed_len, 0);
    assert!(dir.blocks.is_empty());

    let ar = Archive::open(Cursor::new(bytes)).unwrap();
    assert!(ar.is_empty());
}

// ── block table ──────────────────────────────────────────────────────────────

#[test]
fn test_block_width_follows_block_size() {
    let entries = vec![("a.txt", b"abc".repeat(100)), ("b.wem", noise(10, 9))];
    for (block_size, width) in [(65536u32, 2usize), (1 << 24, 3)] {
        let bytes = create(&entries, &EditOptions::default().with_block_size(block_size));
        let (header, dir) = parse(&bytes);
        assert_eq!(header.block_size, block_size);
        let expected = HEADER_SIZE + 3 * header.record_size as usize + dir.blocks.len() * width;
        assert_eq!(header.directory_len as usize, expected);
    }
}

#[test]
fn test_unsupported_block_width_fails_to_open() {
    let mut bytes = create(&sample_entries(), &EditOptions::default());
    bytes[24..28].copy_from_slice(&256u32.to_be_bytes());
    assert!(matches!(
        Archive::open(Cursor::new(bytes)),
        Err(PsarcError::Format(FormatError::UnsupportedBlockWidth(1)))
    ));

    let options = EditOptions::default().with_block_size(256);
    let err = Archive::create_empty(Cursor::new(Vec::new()), &options).err().unwrap();
    assert!(err.is_format());
}

#[test]
fn test_full_raw_block_uses_zero_sentinel() {
    let full = noise(65536, 5);
    let bytes = create(&[("full.wem", full.clone())], &EditOptions::default());
    let (_, dir) = parse(&bytes);
    let record = &dir.records[1];
    assert_eq!(dir.blocks.run(record.start_block, 1), &[0]);

    let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
    let info = ar.stat("full.wem").unwrap();
    assert_eq!(info.compressed_size, 65536);
    assert_eq!(ar.read_entry("full.wem").unwrap(), full);
}

#[test]
fn test_incompressible_full_block_falls_back_to_zero_sentinel() {
    // Compressible policy, but deflate cannot shrink noise.
    let full = noise(65536, 9);
    let bytes = create(&[("x.bin", full.clone())], &EditOptions::default());
    let (_, dir) = parse(&bytes);
    let record = &dir.records[1];
    assert_eq!(dir.blocks.run(record.start_block, 1), &[0]);
    assert_eq!(&bytes[record.offset as usize..], &full[..]);

    let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(ar.stat("x.bin").unwrap().compressed_size, 65536);
    assert_eq!(ar.read_entry("x.bin").unwrap(), full);
}

#[test]
fn test_literal_entries_are_never_deflated() {
    // Highly compressible, but the suffix policy must win.
    let text = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(5000);
    let entries = vec![("x.wem", text.clone()), ("x.sng", text.clone()), ("x.xml", text.clone())];
    let bytes = create(&entries, &EditOptions::default());
    let (header, dir) = parse(&bytes);

    let block_starts = |position: usize| {
        let record = &dir.records[position];
        let mut offset = record.offset as usize;
        let mut starts = Vec::new();
        for &stored in dir.blocks.run(record.start_block, record.block_count(header.block_size)) {
            starts.push(&bytes[offset..offset + 2]);
            offset += BlockTable::stored_len(stored, header.block_size) as usize;
        }
        starts
    };
    for position in [1, 2] {
        assert!(block_starts(position).iter().all(|s| *s != ZLIB_SIGNATURE));
    }
    assert!(block_starts(3).iter().all(|s| *s == ZLIB_SIGNATURE));
}

// ── pack / scenarios ─────────────────────────────────────────────────────────

#[test]
fn test_pack_directory_scenario() {
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.wem"), b"0123456789").unwrap();
    fs::write(src.path().join("b.sng"), b"abcdefghij").unwrap();
    fs::write(src.path().join("c.txt"), b"hello world").unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target = target_dir.path().join("out.psarc");
    assert_eq!(pack_directory(src.path(), &target, &EditOptions::default()).unwrap(), 3);

    let bytes = fs::read(&target).unwrap();
    let (header, dir) = parse(&bytes);
    assert_eq!(header.entry_count, 4);
    assert_eq!(manifest_text(&bytes), "a.wem\nb.sng\nc.txt");
    assert_eq!(header.directory_len as usize, HEADER_SIZE + 4 * 30 + 4 * 2);
    assert_eq!(dir.blocks.0[1..], [10, 10, 11]);

    let mut ar = Archive::open_path(&target).unwrap();
    let out = tempfile::tempdir().unwrap();
    ar.extract_all(out.path()).unwrap();
    assert_eq!(fs::read(out.path().join("a.wem")).unwrap(), b"0123456789");
    assert_eq!(fs::read(out.path().join("b.sng")).unwrap(), b"abcdefghij");
    assert_eq!(fs::read(out.path().join("c.txt")).unwrap(), b"hello world");
}

#[test]
fn test_pack_nested_directory_uses_forward_slashes() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("songs").join("arr")).unwrap();
    fs::write(src.path().join("songs").join("arr").join("lead.xml"), b"<song/>").unwrap();
    fs::write(src.path().join("root.txt"), b"r").unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target = target_dir.path().join("nested.psarc");
    pack_directory(src.path(), &target, &EditOptions::default().with_encryption(true)).unwrap();

    let ar = Archive::open_path(&target).unwrap();
    assert!(ar.header().is_encrypted());
    let names: Vec<&str> = ar.names().collect();
    assert_eq!(names, vec!["root.txt", "songs/arr/lead.xml"]);
}

#[test]
fn test_edit_remove_and_add_longer_name() {
    let options = EditOptions::default();
    let bytes = create(
        &[("a.txt", b"first".to_vec()), ("c.txt", b"gone soon".to_vec())],
        &options,
    );
    let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
    ar.edit(&options, |entries| {
        entries.retain(|e| e.name != "c.txt");
        entries.push(NamedEntry::from_bytes(
            "songs/arrangements/a_much_longer_entry_name.xml",
            Staging::Memory,
            b"<arrangement/>",
        )?);
        Ok(())
    })
    .unwrap();

    let mut ar = Archive::open(ar.into_inner()).unwrap();
    let names: Vec<&str> = ar.names().collect();
    assert_eq!(names, vec!["a.txt", "songs/arrangements/a_much_longer_entry_name.xml"]);
    assert!(matches!(ar.read_entry("c.txt"), Err(PsarcError::NotFound(_))));

    let out = tempfile::tempdir().unwrap();
    ar.extract_all(out.path()).unwrap();
    assert!(!out.path().join("c.txt").exists());
    assert_eq!(
        fs::read(out.path().join("songs/arrangements/a_much_longer_entry_name.xml")).unwrap(),
        b"<arrangement/>"
    );
    assert_eq!(manifest_text(&ar.into_inner().into_inner()),
        "a.txt\nsongs/arrangements/a_much_longer_entry_name.xml");
}

#[test]
fn test_failed_transform_leaves_archive_untouched() {
    let options = EditOptions::default().with_staging(Staging::TempFile);
    let original = create(&sample_entries(), &options);
    let mut ar = Archive::open(Cursor::new(original.clone())).unwrap();

    let err = ar
        .edit(&options, |entries| {
            entries.clear();
            Err(FormatError::MissingManifest.into())
        })
        .unwrap_err();
    assert!(err.is_format());
    assert_eq!(ar.len(), sample_entries().len());
    assert_eq!(ar.into_inner().into_inner(), original);
}

#[test]
fn test_invalid_entry_name_is_rejected() {
    let mut ar = Archive::create_empty(Cursor::new(Vec::new()), &EditOptions::default()).unwrap();
    let err = ar
        .edit(&EditOptions::default(), |entries| {
            entries.push(NamedEntry::from_bytes("two\nlines", Staging::Memory, b"x")?);
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, PsarcError::Format(FormatError::InvalidEntryName(_))));
}

#[test]
fn test_extract_refuses_parent_components() {
    let bytes = create(&[("../escape.txt", b"nope".to_vec())], &EditOptions::default());
    let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
    let out = tempfile::tempdir().unwrap();
    let err = ar.extract_all(out.path().join("inner")).unwrap_err();
    assert!(err.is_format());
    assert!(!out.path().join("escape.txt").exists());
}

// ── failure taxonomy ─────────────────────────────────────────────────────────

#[test]
fn test_truncated_encrypted_directory_is_integrity_error() {
    let bytes = create(&sample_entries(), &EditOptions::default().with_encryption(true));
    let truncated = bytes[..HEADER_SIZE + 10].to_vec();
    assert!(matches!(
        Archive::open(Cursor::new(truncated)),
        Err(PsarcError::Integrity(IntegrityError::DirectorySizeMismatch { expected: _, actual: 10 }))
    ));
}

#[test]
fn test_truncated_entry_data_is_integrity_error() {
    let bytes = create(&[("x.txt", noise(1_900, 4))], &EditOptions::default());
    let truncated = bytes[..bytes.len() - 5].to_vec();
    let err = Archive::open(Cursor::new(truncated)).err().unwrap();
    assert!(err.is_integrity());
    assert!(matches!(err, PsarcError::Integrity(IntegrityError::EntryPastEnd { id: 1, .. })));
}

#[test]
fn test_oversized_manifest_record_fails_without_allocating() {
    // 100 000 full-block slots of 16 MiB each, but no data behind them.
    let slots = 100_000u32;
    let block_size = 1u32 << 24;
    let mut header = Header::new(block_size, false);
    header.entry_count = 1;
    header.directory_len = (HEADER_SIZE + header.record_size as usize + slots as usize * 3) as u32;
    let directory = Directory {
        records: vec![EntryRecord {
            id:               0,
            start_block:      0,
            uncompressed_len: u64::from(slots) << 24,
            offset:           u64::from(header.directory_len),
        }],
        blocks: BlockTable(vec![0; slots as usize]),
    };
    let mut bytes = Vec::new();
    header.write(&mut bytes).unwrap();
    bytes.extend(directory.encode(&header).unwrap());
    assert_eq!(bytes.len(), 300_062);

    match Archive::open(Cursor::new(bytes)) {
        Err(PsarcError::Integrity(IntegrityError::EntryPastEnd { id, end, stream_len })) => {
            assert_eq!(id, 0);
            assert_eq!(stream_len, 300_062);
            assert_eq!(end, 300_062 + (u64::from(slots) << 24));
        }
        other => panic!("expected EntryPastEnd, got {:?}", other.err()),
    }
}

#[test]
fn test_corrupt_block_is_integrity_error() {
    let data = b"compress me please ".repeat(100);
    let mut bytes = create(&[("x.txt", data)], &EditOptions::default());
    let (_, dir) = parse(&bytes);
    let offset = dir.records[1].offset as usize;
    bytes[offset + 4] ^= 0xFF;
    bytes[offset + 5] ^= 0xFF;

    let mut ar = Archive::open(Cursor::new(bytes)).unwrap();
    assert!(ar.read_entry("x.txt").unwrap_err().is_integrity());
}

#[test]
fn test_not_an_archive_vs_missing_file() {
    let garbage = b"this is certainly not an archive, just some text bytes".to_vec();
    assert!(Archive::open(Cursor::new(garbage)).err().unwrap().is_format());

    let dir = tempfile::tempdir().unwrap();
    assert!(Archive::open_path(dir.path().join("missing.psarc")).err().unwrap().is_io());
}

#[test]
fn test_manifest_count_mismatch_is_format_error() {
    // Manifest names one entry while the directory holds two data records.
    let manifest = b"only_one.txt";
    let sizes = [
        PackedSizes { uncompressed_len: 12, block_sizes: &[12], payload_len: 12 },
        PackedSizes { uncompressed_len: 1, block_sizes: &[1], payload_len: 1 },
        PackedSizes { uncompressed_len: 1, block_sizes: &[1], payload_len: 1 },
    ];
    let (header, dir) = Directory::layout(sizes, 65536, false).unwrap();
    let mut bytes = Vec::new();
    header.write(&mut bytes).unwrap();
    bytes.extend(dir.encode(&header).unwrap());
    bytes.extend_from_slice(manifest);
    bytes.extend_from_slice(b"ab");

    assert!(matches!(
        Archive::open(Cursor::new(bytes)),
        Err(PsarcError::Format(FormatError::EntryCountMismatch { names: 1, entries: 2 }))
    ));
}
