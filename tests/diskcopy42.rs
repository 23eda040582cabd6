mod common;

use common::*;
use nibfox::{prelude::*, NoteKind};

#[test]
fn good_image_opens_writable() {
    init();
    let payload = build_prodos_payload("DCGOOD", 1600);
    let bytes = wrap_dc42(&payload, "DCGOOD", false);
    let file = ScratchFile::new("good.dsk");
    std::fs::write(&file.path, &bytes).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.file_format(), FileFormat::DiskCopy42);
    assert_eq!(img.order(), SectorOrder::ProDos);
    assert_eq!(img.fs_format(), FsFormat::ProDos);
    assert!(!img.is_read_only());
    assert_eq!(img.storage_name().as_deref(), Some("DCGOOD"));

    img.write_block(100, &[0x77u8; BLOCK_SIZE]).unwrap();
    img.close().unwrap();

    // The flush recomputed the checksum, so the reopen is clean and the
    // change persisted.
    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert!(!img.is_read_only());
    assert!(img.notes().is_empty());
    assert_eq!(img.read_block(100).unwrap(), [0x77u8; BLOCK_SIZE]);
    img.close().unwrap();
}

#[test]
fn corrupted_checksum_opens_read_only_with_warning() {
    init();
    let payload = build_prodos_payload("DCBAD", 1600);
    let bytes = wrap_dc42(&payload, "DCBAD", true);
    let file = ScratchFile::new("bad.dsk");
    std::fs::write(&file.path, &bytes).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert!(img.is_read_only());
    assert!(img
        .notes()
        .iter()
        .any(|n| n.kind == NoteKind::Warning && n.text.contains("checksum")));

    // Writes are refused.
    assert!(matches!(
        img.write_block(0, &[0u8; BLOCK_SIZE]),
        Err(nibfox::DiskImageError::AccessDenied)
    ));
    assert!(matches!(
        img.write_track_sector(0, 0, &[0u8; SECTOR]),
        Err(nibfox::DiskImageError::AccessDenied)
    ));
    img.close().unwrap();
}
