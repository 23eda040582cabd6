mod common;

use common::*;
use nibfox::prelude::*;

/// Build an .sdk archive holding one 800K ProDOS disk image thread.
fn build_sdk(file: &ScratchFile) {
    let img = DiskImage::create(
        &file.path,
        CreateParams {
            file_format: FileFormat::NuFX,
            order: SectorOrder::ProDos,
            num_blocks: 1600,
            storage_name: Some("TESTDISK".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    img.close().unwrap();
}

#[test]
fn sdk_opens_as_prodos_ordered_blocks() {
    init();
    let file = ScratchFile::new("archive.sdk");
    build_sdk(&file);

    let img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.file_format(), FileFormat::NuFX);
    assert_eq!(img.physical_format(), PhysicalFormat::Sectors);
    assert_eq!(img.order(), SectorOrder::ProDos);
    assert_eq!(img.num_blocks(), 1600);
    img.close().unwrap();
}

#[test]
fn block_modification_persists_through_archive_rewrite() {
    init();
    let file = ScratchFile::new("modify.sdk");
    build_sdk(&file);

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    img.write_block(7, &[0xc4u8; BLOCK_SIZE]).unwrap();
    assert!(img.is_dirty());
    img.flush(FlushMode::All).unwrap();
    img.close().unwrap();

    // The record was rewritten (via temp file + rename); the change is
    // in the reopened archive.
    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.read_block(7).unwrap(), [0xc4u8; BLOCK_SIZE]);
    img.close().unwrap();
}

#[test]
fn fast_flush_skips_the_archive_rebuild() {
    init();
    let file = ScratchFile::new("fastonly.sdk");
    build_sdk(&file);
    let before = std::fs::read(&file.path).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    img.write_block(9, &[0x31u8; BLOCK_SIZE]).unwrap();
    img.flush(FlushMode::FastOnly).unwrap();
    assert!(img.is_dirty());
    assert_eq!(std::fs::read(&file.path).unwrap(), before);
    img.close().unwrap(); // full flush happens here
    assert_ne!(std::fs::read(&file.path).unwrap(), before);
}
