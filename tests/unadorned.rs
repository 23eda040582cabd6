mod common;

use common::*;
use nibfox::prelude::*;

#[test]
fn prodos_po_800k_analyzes_as_blocks() {
    init();
    let file = ScratchFile::new("prodos.po");
    std::fs::write(&file.path, build_prodos_payload("PRODTEST", 1600)).unwrap();

    let mut img = DiskImage::open_file(&file.path, true).unwrap();
    assert_eq!(img.file_format(), FileFormat::Unadorned);
    assert_eq!(img.physical_format(), PhysicalFormat::Sectors);
    assert_eq!(img.order(), SectorOrder::ProDos);
    assert_eq!(img.fs_format(), FsFormat::ProDos);
    assert!(img.has_blocks());
    assert_eq!(img.num_blocks(), 1600);
    let geom = img.geometry();
    assert!(geom.has_sectors && geom.has_blocks);
    assert_eq!(geom.block_bytes(), 819_200);

    // Volume directory header: storage type nibble 0xF, then the name.
    let key = img.read_block(2).unwrap();
    assert_eq!(key[4] >> 4, 0x0f);
    assert_eq!(&key[5..9], b"PROD");

    img.close().unwrap();
}

#[test]
fn block_write_then_read_returns_same_data() {
    init();
    let mut img = DiskImage::create_buffer(CreateParams {
        num_blocks: 280,
        ..Default::default()
    })
    .unwrap();

    let block = [0x5au8; BLOCK_SIZE];
    img.write_block(42, &block).unwrap();
    assert_eq!(img.read_block(42).unwrap(), block);
    img.close().unwrap();
}

#[test]
fn block_range_read_matches_individual_reads() {
    init();
    let mut payload = build_prodos_payload("RANGE", 280);
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= (i / BLOCK) as u8;
    }
    let mut img = DiskImage::open_buffer(payload, true).unwrap();

    // image order == fs order, so this takes the single large read.
    let range = img.read_blocks(10, 20).unwrap();
    for i in 0..20u64 {
        let single = img.read_block(10 + i).unwrap();
        assert_eq!(&range[(i as usize) * BLOCK_SIZE..][..BLOCK_SIZE], &single[..]);
    }
    img.close().unwrap();
}

#[test]
fn cross_order_reads_are_consistent_with_sector_view() {
    init();
    // A DOS-ordered 140K disk read through the block view must agree
    // with the track/sector translation.
    let mut payload = build_dos33_payload(254);
    for (i, byte) in payload.iter_mut().enumerate() {
        if *byte == 0 {
            *byte = (i % 251) as u8;
        }
    }
    let file = ScratchFile::new("dosorder.do");
    std::fs::write(&file.path, &payload).unwrap();

    let mut img = DiskImage::open_file(&file.path, true).unwrap();
    assert_eq!(img.fs_format(), FsFormat::Dos33);
    // DOS fs order over a DOS image: sector 0 of track 0 is payload[0..]
    let sector = img.read_track_sector(0, 0).unwrap();
    assert_eq!(sector[..], payload[..SECTOR]);
    img.close().unwrap();
}

#[test]
fn invalid_addresses_are_rejected() {
    init();
    let mut img = DiskImage::open_buffer(build_prodos_payload("BOUNDS", 280), false).unwrap();

    assert!(matches!(
        img.read_block(280),
        Err(nibfox::DiskImageError::InvalidBlock)
    ));
    assert!(matches!(
        img.write_block(280, &[0u8; BLOCK_SIZE]),
        Err(nibfox::DiskImageError::InvalidBlock)
    ));
    assert!(matches!(
        img.read_track_sector(35, 0),
        Err(nibfox::DiskImageError::InvalidTrack)
    ));
    assert!(matches!(
        img.read_track_sector(0, 16),
        Err(nibfox::DiskImageError::InvalidSector)
    ));
    img.close().unwrap();
}

#[test]
fn odd_length_is_rejected() {
    init();
    // A sector multiple that is neither whole tracks nor whole blocks.
    let err = DiskImage::open_buffer(vec![0u8; 143_360 + 256], false).unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::OddLength));

    // Not even a sector multiple: not recognizable at all.
    let err = DiskImage::open_buffer(vec![0u8; 143_460], false).unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::UnrecognizedFileFmt));
}

#[test]
fn thirteen_sector_image_has_no_block_view() {
    init();
    let img = DiskImage::open_buffer(vec![0u8; 35 * 13 * SECTOR], true).unwrap();
    assert!(img.has_sectors());
    assert!(!img.has_blocks());
    assert_eq!(img.sectors_per_track(), 13);
    img.close().unwrap();
}
