mod common;

use common::*;
use nibfox::{physical::gcr, prelude::*, NibbleDescr, StdNibbleDescr};

/// Build a 232,960-byte .nib image with standard DOS 3.3 formatting and
/// a recognizable boot sector on track 0.
fn build_nib_image() -> Vec<u8> {
    let mut img = DiskImage::create_buffer(CreateParams {
        physical_format: PhysicalFormat::Nib525_6656,
        order: SectorOrder::Physical,
        fs_format: FsFormat::GenericPhysicalOrd,
        num_tracks: 35,
        sectors_per_track: 16,
        dos_volume: Some(254),
        nibble_descr: Some(*NibbleDescr::standard(StdNibbleDescr::Dos33Std)),
        ..Default::default()
    })
    .unwrap();

    // A DOS 3.3 boot loader starts with $01 and mostly 6502 opcodes.
    let mut boot = [0u8; SECTOR];
    boot[0] = 0x01;
    boot[1] = 0xa5;
    boot[2] = 0x27;
    boot[3] = 0xc9;
    boot[4] = 0x09;
    img.write_track_sector(0, 0, &boot).unwrap();

    let mut out = vec![0u8; 35 * 6656];
    for track in 0..35 {
        let raw = img.read_nibble_track(track).unwrap();
        out[track * 6656..(track + 1) * 6656].copy_from_slice(&raw);
    }
    img.close().unwrap();
    out
}

#[test]
fn nib_image_recovers_35_tracks_of_16_sectors() {
    init();
    let bytes = build_nib_image();
    assert_eq!(bytes.len(), 232_960);
    let file = ScratchFile::new("standard.nib");
    std::fs::write(&file.path, &bytes).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.physical_format(), PhysicalFormat::Nib525_6656);
    assert!(img.has_nibbles());
    assert!(img.has_sectors());
    assert_eq!(img.num_tracks(), 35);
    assert_eq!(img.sectors_per_track(), 16);
    assert_eq!(img.dos_volume_number(), Some(254));
    assert_eq!(img.nibble_descr_name(), Some("DOS 3.3 Standard"));

    let boot = img.read_track_sector(0, 0).unwrap();
    assert_eq!(boot[0], 0x01);
    assert_eq!(boot[1], 0xa5);

    // Write zeros over the boot sector; read back through a fresh
    // decode of the re-encoded track.
    img.write_track_sector(0, 0, &[0u8; SECTOR]).unwrap();
    let back = img.read_track_sector(0, 0).unwrap();
    assert!(back.iter().all(|&b| b == 0));

    img.close().unwrap();
}

#[test]
fn garbage_nibble_image_allows_raw_track_access_only() {
    init();
    // Valid nibble length, but no recognizable address fields.
    let bytes = vec![0x97u8; 35 * 6656];
    let file = ScratchFile::new("garbage.nib");
    std::fs::write(&file.path, &bytes).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    assert!(img.has_nibbles());
    assert!(!img.has_sectors());
    assert!(!img.has_blocks());

    let raw = img.read_nibble_track(3).unwrap();
    assert_eq!(raw.len(), 6656);
    assert!(raw.iter().all(|&b| b == 0x97));
    assert!(matches!(
        img.read_track_sector(0, 0),
        Err(nibfox::DiskImageError::UnsupportedAccess)
    ));
    img.close().unwrap();
}

#[test]
fn encode_decode_roundtrip_all_sectors() {
    init();
    let mut img = DiskImage::create_buffer(CreateParams {
        physical_format: PhysicalFormat::Nib525_6656,
        order: SectorOrder::Physical,
        fs_format: FsFormat::GenericPhysicalOrd,
        num_tracks: 35,
        sectors_per_track: 16,
        nibble_descr: Some(*NibbleDescr::standard(StdNibbleDescr::Dos33Std)),
        ..Default::default()
    })
    .unwrap();

    for sector in 0..16 {
        let mut data = [0u8; SECTOR];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i as u8).wrapping_add(sector as u8);
        }
        img.write_track_sector(17, sector, &data).unwrap();
        assert_eq!(img.read_track_sector(17, sector).unwrap(), data);
    }
    img.close().unwrap();
}

#[test]
fn gap_bytes_are_self_sync() {
    init();
    let bytes = build_nib_image();
    // The start of every track is gap1 self-sync bytes.
    for track in 0..35 {
        assert_eq!(bytes[track * 6656], 0xff);
    }
}

#[test]
fn address_fields_use_four_and_four() {
    init();
    let bytes = build_nib_image();
    // Find the track-0 address prolog and decode its volume field.
    let track = &bytes[..6656];
    let pos = track
        .windows(3)
        .position(|w| w == [0xd5, 0xaa, 0x96])
        .unwrap();
    let volume = gcr::decode_44([track[pos + 3], track[pos + 4]]);
    assert_eq!(volume, 254);
    let addr_track = gcr::decode_44([track[pos + 5], track[pos + 6]]);
    assert_eq!(addr_track, 0);
}

#[test]
fn custom_profile_overrides_standard_table() {
    init();
    let mut custom = *NibbleDescr::standard(StdNibbleDescr::Dos33Std);
    custom.addr_prolog = [0xd5, 0xab, 0x96];
    custom.data_prolog = [0xd5, 0xab, 0xad];

    let mut img = DiskImage::create_buffer(CreateParams {
        physical_format: PhysicalFormat::Nib525_6656,
        order: SectorOrder::Physical,
        fs_format: FsFormat::GenericPhysicalOrd,
        num_tracks: 35,
        sectors_per_track: 16,
        nibble_descr: Some(custom),
        ..Default::default()
    })
    .unwrap();

    // Sectors decode under the custom framing.
    let sector = img.read_track_sector(4, 4).unwrap();
    assert!(sector.iter().all(|&b| b == 0));

    // The raw track really does use the altered prolog.
    let raw = img.read_nibble_track(4).unwrap();
    assert!(raw.windows(3).any(|w| w == [0xd5, 0xab, 0x96]));
    assert!(!raw.windows(3).any(|w| w == [0xd5, 0xaa, 0x96]));
    img.close().unwrap();
}
