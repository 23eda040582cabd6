mod common;

use common::*;
use nibfox::{prelude::*, NibbleDescr, StdNibbleDescr};

#[test]
fn dos_ordered_140k_two_mg_analyzes_completely() {
    init();
    let payload = build_dos33_payload(254);
    let bytes = wrap_2mg(&payload, 0, Some(254));

    let mut img = DiskImage::open_buffer(bytes, false).unwrap();
    assert_eq!(img.outer_format(), OuterFormat::None);
    assert_eq!(img.file_format(), FileFormat::TwoMG);
    assert_eq!(img.physical_format(), PhysicalFormat::Sectors);
    assert_eq!(img.order(), SectorOrder::Dos);
    assert_eq!(img.fs_format(), FsFormat::Dos33);
    assert_eq!(img.num_tracks(), 35);
    assert_eq!(img.sectors_per_track(), 16);
    assert_eq!(img.dos_volume_number(), Some(254));

    // T17 S0 carries the catalog signature fields.
    let vtoc = img.read_track_sector(17, 0).unwrap();
    assert_eq!(vtoc[0x34], 35); // tracks per disk
    assert_eq!(vtoc[0x35], 16); // sectors per track
    assert_eq!(vtoc[0x01], 17); // catalog track

    img.close().unwrap();
}

#[test]
fn sector_write_reads_back() {
    init();
    let bytes = wrap_2mg(&build_dos33_payload(1), 0, Some(1));
    let mut img = DiskImage::open_buffer(bytes, false).unwrap();

    let mut data = [0u8; SECTOR];
    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }
    img.write_track_sector(5, 9, &data).unwrap();
    assert_eq!(img.read_track_sector(5, 9).unwrap(), data);
    assert!(img.is_dirty());
    img.flush(FlushMode::All).unwrap();
    assert!(!img.is_dirty());
    img.close().unwrap();
}

#[test]
fn catalog_enumerates_through_driver() {
    init();
    let mut payload = build_dos33_payload(254);
    add_dos33_file(&mut payload, "HELLO", 20, 4);
    let bytes = wrap_2mg(&payload, 0, Some(254));

    let mut img = DiskImage::open_buffer(bytes, false).unwrap();
    let fs = nibfox::fs::DiskFs::open(&mut img).unwrap();
    let entries = fs.list(&mut img).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "HELLO");
    assert_eq!(entries[0].kind, "B");

    let data = fs.read_file(&mut img, &entries[0]).unwrap();
    assert_eq!(data.len(), 4 * SECTOR);
    assert!(data.chunks(SECTOR).all(|s| s[0] == 0xa5));

    fs.close(&mut img);
    img.close().unwrap();
}

#[test]
fn nib_format_two_mg_recovers_sectors() {
    init();
    // A 2MG with format byte 2 wraps a raw 6656-byte nibble stream.
    let mut img = DiskImage::create_buffer(CreateParams {
        file_format: FileFormat::TwoMG,
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

    assert!(img.has_nibbles());
    assert!(img.has_sectors());
    assert_eq!(img.sectors_per_track(), 16);
    let sector = img.read_track_sector(0, 0).unwrap();
    assert!(sector.iter().all(|&b| b == 0));
    img.close().unwrap();
}
