mod common;

use common::*;
use nibfox::prelude::*;

#[test]
fn unidos_probes_and_adjusts_geometry() {
    init();
    let payload = build_unidos_payload(1, 2);
    let file = ScratchFile::new("unidos.do");
    std::fs::write(&file.path, &payload).unwrap();

    let img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.fs_format(), FsFormat::UniDos);
    // Wide adjustment: 32 sectors per track, half the tracks.
    assert_eq!(img.sectors_per_track(), 32);
    assert_eq!(img.num_tracks(), 100);
    img.close().unwrap();
}

#[test]
fn unidos_halves_open_as_dos_volumes() {
    init();
    let payload = build_unidos_payload(10, 20);
    let file = ScratchFile::new("halves.do");
    std::fs::write(&file.path, &payload).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    let fs = nibfox::fs::DiskFs::open(&mut img).unwrap();
    let partitions = fs.partitions().to_vec();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0].num_blocks, 800);
    fs.close(&mut img);

    // Each half analyzes as a 50-track x 32-sector DOS 3.3 disk.
    let mut child = img
        .open_sub_image(partitions[1].start_block, partitions[1].num_blocks)
        .unwrap();
    assert_eq!(child.fs_format(), FsFormat::Dos33);
    assert_eq!(child.num_tracks(), 50);
    assert_eq!(child.sectors_per_track(), 32);
    let vtoc = child.read_track_sector(17, 0).unwrap();
    assert_eq!(vtoc[0x06], 20); // volume number of the back half

    child.close().unwrap();
    img.close().unwrap();
}

#[test]
fn child_write_marks_all_ancestors_dirty() {
    init();
    let payload = build_unidos_payload(1, 2);
    let mut img = DiskImage::open_buffer(payload, false).unwrap();
    assert!(!img.is_dirty());

    let mut child = img.open_sub_image(0, 800).unwrap();
    assert!(!child.is_dirty());

    child
        .write_track_sector(0, 0, &[0x99u8; SECTOR])
        .unwrap();
    assert!(child.is_dirty());
    assert!(img.is_dirty());

    // Writes pass through the window into the parent payload.
    let direct = img.read_track_sector(0, 0).unwrap();
    assert_eq!(direct, [0x99u8; SECTOR]);

    // A root flush settles the whole family.
    img.flush(FlushMode::All).unwrap();
    assert!(!img.is_dirty());
    assert!(!child.is_dirty());

    child.close().unwrap();
    img.close().unwrap();
}

#[test]
fn grandchild_writes_propagate_to_the_root() {
    init();
    let mut root = DiskImage::create_buffer(CreateParams {
        num_blocks: 1600,
        ..Default::default()
    })
    .unwrap();

    let mut child = root.open_sub_image(0, 800).unwrap();
    let mut grandchild = child.open_sub_image(16, 64).unwrap();

    grandchild.write_block(0, &[1u8; BLOCK_SIZE]).unwrap();
    assert!(grandchild.is_dirty());
    assert!(child.is_dirty());
    assert!(root.is_dirty());

    // The write landed at block 16 of the root.
    assert_eq!(root.read_block(16).unwrap(), [1u8; BLOCK_SIZE]);

    grandchild.close().unwrap();
    child.close().unwrap();
    root.close().unwrap();
}

/// Build an 800K OzDOS payload: two DOS volumes interleaved through
/// paired 256-byte cells of each wide track slot.
fn build_ozdos_payload(volume_a: u8, volume_b: u8) -> Vec<u8> {
    let mut disk = vec![0u8; PRODOS_800K];

    // The VTOC of each half sits at its track 17, sector 0. With
    // pairing, logical track 17 doubles to slot 34 and the pair offset
    // picks the cell.
    for (offset, volume) in [(0usize, volume_a), (1usize, volume_b)] {
        let at = 34 * 32 * SECTOR + offset * SECTOR;
        let vtoc = &mut disk[at..at + SECTOR];
        vtoc[0x01] = 17;
        vtoc[0x02] = 31;
        vtoc[0x03] = 3;
        vtoc[0x06] = volume;
        vtoc[0x27] = 122;
        vtoc[0x34] = 50;
        vtoc[0x35] = 32;
        vtoc[0x37] = 0x01;
    }
    disk
}

#[test]
fn ozdos_probes_and_paired_halves_are_dos() {
    init();
    let payload = build_ozdos_payload(0xa1, 0xb2);
    let mut img = DiskImage::open_buffer(payload, false).unwrap();
    assert_eq!(img.fs_format(), FsFormat::OzDos);
    assert_eq!(img.sectors_per_track(), 32);
    assert_eq!(img.num_tracks(), 100);

    let mut half_a = img.open_sub_image_paired(0).unwrap();
    assert_eq!(half_a.fs_format(), FsFormat::Dos33);
    assert_eq!(half_a.num_tracks(), 50);
    assert_eq!(half_a.sectors_per_track(), 32);
    assert_eq!(half_a.read_track_sector(17, 0).unwrap()[0x06], 0xa1);

    let mut half_b = img.open_sub_image_paired(1).unwrap();
    assert_eq!(half_b.read_track_sector(17, 0).unwrap()[0x06], 0xb2);

    // Writing one half must not disturb the other's interleaved cells.
    half_a
        .write_track_sector(0, 0, &[0x0au8; SECTOR])
        .unwrap();
    assert!(img.is_dirty());
    assert_eq!(half_b.read_track_sector(0, 0).unwrap(), [0u8; SECTOR]);
    assert_eq!(half_a.read_track_sector(0, 0).unwrap(), [0x0au8; SECTOR]);

    half_a.close().unwrap();
    half_b.close().unwrap();
    img.close().unwrap();
}

#[test]
fn read_only_is_inherited_by_children() {
    init();
    let payload = build_unidos_payload(1, 2);
    let mut img = DiskImage::open_buffer(payload, true).unwrap();
    let mut child = img.open_sub_image(0, 800).unwrap();
    assert!(child.is_read_only());
    assert!(matches!(
        child.write_block(0, &[0u8; BLOCK_SIZE]),
        Err(nibfox::DiskImageError::AccessDenied)
    ));
    child.close().unwrap();
    img.close().unwrap();
}

#[test]
fn sub_range_bounds_are_checked() {
    init();
    let mut img = DiskImage::create_buffer(CreateParams {
        num_blocks: 280,
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        img.open_sub_image(200, 100),
        Err(nibfox::DiskImageError::InvalidArg)
    ));
    assert!(matches!(
        img.open_sub_image_sectors(0, 3, 100),
        Err(nibfox::DiskImageError::InvalidArg)
    ));
    img.close().unwrap();
}
