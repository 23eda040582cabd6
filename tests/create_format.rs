mod common;

use common::*;
use nibfox::{
    fs::{format_image, DiskFs},
    prelude::*,
};

#[test]
fn create_refuses_to_overwrite() {
    init();
    let file = ScratchFile::new("exists.po");
    std::fs::write(&file.path, b"occupied").unwrap();

    let err = DiskImage::create(
        &file.path,
        CreateParams {
            num_blocks: 280,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::FileExists));
}

#[test]
fn created_file_reopens_with_expected_shape() {
    init();
    let file = ScratchFile::new("fresh.po");
    let img = DiskImage::create(
        &file.path,
        CreateParams {
            num_blocks: 1600,
            ..Default::default()
        },
    )
    .unwrap();
    img.close().unwrap();

    let img = DiskImage::open_file(&file.path, true).unwrap();
    assert_eq!(img.file_format(), FileFormat::Unadorned);
    assert_eq!(img.order(), SectorOrder::ProDos);
    assert_eq!(img.num_blocks(), 1600);
    assert_eq!(img.fs_format(), FsFormat::Unknown); // zeroed, no fs yet
    img.close().unwrap();
}

#[test]
fn dos33_format_yields_empty_catalog() {
    init();
    let file = ScratchFile::new("fmt.do");
    let mut img = DiskImage::create(
        &file.path,
        CreateParams {
            order: SectorOrder::Dos,
            fs_format: FsFormat::GenericDosOrd,
            num_tracks: 35,
            sectors_per_track: 16,
            dos_volume: Some(254),
            ..Default::default()
        },
    )
    .unwrap();

    format_image(&mut img, FsFormat::Dos33, "").unwrap();
    img.override_format(img.physical_format(), FsFormat::Dos33, img.order())
        .unwrap();
    assert_eq!(img.fs_format(), FsFormat::Dos33);

    let fs = DiskFs::open(&mut img).unwrap();
    let entries = fs.list(&mut img).unwrap();
    assert!(entries.is_empty());
    assert_eq!(fs.volume_name().as_deref(), Some("DOS Volume 254"));
    fs.close(&mut img);
    img.close().unwrap();

    // And the formatted disk is detected on a fresh open.
    let img = DiskImage::open_file(&file.path, true).unwrap();
    assert_eq!(img.fs_format(), FsFormat::Dos33);
    img.close().unwrap();
}

#[test]
fn prodos_format_yields_empty_volume() {
    init();
    let mut img = DiskImage::create_buffer(CreateParams {
        num_blocks: 280,
        ..Default::default()
    })
    .unwrap();

    format_image(&mut img, FsFormat::ProDos, "NEWDISK").unwrap();
    img.override_format(img.physical_format(), FsFormat::ProDos, img.order())
        .unwrap();

    let fs = DiskFs::open(&mut img).unwrap();
    assert_eq!(fs.volume_name().as_deref(), Some("/NEWDISK"));
    assert!(fs.list(&mut img).unwrap().is_empty());
    fs.close(&mut img);
    img.close().unwrap();
}

#[test]
fn cancelled_scan_leaves_image_usable() {
    init();
    let file = ScratchFile::new("cancel.do");
    std::fs::write(&file.path, build_dos33_payload(254)).unwrap();

    let mut img = DiskImage::open_file(&file.path, false).unwrap();
    img.set_scan_progress(Some(std::rc::Rc::new(|_msg: &str, _count: u64| false)));

    let fs = DiskFs::open(&mut img).unwrap();
    let err = fs.list(&mut img).unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::Cancelled));
    fs.close(&mut img);

    // Close releases everything; the same path opens cleanly again.
    img.close().unwrap();
    let img = DiskImage::open_file(&file.path, false).unwrap();
    assert_eq!(img.fs_format(), FsFormat::Dos33);
    img.close().unwrap();
}

#[test]
fn override_with_current_values_is_a_noop() {
    init();
    let payload = build_dos33_payload(254);
    let mut img = DiskImage::open_buffer(payload, true).unwrap();
    let (physical, fs, order) = (img.physical_format(), img.fs_format(), img.order());
    img.override_format(physical, fs, order).unwrap();
    assert_eq!(img.fs_format(), fs);
    assert_eq!(img.order(), order);
    img.close().unwrap();
}

#[test]
fn override_cannot_change_physical_format() {
    init();
    let mut img = DiskImage::open_buffer(build_dos33_payload(1), true).unwrap();
    let err = img
        .override_format(
            PhysicalFormat::Nib525_6656,
            FsFormat::Dos33,
            SectorOrder::Dos,
        )
        .unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::InvalidArg));
    img.close().unwrap();
}

#[test]
fn override_reports_missing_filesystem_and_bad_ordering_distinctly() {
    init();
    // A zeroed ProDOS-order disk has no DOS filesystem to override to.
    let mut img = DiskImage::create_buffer(CreateParams {
        num_blocks: 280,
        ..Default::default()
    })
    .unwrap();
    let err = img
        .override_format(PhysicalFormat::Sectors, FsFormat::Dos33, SectorOrder::Dos)
        .unwrap_err();
    assert!(matches!(
        err,
        nibfox::DiskImageError::FilesystemNotFound
    ));

    // A real DOS image under an impossible ordering request.
    let mut img = DiskImage::open_buffer(build_dos33_payload(1), false).unwrap();
    let err = img
        .override_format(PhysicalFormat::Sectors, FsFormat::Dos33, SectorOrder::Cpm)
        .unwrap_err();
    assert!(matches!(err, nibfox::DiskImageError::BadOrdering));
    img.close().unwrap();
}

#[test]
fn generic_formats_resolve_orderings() {
    init();
    let mut img = DiskImage::create_buffer(CreateParams {
        order: SectorOrder::Dos,
        fs_format: FsFormat::GenericDosOrd,
        num_tracks: 35,
        sectors_per_track: 16,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(img.fs_order(), SectorOrder::Dos);

    // Overriding to a generic ProDOS view re-skews reads.
    img.override_format(
        PhysicalFormat::Sectors,
        FsFormat::GenericProDosOrd,
        SectorOrder::Dos,
    )
    .unwrap();
    assert_eq!(img.fs_order(), SectorOrder::ProDos);

    // Logical ProDOS sector 2 is raw sector 4, stored at index 13 of a
    // DOS-ordered track.
    img.write_track_sector(0, 2, &[0xabu8; SECTOR]).unwrap();
    assert_eq!(img.read_track_sector(0, 2).unwrap(), [0xabu8; SECTOR]);

    // Switch back to the DOS view; with matching orders the mapping is
    // the identity, exposing the stored slot directly.
    img.override_format(
        PhysicalFormat::Sectors,
        FsFormat::GenericDosOrd,
        SectorOrder::Dos,
    )
    .unwrap();
    let stored = img.read_track_sector(0, 13).unwrap();
    assert_eq!(stored, [0xabu8; SECTOR]);
    img.close().unwrap();
}
