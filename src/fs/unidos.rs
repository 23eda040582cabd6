/*
    NibFox
    https://github.com/dbalsom/nibfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/fs/unidos.rs

    UNIDOS and OzDOS: 800K disks holding two 400K DOS 3.3 volumes with
    50 tracks of 32 sectors each. UNIDOS stacks the two volumes front
    and back; OzDOS interleaves them through sector pairing. The "wide"
    test also recognizes a standalone 400K half.
*/

use crate::{
    diskimage::DiskImage,
    fs::{dos33, order_candidates, Leniency, Partition, PartitionedFs},
    physical::SectorPairing,
    types::enums::{FsFormat, SectorOrder},
    DiskImageError,
};

const LEN_800K: u64 = 819_200;
const LEN_400K: u64 = 409_600;
const SUB_TRACKS: usize = 50;
const SUB_SPT: usize = 32;

fn wide_vtoc_ok(vtoc: &[u8]) -> bool {
    let cat_track = vtoc[0x01] as usize;
    let cat_sector = vtoc[0x02] as usize;
    let tracks_per_disk = vtoc[0x34] as usize;
    let sectors_per_track = vtoc[0x35] as usize;
    cat_track != 0
        && cat_track < SUB_TRACKS
        && cat_sector < SUB_SPT
        && tracks_per_disk == SUB_TRACKS
        && sectors_per_track == SUB_SPT
}

/// Probe one 50x32 DOS volume within the image, starting at
/// `track_base` wide tracks.
fn probe_half(
    img: &mut DiskImage,
    order: SectorOrder,
    track_base: usize,
    pairing: Option<SectorPairing>,
) -> bool {
    let geometry_tracks = if pairing.is_some() { SUB_TRACKS } else { SUB_TRACKS * 2 };
    match img.probe_read_sector_geometry(
        track_base + dos33::VTOC_TRACK,
        0,
        order,
        SectorOrder::Dos,
        geometry_tracks,
        SUB_SPT,
        pairing,
    ) {
        Ok(vtoc) => wide_vtoc_ok(&vtoc),
        Err(_) => false,
    }
}

/// A standalone 400K image holding one wide DOS volume.
pub fn test_wide_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    _leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if img.length() != LEN_400K || img.is_paired() {
        return Err(DiskImageError::FilesystemNotFound);
    }
    for order in order_candidates(hint) {
        let ok = img
            .probe_read_sector_geometry(
                dos33::VTOC_TRACK,
                0,
                order,
                SectorOrder::Dos,
                SUB_TRACKS,
                SUB_SPT,
                None,
            )
            .map(|v| wide_vtoc_ok(&v))
            .unwrap_or(false);
        if ok {
            return Ok((order, FsFormat::Dos33));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    _leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if img.length() != LEN_800K || img.is_paired() {
        return Err(DiskImageError::FilesystemNotFound);
    }
    for order in order_candidates(hint) {
        if probe_half(img, order, 0, None) && probe_half(img, order, SUB_TRACKS, None) {
            return Ok((order, FsFormat::UniDos));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub fn test_oz_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    _leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if img.length() != LEN_800K || img.is_paired() {
        return Err(DiskImageError::FilesystemNotFound);
    }
    for order in order_candidates(hint) {
        let even = probe_half(img, order, 0, Some(SectorPairing { offset: 0 }));
        let odd = probe_half(img, order, 0, Some(SectorPairing { offset: 1 }));
        if even && odd {
            return Ok((order, FsFormat::OzDos));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

/// Both schemes expose the same two 400K halves; the difference is how
/// a child image must address them.
pub fn open_partitions(img: &mut DiskImage) -> Result<PartitionedFs, DiskImageError> {
    let format = img.fs_format();
    let half_blocks = LEN_400K / crate::BLOCK_SIZE as u64;

    let partitions = match format {
        FsFormat::UniDos => vec![
            Partition {
                name: "UNIDOS A".to_string(),
                start_block: 0,
                num_blocks: half_blocks,
            },
            Partition {
                name: "UNIDOS B".to_string(),
                start_block: half_blocks,
                num_blocks: half_blocks,
            },
        ],
        FsFormat::OzDos => {
            // Interleaved halves; a child uses sector pairing rather
            // than a block range, so both partitions start at zero.
            vec![
                Partition {
                    name: "OzDOS A".to_string(),
                    start_block: 0,
                    num_blocks: half_blocks,
                },
                Partition {
                    name: "OzDOS B".to_string(),
                    start_block: 0,
                    num_blocks: half_blocks,
                },
            ]
        }
        _ => return Err(DiskImageError::Internal),
    };

    Ok(PartitionedFs { format, partitions })
}
