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

    src/fs/fat.rs

    MS-DOS FAT detection. This exists mainly to catch CFFA cards that
    were formatted for ProDOS and later re-formatted under MS-DOS, so it
    runs before the ProDOS probe but only accepts large volumes; a 140K
    floppy is never called FAT.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, Leniency},
    types::enums::{FsFormat, SectorOrder},
    DiskImageError,
};

/// Don't claim FAT below ~720K; small Apple II images produce too many
/// BPB false positives.
const MIN_BLOCKS: u64 = 1440;

fn bpb_plausible(boot: &[u8], leniency: Leniency) -> bool {
    // A jump instruction leads the boot sector.
    if boot[0] != 0xeb && boot[0] != 0xe9 {
        return false;
    }
    let bytes_per_sector = u16::from_le_bytes([boot[11], boot[12]]);
    let sectors_per_cluster = boot[13];
    let num_fats = boot[16];
    let media = boot[21];

    if leniency == Leniency::Very {
        return bytes_per_sector == 512;
    }
    bytes_per_sector == 512
        && sectors_per_cluster.is_power_of_two()
        && (1..=2).contains(&num_fats)
        && (media == 0xf0 || media >= 0xf8)
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() < MIN_BLOCKS {
        return Err(DiskImageError::FilesystemNotFound);
    }

    for order in order_candidates(hint) {
        let Ok(boot) = img.probe_read_block(0, order, SectorOrder::ProDos) else {
            continue;
        };
        if bpb_plausible(&boot, leniency) {
            return Ok((order, FsFormat::MsDos));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}
