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

    src/fs/hfs.rs

    Macintosh HFS detection via the Master Directory Block at block 2.
    The driver reports volume metadata; file enumeration of HFS volumes
    is outside the engine's scope.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, Leniency},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError,
};

const MDB_BLOCK: u64 = 2;
const MDB_SIGNATURE: u16 = 0x4244; // 'BD'

fn mdb_plausible(mdb: &[u8], num_blocks: u64, leniency: Leniency) -> bool {
    if u16::from_be_bytes([mdb[0], mdb[1]]) != MDB_SIGNATURE {
        return false;
    }
    if leniency == Leniency::Very {
        return true;
    }
    let alloc_block_size = u32::from_be_bytes([mdb[0x14], mdb[0x15], mdb[0x16], mdb[0x17]]);
    let num_alloc_blocks = u16::from_be_bytes([mdb[0x12], mdb[0x13]]) as u64;
    let name_len = mdb[0x24] as usize;

    // Allocation blocks are a positive multiple of 512 and the mapped
    // space has to fit on the volume.
    alloc_block_size > 0
        && alloc_block_size % 512 == 0
        && name_len <= 27
        && num_alloc_blocks * (alloc_block_size as u64 / 512) <= num_blocks
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() <= MDB_BLOCK {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let num_blocks = img.num_blocks();

    for order in order_candidates(hint) {
        let Ok(mdb) = img.probe_read_block(MDB_BLOCK, order, SectorOrder::ProDos) else {
            continue;
        };
        if mdb_plausible(&mdb, num_blocks, leniency) {
            return Ok((order, FsFormat::MacHFS));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

/// Volume metadata pulled from the MDB.
pub struct HfsInfo {
    pub volume_name: String,
    pub num_files: u32,
    pub num_dirs: u32,
    pub alloc_block_size: u32,
}

pub fn volume_info(img: &mut DiskImage) -> Result<HfsInfo, DiskImageError> {
    let mdb = img.read_block(MDB_BLOCK)?;
    if u16::from_be_bytes([mdb[0], mdb[1]]) != MDB_SIGNATURE {
        return Err(DiskImageError::BadDiskImage);
    }
    let name_len = (mdb[0x24] as usize).min(27);
    Ok(HfsInfo {
        volume_name: util::clean_mac_name(&mdb[0x25..0x25 + name_len]),
        num_files: u32::from_be_bytes([mdb[0x2c], mdb[0x2d], mdb[0x2e], mdb[0x2f]]),
        num_dirs: u32::from_be_bytes([mdb[0x30], mdb[0x31], mdb[0x32], mdb[0x33]]),
        alloc_block_size: u32::from_be_bytes([mdb[0x14], mdb[0x15], mdb[0x16], mdb[0x17]]),
    })
}
