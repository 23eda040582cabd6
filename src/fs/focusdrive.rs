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

    src/fs/focusdrive.rs

    Parsons Engineering FocusDrive: an ASCII tag in block 0 followed by
    a partition table of start/length/name triples.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, Leniency, Partition, PartitionedFs},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError,
};

const SIGNATURE: &[u8] = b"Parsons Engin.";
const OFF_PART_COUNT: usize = 0x10;
const OFF_TABLE: usize = 0x20;
/// Each entry: start u32, length u32, name[16].
const ENTRY_LEN: usize = 24;
const MAX_PARTITIONS: usize = 16;

fn parse_partition_block(block: &[u8], device_blocks: u64) -> Option<Vec<Partition>> {
    if &block[..SIGNATURE.len()] != SIGNATURE {
        return None;
    }
    let declared = block[OFF_PART_COUNT] as usize;
    if declared == 0 || declared > MAX_PARTITIONS {
        return None;
    }

    let mut partitions = Vec::new();
    for slot in 0..declared {
        let at = OFF_TABLE + slot * ENTRY_LEN;
        let start =
            u32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]]) as u64;
        let len = u32::from_le_bytes([
            block[at + 4],
            block[at + 5],
            block[at + 6],
            block[at + 7],
        ]) as u64;
        if len == 0 || start + len > device_blocks {
            return None;
        }
        let name = util::clean_mac_name(&block[at + 8..at + 24]);
        partitions.push(Partition {
            name: if name.is_empty() {
                format!("Focus {}", slot + 1)
            } else {
                name
            },
            start_block: start,
            num_blocks: len,
        });
    }
    Some(partitions)
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    _leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() < 2 {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let device_blocks = img.num_blocks();

    for order in order_candidates(hint) {
        let Ok(block) = img.probe_read_block(0, order, SectorOrder::ProDos) else {
            continue;
        };
        if parse_partition_block(&block, device_blocks).is_some() {
            return Ok((order, FsFormat::FocusDrive));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub fn open_partitions(img: &mut DiskImage) -> Result<PartitionedFs, DiskImageError> {
    let device_blocks = img.num_blocks();
    let block = img.read_block(0)?;
    let partitions =
        parse_partition_block(&block, device_blocks).ok_or(DiskImageError::BadPartition)?;
    Ok(PartitionedFs {
        format: FsFormat::FocusDrive,
        partitions,
    })
}
