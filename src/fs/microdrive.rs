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

    src/fs/microdrive.rs

    ///SHH Systeme MicroDrive cards: block 0 holds a signature word and
    two eight-slot tables of partition start blocks and lengths.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, Leniency, Partition, PartitionedFs},
    types::enums::{FsFormat, SectorOrder},
    DiskImageError,
};

const SIGNATURE: u16 = 0xccca;
const MAX_PARTITIONS: usize = 8;
const OFF_PART_COUNT: usize = 0x0c;
const OFF_START_TABLE: usize = 0x20;
const OFF_LEN_TABLE: usize = 0x40;

fn le32(buf: &[u8], at: usize) -> u64 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as u64
}

fn parse_partition_block(block: &[u8], device_blocks: u64) -> Option<Vec<Partition>> {
    if u16::from_le_bytes([block[0], block[1]]) != SIGNATURE {
        return None;
    }
    let declared = block[OFF_PART_COUNT] as usize;
    if declared == 0 || declared > MAX_PARTITIONS {
        return None;
    }

    let mut partitions = Vec::new();
    for slot in 0..declared {
        let start = le32(block, OFF_START_TABLE + slot * 4);
        let len = le32(block, OFF_LEN_TABLE + slot * 4);
        if len == 0 {
            continue;
        }
        if start + len > device_blocks {
            return None;
        }
        partitions.push(Partition {
            name: format!("MicroDrive {}", slot + 1),
            start_block: start,
            num_blocks: len,
        });
    }
    if partitions.is_empty() {
        None
    } else {
        Some(partitions)
    }
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
            return Ok((order, FsFormat::MicroDrive));
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
        format: FsFormat::MicroDrive,
        partitions,
    })
}
