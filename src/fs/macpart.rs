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

    src/fs/macpart.rs

    Apple partition map: a Driver Descriptor Record at block 0 and "PM"
    map entries from block 1 on, each naming a partition's start, extent
    and type.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, Leniency, Partition, PartitionedFs},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError,
};

const DDR_SIGNATURE: u16 = 0x4552; // 'ER'
const MAP_SIGNATURE: u16 = 0x504d; // 'PM'
const MAX_MAP_ENTRIES: u64 = 64;

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn scan_map(
    img: &mut DiskImage,
    order: SectorOrder,
    strict: bool,
) -> Result<Vec<Partition>, DiskImageError> {
    let first = img.probe_read_block(1, order, SectorOrder::ProDos)?;
    if be16(&first, 0) != MAP_SIGNATURE {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let map_entries = (be32(&first, 4) as u64).min(MAX_MAP_ENTRIES);
    if map_entries == 0 {
        return Err(DiskImageError::FilesystemNotFound);
    }

    let mut partitions = Vec::new();
    for i in 0..map_entries {
        let entry = img.probe_read_block(1 + i, order, SectorOrder::ProDos)?;
        if be16(&entry, 0) != MAP_SIGNATURE {
            if strict {
                return Err(DiskImageError::BadPartition);
            }
            break;
        }
        let start = be32(&entry, 8) as u64;
        let count = be32(&entry, 12) as u64;
        let name = util::clean_mac_name(&entry[16..48]);
        let part_type = util::clean_mac_name(&entry[48..80]);

        if start + count > img.num_blocks() {
            log::warn!("macpart: partition '{}' exceeds device; skipping", name);
            continue;
        }
        // The map itself appears as a partition; don't surface it.
        if part_type.contains("partition_map") {
            continue;
        }
        partitions.push(Partition {
            name: if name.is_empty() { part_type } else { name },
            start_block: start,
            num_blocks: count,
        });
    }

    if partitions.is_empty() {
        Err(DiskImageError::FilesystemNotFound)
    } else {
        Ok(partitions)
    }
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() < 4 {
        return Err(DiskImageError::FilesystemNotFound);
    }

    for order in order_candidates(hint) {
        let Ok(block0) = img.probe_read_block(0, order, SectorOrder::ProDos) else {
            continue;
        };
        // Some images omit the DDR; the map signature is authoritative.
        let has_ddr = be16(&block0, 0) == DDR_SIGNATURE;
        match scan_map(img, order, leniency == Leniency::Not) {
            Ok(_) => {
                if !has_ddr {
                    log::debug!("macpart: no DDR signature, map alone accepted");
                }
                return Ok((order, FsFormat::MacPart));
            }
            Err(_) if !has_ddr => continue,
            Err(_) => continue,
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub fn open_partitions(img: &mut DiskImage) -> Result<PartitionedFs, DiskImageError> {
    let partitions = scan_map(img, img.order(), false)?;
    Ok(PartitionedFs {
        format: FsFormat::MacPart,
        partitions,
    })
}
