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

    src/fs/cffa.rs

    CFFA CompactFlash cards. There is no partition map: volumes sit at
    fixed 32MB boundaries (with an 8-volume variant using 1GB spacing
    for the tail). Identification therefore insists on finding multiple
    ProDOS volumes at the expected offsets, and must run after
    MicroDrive, whose cards still look like valid CFFA unless zeroed.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, prodos, Leniency, Partition, PartitionedFs},
    types::enums::{FsFormat, SectorOrder},
    DiskImageError,
};

/// 32MB in 512-byte blocks.
const VOLUME_SPACING: u64 = 65_536;
const MAX_VOLUMES: u64 = 8;

/// A ProDOS volume rooted at `base`: check the volume directory key
/// block and pull its name and size.
fn prodos_volume_at(
    img: &mut DiskImage,
    order: SectorOrder,
    base: u64,
) -> Option<(String, u64)> {
    let key = img
        .probe_read_block(base + prodos::VOLUME_KEY_BLOCK, order, SectorOrder::ProDos)
        .ok()?;
    let storage = key[4] >> 4;
    let name_len = (key[4] & 0x0f) as usize;
    if storage != 0xf || name_len == 0 || name_len > 15 {
        return None;
    }
    let total_blocks = u16::from_le_bytes([key[0x29], key[0x2a]]) as u64;
    if total_blocks == 0 {
        return None;
    }
    Some((
        String::from_utf8_lossy(&key[5..5 + name_len]).to_string(),
        total_blocks,
    ))
}

fn scan_volumes(img: &mut DiskImage, order: SectorOrder) -> Vec<Partition> {
    let mut partitions = Vec::new();
    let device_blocks = img.num_blocks();

    for slot in 0..MAX_VOLUMES {
        let base = slot * VOLUME_SPACING;
        if base + prodos::VOLUME_KEY_BLOCK >= device_blocks {
            break;
        }
        if let Some((name, total_blocks)) = prodos_volume_at(img, order, base) {
            let extent = total_blocks.min(device_blocks - base);
            partitions.push(Partition {
                name: format!("/{}", name),
                start_block: base,
                num_blocks: extent,
            });
        }
    }
    partitions
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    // Must be bigger than one 32MB slot, or there is nothing to find.
    if !img.has_blocks() || img.num_blocks() <= VOLUME_SPACING {
        return Err(DiskImageError::FilesystemNotFound);
    }

    for order in order_candidates(hint) {
        let volumes = scan_volumes(img, order);
        // Without a partition map we insist on multiple volumes; a
        // single volume at zero is just ProDOS.
        let enough = match leniency {
            Leniency::Not => volumes.len() >= 2,
            Leniency::Very => !volumes.is_empty(),
        };
        if enough {
            let format = if volumes.len() > 6 {
                FsFormat::Cffa8
            } else {
                FsFormat::Cffa4
            };
            return Ok((order, format));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub fn open_partitions(img: &mut DiskImage) -> Result<PartitionedFs, DiskImageError> {
    let partitions = scan_volumes(img, img.order());
    if partitions.is_empty() {
        return Err(DiskImageError::BadPartition);
    }
    Ok(PartitionedFs {
        format: img.fs_format(),
        partitions,
    })
}
