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

    src/fs/cpm.rs

    CP/M on 5.25" Apple hardware: three reserved tracks, 1K allocation
    blocks, and a 2K directory at the start of track 3. A file is a set
    of 32-byte extents, each naming up to sixteen allocation blocks.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, FileEntry, FileLocator, Leniency},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError, SECTOR_SIZE,
};

const DIR_TRACK: usize = 3;
const DIR_LEN: usize = 2048;
const ENTRY_LEN: usize = 32;
const ALLOC_BLOCK_LEN: usize = 1024;
const RESERVED_TRACKS: usize = 3;
const RECORD_LEN: u64 = 128;

const ENTRY_UNUSED: u8 = 0xe5;

fn read_directory(
    img: &mut DiskImage,
    order: SectorOrder,
) -> Result<Vec<u8>, DiskImageError> {
    let mut dir = Vec::with_capacity(DIR_LEN);
    for sector in 0..DIR_LEN / SECTOR_SIZE {
        dir.extend_from_slice(&img.probe_read_sector(
            DIR_TRACK,
            sector,
            order,
            SectorOrder::Cpm,
        )?);
    }
    Ok(dir)
}

fn directory_plausible(dir: &[u8], leniency: Leniency) -> bool {
    let mut in_use = 0;
    for entry in dir.chunks_exact(ENTRY_LEN) {
        let user = entry[0];
        if user == ENTRY_UNUSED {
            continue;
        }
        if user > 31 {
            return false;
        }
        // Filename characters are 7-bit printable; high bits carry
        // attribute flags in the extension.
        if !entry[1..9].iter().all(|&b| {
            let c = b & 0x7f;
            (0x20..0x7f).contains(&c)
        }) {
            return false;
        }
        in_use += 1;
    }
    if leniency == Leniency::Very {
        return true;
    }
    // An all-0xE5 directory is a freshly formatted disk; accept it, but
    // reject an all-zero region (that's much more likely DOS data).
    in_use > 0 || dir.iter().all(|&b| b == ENTRY_UNUSED)
}

pub fn test_fs(
    img: &mut DiskImage,
    _hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_sectors()
        || img.sectors_per_track() != 16
        || img.num_tracks() <= DIR_TRACK
    {
        return Err(DiskImageError::FilesystemNotFound);
    }

    // CP/M ordering is not in the standard candidate set, but the CP/M
    // probe must of course consider it.
    let mut candidates = order_candidates(SectorOrder::Dos);
    candidates.push(SectorOrder::Cpm);

    for order in candidates {
        let Ok(dir) = read_directory(img, order) else {
            continue;
        };
        if directory_plausible(&dir, leniency) {
            return Ok((order, FsFormat::Cpm));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub struct CpmFs {}

impl CpmFs {
    pub fn open(_img: &mut DiskImage) -> Result<CpmFs, DiskImageError> {
        Ok(CpmFs {})
    }

    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        img.update_scan_progress(Some("CP/M"))?;

        let mut dir = Vec::with_capacity(DIR_LEN);
        for sector in 0..DIR_LEN / SECTOR_SIZE {
            dir.extend_from_slice(&img.read_track_sector(DIR_TRACK, sector)?);
        }

        // Collapse multi-extent files into one entry apiece, in extent
        // order.
        let mut entries: Vec<FileEntry> = Vec::new();
        let mut extents: Vec<(String, u8, Vec<(u8, Vec<u16>, u64)>)> = Vec::new();

        for entry in dir.chunks_exact(ENTRY_LEN) {
            if entry[0] == ENTRY_UNUSED || entry[0] > 31 {
                continue;
            }
            let base: String = entry[1..9].iter().map(|&b| util::low_ascii(b)).collect();
            let ext: String = entry[9..12].iter().map(|&b| util::low_ascii(b)).collect();
            let name = format!("{}.{}", base.trim_end(), ext.trim_end());
            let read_only = entry[9] & 0x80 != 0;
            let extent_no = entry[12];
            let records = entry[15] as u64;
            let blocks: Vec<u16> = entry[16..32]
                .iter()
                .filter(|&&b| b != 0)
                .map(|&b| b as u16)
                .collect();

            match extents.iter_mut().find(|(n, _, _)| *n == name) {
                Some((_, _, parts)) => parts.push((extent_no, blocks, records)),
                None => extents.push((
                    name,
                    read_only as u8,
                    vec![(extent_no, blocks, records)],
                )),
            }
        }

        for (name, read_only, mut parts) in extents {
            parts.sort_by_key(|p| p.0);
            let records: u64 = parts.iter().map(|p| p.2).sum();
            let blocks: Vec<u16> = parts.into_iter().flat_map(|p| p.1).collect();
            entries.push(FileEntry {
                name,
                kind: "CPM".to_string(),
                size: records * RECORD_LEN,
                locked: read_only != 0,
                locator: FileLocator::CpmBlocks { blocks, records },
            });
            img.update_scan_progress(None)?;
        }
        Ok(entries)
    }

    pub fn read_file(
        &self,
        img: &mut DiskImage,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, DiskImageError> {
        let FileLocator::CpmBlocks { ref blocks, records } = entry.locator else {
            return Err(DiskImageError::BadFile);
        };

        let spt = img.sectors_per_track();
        let sectors_per_alloc = ALLOC_BLOCK_LEN / SECTOR_SIZE;
        let mut data = Vec::new();

        for &alloc in blocks {
            // Allocation block 0 is the directory; file blocks count
            // from the directory onward, after the reserved tracks.
            let first_sector =
                RESERVED_TRACKS * spt + alloc as usize * sectors_per_alloc;
            for s in 0..sectors_per_alloc {
                let abs = first_sector + s;
                let track = abs / spt;
                let sector = abs % spt;
                data.extend_from_slice(&img.read_track_sector(track, sector)?);
            }
        }
        data.truncate((records * RECORD_LEN) as usize);
        Ok(data)
    }
}
