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

    src/fs/dos33.rs

    DOS 3.2/3.3. The VTOC lives at track 17 sector 0; catalog sectors
    chain down from (17,15); each file's sectors are named by a chain of
    track/sector list sectors.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, FileEntry, FileLocator, Leniency},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError, SECTOR_SIZE,
};

pub const VTOC_TRACK: usize = 17;
pub const VTOC_SECTOR: usize = 0;
const CATALOG_ENTRY_LEN: usize = 35;
const CATALOG_ENTRIES_PER_SECTOR: usize = 7;
const MAX_TS_PAIRS: usize = 122;
/// Upper bound on catalog / TS-list chain length; anything longer is a
/// directory loop.
const MAX_CHAIN: usize = 512;

fn vtoc_plausible(vtoc: &[u8], num_tracks: usize, spt: usize, leniency: Leniency) -> bool {
    let cat_track = vtoc[0x01] as usize;
    let cat_sector = vtoc[0x02] as usize;
    let release = vtoc[0x03];
    let tracks_per_disk = vtoc[0x34] as usize;
    let sectors_per_track = vtoc[0x35] as usize;

    if cat_track == 0 || cat_track >= num_tracks || cat_sector >= spt {
        return false;
    }
    if leniency == Leniency::Very {
        // An override only demands a usable catalog pointer.
        return true;
    }
    if !(1..=3).contains(&release) && release != 0 {
        return false;
    }
    tracks_per_disk == num_tracks && sectors_per_track == spt
}

/// Probe for DOS 3.2/3.3 under each candidate ordering.
pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_sectors() || img.num_tracks() <= VTOC_TRACK {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let num_tracks = img.num_tracks();
    let spt = img.sectors_per_track();
    // Standalone DOS volumes, plus the 32-sector halves of a paired
    // (OzDOS) disk. Other 32-sector layouts are UNIDOS's problem.
    if spt != 13 && spt != 16 && !(spt == 32 && img.is_paired()) {
        return Err(DiskImageError::FilesystemNotFound);
    }

    for order in order_candidates(hint) {
        let Ok(vtoc) = img.probe_read_sector(VTOC_TRACK, VTOC_SECTOR, order, SectorOrder::Dos)
        else {
            continue;
        };
        if !vtoc_plausible(&vtoc, num_tracks, spt, leniency) {
            continue;
        }

        // Confirm the first catalog sector links sanely.
        let cat_track = vtoc[0x01] as usize;
        let cat_sector = vtoc[0x02] as usize;
        let Ok(cat) = img.probe_read_sector(cat_track, cat_sector, order, SectorOrder::Dos) else {
            continue;
        };
        let next_track = cat[0x01] as usize;
        let next_sector = cat[0x02] as usize;
        if next_track >= num_tracks || next_sector >= spt {
            if leniency == Leniency::Not {
                continue;
            }
        }

        let format = if spt == 13 {
            FsFormat::Dos32
        } else {
            FsFormat::Dos33
        };
        return Ok((order, format));
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub struct DosFs {
    volume_number: u8,
    catalog_track: usize,
    catalog_sector: usize,
}

impl DosFs {
    pub fn open(img: &mut DiskImage) -> Result<DosFs, DiskImageError> {
        let vtoc = img.read_track_sector(VTOC_TRACK, VTOC_SECTOR)?;
        Ok(DosFs {
            volume_number: vtoc[0x06],
            catalog_track: vtoc[0x01] as usize,
            catalog_sector: vtoc[0x02] as usize,
        })
    }

    pub fn volume_name(&self) -> String {
        format!("DOS Volume {}", self.volume_number)
    }

    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        let mut entries = Vec::new();
        let mut track = self.catalog_track;
        let mut sector = self.catalog_sector;
        let mut hops = 0;

        img.update_scan_progress(Some(&self.volume_name()))?;

        while track != 0 {
            if hops >= MAX_CHAIN {
                return Err(DiskImageError::DirectoryLoop);
            }
            hops += 1;

            let cat = img.read_track_sector(track, sector)?;
            for i in 0..CATALOG_ENTRIES_PER_SECTOR {
                let entry = &cat[0x0b + i * CATALOG_ENTRY_LEN..0x0b + (i + 1) * CATALOG_ENTRY_LEN];
                let ts_track = entry[0];
                if ts_track == 0 || ts_track == 0xff {
                    // unused or deleted
                    continue;
                }
                let type_byte = entry[2];
                let name: String = entry[3..33].iter().map(|&b| util::low_ascii(b)).collect();
                let sectors = u16::from_le_bytes([entry[33], entry[34]]) as u64;

                entries.push(FileEntry {
                    name: name.trim_end().to_string(),
                    kind: dos_file_type(type_byte).to_string(),
                    size: sectors * SECTOR_SIZE as u64,
                    locked: type_byte & 0x80 != 0,
                    locator: FileLocator::TsList {
                        track: ts_track as usize,
                        sector: entry[1] as usize,
                    },
                });
                img.update_scan_progress(None)?;
            }

            track = cat[0x01] as usize;
            sector = cat[0x02] as usize;
        }
        Ok(entries)
    }

    pub fn read_file(
        &self,
        img: &mut DiskImage,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, DiskImageError> {
        let FileLocator::TsList { mut track, mut sector } = entry.locator else {
            return Err(DiskImageError::BadFile);
        };

        let mut data = Vec::new();
        let mut hops = 0;
        while track != 0 {
            if hops >= MAX_CHAIN {
                return Err(DiskImageError::FileLoop);
            }
            hops += 1;

            let ts_list = img.read_track_sector(track, sector)?;
            for pair in 0..MAX_TS_PAIRS {
                let t = ts_list[0x0c + pair * 2] as usize;
                let s = ts_list[0x0c + pair * 2 + 1] as usize;
                if t == 0 && s == 0 {
                    continue; // sparse or end
                }
                data.extend_from_slice(&img.read_track_sector(t, s)?);
            }
            track = ts_list[0x01] as usize;
            sector = ts_list[0x02] as usize;
        }
        Ok(data)
    }
}

fn dos_file_type(type_byte: u8) -> &'static str {
    match type_byte & 0x7f {
        0x00 => "T",
        0x01 => "I",
        0x02 => "A",
        0x04 => "B",
        0x08 => "S",
        0x10 => "R",
        0x20 => "A2",
        0x40 => "B2",
        _ => "?",
    }
}

/// Write empty DOS 3.3 structures: VTOC, free-sector bitmap and a
/// zero-entry catalog chain. The image should already be zeroed.
pub fn format(img: &mut DiskImage, _volume_name: &str) -> Result<(), DiskImageError> {
    let num_tracks = img.num_tracks();
    let spt = img.sectors_per_track();
    if spt != 16 || num_tracks <= VTOC_TRACK {
        return Err(DiskImageError::InvalidCreateReq);
    }
    let volume = img.dos_volume_number().unwrap_or(254);

    let mut vtoc = [0u8; SECTOR_SIZE];
    vtoc[0x01] = VTOC_TRACK as u8;
    vtoc[0x02] = (spt - 1) as u8;
    vtoc[0x03] = 3; // DOS release
    vtoc[0x06] = volume;
    vtoc[0x27] = MAX_TS_PAIRS as u8;
    vtoc[0x30] = (VTOC_TRACK + 1) as u8; // last allocated
    vtoc[0x31] = 1; // allocation direction
    vtoc[0x34] = num_tracks as u8;
    vtoc[0x35] = spt as u8;
    vtoc[0x36..0x38].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());

    // Free bitmap: 4 bytes per track; tracks 0-2 (DOS image), the VTOC
    // track and the boot track stay allocated.
    for track in 0..num_tracks.min(50) {
        let free = track > 2 && track != VTOC_TRACK;
        let bits: u32 = if free { 0xffff_0000 } else { 0 };
        vtoc[0x38 + track * 4..0x38 + track * 4 + 4].copy_from_slice(&bits.to_be_bytes());
    }
    img.write_track_sector(VTOC_TRACK, VTOC_SECTOR, &vtoc)?;

    // Catalog chain: sector 15 links down to sector 1.
    for sector in (1..spt).rev() {
        let mut cat = [0u8; SECTOR_SIZE];
        if sector > 1 {
            cat[0x01] = VTOC_TRACK as u8;
            cat[0x02] = (sector - 1) as u8;
        }
        img.write_track_sector(VTOC_TRACK, sector, &cat)?;
        img.check_cancel()?;
    }

    log::debug!("dos33::format(): volume {} formatted", volume);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_types_render_as_letters() {
        assert_eq!(dos_file_type(0x00), "T");
        assert_eq!(dos_file_type(0x84), "B"); // locked B
        assert_eq!(dos_file_type(0x7f), "?");
    }
}
