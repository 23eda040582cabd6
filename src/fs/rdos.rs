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

    src/fs/rdos.rs

    SSI's RDOS, in its three flavors: RDOS 3.3 (16-sector), RDOS 3.2
    (13-sector) and "RDOS 3" (13-sector layout cracked onto 16-sector
    disks). The catalog lives on track 1; the first entry names the
    system and doubles as the format signature. Files are contiguous
    sector runs.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, FileEntry, FileLocator, Leniency},
    types::enums::{FsFormat, SectorOrder},
    util, DiskImageError, SECTOR_SIZE,
};

const CATALOG_TRACK: usize = 1;
const ENTRY_LEN: usize = 32;

fn catalog_signature_ok(sector: &[u8]) -> bool {
    // First catalog entry is the system, e.g. "RDOS 2.1 ...".
    let name: String = sector[0..24].iter().map(|&b| util::low_ascii(b)).collect();
    name.starts_with("RDOS")
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    _leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_sectors() || img.num_tracks() <= CATALOG_TRACK {
        return Err(DiskImageError::FilesystemNotFound);
    }

    match img.sectors_per_track() {
        13 => {
            // 13-sector disks have no order translation to try.
            let sector = img.probe_read_sector(
                CATALOG_TRACK,
                0,
                SectorOrder::Physical,
                SectorOrder::Physical,
            )?;
            if catalog_signature_ok(&sector) {
                return Ok((SectorOrder::Physical, FsFormat::Rdos32));
            }
        }
        16 => {
            for order in order_candidates(hint) {
                // RDOS 3.3 proper addresses sectors in ProDOS skew.
                if let Ok(sector) =
                    img.probe_read_sector(CATALOG_TRACK, 0, order, SectorOrder::ProDos)
                {
                    if catalog_signature_ok(&sector) {
                        return Ok((order, FsFormat::Rdos33));
                    }
                }
                // A cracked 13-sector image reads physically.
                if let Ok(sector) =
                    img.probe_read_sector(CATALOG_TRACK, 0, order, SectorOrder::Physical)
                {
                    if catalog_signature_ok(&sector) {
                        return Ok((order, FsFormat::Rdos3));
                    }
                }
            }
        }
        _ => {}
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub struct RdosFs {
    format: FsFormat,
    system_name: String,
}

impl RdosFs {
    pub fn open(img: &mut DiskImage) -> Result<RdosFs, DiskImageError> {
        let sector = img.read_track_sector(CATALOG_TRACK, 0)?;
        let name: String = sector[0..24].iter().map(|&b| util::low_ascii(b)).collect();
        Ok(RdosFs {
            format: img.fs_format(),
            system_name: name.trim_end().to_string(),
        })
    }

    pub fn volume_name(&self) -> String {
        self.system_name.clone()
    }

    /// Sectors per track as the catalog addresses them; the cracked
    /// variants use only thirteen of each track.
    fn effective_spt(&self) -> usize {
        match self.format {
            FsFormat::Rdos33 => 16,
            _ => 13,
        }
    }

    fn catalog_sectors(&self) -> usize {
        match self.format {
            FsFormat::Rdos33 => 11,
            _ => 13,
        }
    }

    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        img.update_scan_progress(Some(&self.system_name))?;

        let mut entries = Vec::new();
        for cat_sector in 0..self.catalog_sectors() {
            let sector = img.read_track_sector(CATALOG_TRACK, cat_sector)?;
            for slot in 0..SECTOR_SIZE / ENTRY_LEN {
                let entry = &sector[slot * ENTRY_LEN..(slot + 1) * ENTRY_LEN];
                if entry[0] == 0x00 {
                    continue; // never used
                }
                if entry[24] == 0x80 || entry[0] == 0x80 {
                    continue; // deleted
                }
                let name: String = entry[0..24].iter().map(|&b| util::low_ascii(b)).collect();
                let kind = match util::low_ascii(entry[24]) {
                    'A' => "A",
                    'B' => "B",
                    'T' => "T",
                    _ => "S",
                };
                let num_sectors = entry[25] as u64;
                let length = u16::from_le_bytes([entry[28], entry[29]]) as u64;
                let start = u16::from_le_bytes([entry[30], entry[31]]) as u64;

                entries.push(FileEntry {
                    name: name.trim_end().to_string(),
                    kind: kind.to_string(),
                    size: if length > 0 {
                        length
                    } else {
                        num_sectors * SECTOR_SIZE as u64
                    },
                    locked: false,
                    locator: FileLocator::SectorRun {
                        start,
                        count: num_sectors,
                    },
                });
                img.update_scan_progress(None)?;
            }
        }
        Ok(entries)
    }

    pub fn read_file(
        &self,
        img: &mut DiskImage,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, DiskImageError> {
        let FileLocator::SectorRun { start, count } = entry.locator else {
            return Err(DiskImageError::BadFile);
        };

        let spt = self.effective_spt();
        let mut data = Vec::with_capacity(count as usize * SECTOR_SIZE);
        for abs in start..start + count {
            let track = (abs as usize) / spt;
            let sector = (abs as usize) % spt;
            data.extend_from_slice(&img.read_track_sector(track, sector)?);
        }
        data.truncate(entry.size as usize);
        Ok(data)
    }
}
