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

    src/fs/pascal.rs

    UCSD Pascal volumes. The directory is a contiguous run of blocks
    starting at block 2; files are contiguous block runs described by
    26-byte entries.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, FileEntry, FileLocator, Leniency},
    types::enums::{FsFormat, SectorOrder},
    DiskImageError, BLOCK_SIZE,
};

const DIR_START_BLOCK: u64 = 2;
const ENTRY_LEN: usize = 26;
const MAX_FILES: usize = 77;

fn volume_header_plausible(dir: &[u8], num_blocks: u64, leniency: Leniency) -> bool {
    // Volume entry: first_block(2) last_block(2) file_type(2)
    // name_len(1) name(7) total_blocks(2) num_files(2) ...
    let first_block = u16::from_le_bytes([dir[0], dir[1]]) as u64;
    let last_block = u16::from_le_bytes([dir[2], dir[3]]) as u64;
    let name_len = dir[6] as usize;

    if first_block != 0 || last_block <= DIR_START_BLOCK {
        return false;
    }
    if name_len == 0 || name_len > 7 {
        return false;
    }
    if !dir[7..7 + name_len]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'.')
    {
        return false;
    }
    if leniency == Leniency::Very {
        return true;
    }
    let total_blocks = u16::from_le_bytes([dir[14], dir[15]]) as u64;
    let num_files = u16::from_le_bytes([dir[16], dir[17]]) as usize;
    total_blocks > 0 && total_blocks <= num_blocks && num_files <= MAX_FILES
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() <= DIR_START_BLOCK {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let num_blocks = img.num_blocks();

    for order in order_candidates(hint) {
        let Ok(dir) = img.probe_read_block(DIR_START_BLOCK, order, SectorOrder::ProDos) else {
            continue;
        };
        if volume_header_plausible(&dir, num_blocks, leniency) {
            return Ok((order, FsFormat::Pascal));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub struct PascalFs {
    volume_name: String,
    dir_last_block: u64,
    num_files: usize,
}

impl PascalFs {
    pub fn open(img: &mut DiskImage) -> Result<PascalFs, DiskImageError> {
        let dir = img.read_block(DIR_START_BLOCK)?;
        let name_len = (dir[6] as usize).min(7);
        Ok(PascalFs {
            volume_name: String::from_utf8_lossy(&dir[7..7 + name_len]).to_string(),
            dir_last_block: u16::from_le_bytes([dir[2], dir[3]]) as u64,
            num_files: u16::from_le_bytes([dir[16], dir[17]]) as usize,
        })
    }

    pub fn volume_name(&self) -> String {
        format!("{}:", self.volume_name)
    }

    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        img.update_scan_progress(Some(&self.volume_name()))?;

        // The directory is contiguous; read it whole.
        let dir_blocks = self.dir_last_block.saturating_sub(DIR_START_BLOCK);
        let mut dir = Vec::with_capacity((dir_blocks as usize) * BLOCK_SIZE);
        for block in DIR_START_BLOCK..self.dir_last_block {
            dir.extend_from_slice(&img.read_block(block)?);
        }

        let mut entries = Vec::new();
        for i in 1..=self.num_files.min(MAX_FILES) {
            let at = i * ENTRY_LEN;
            if at + ENTRY_LEN > dir.len() {
                return Err(DiskImageError::BadDirectory);
            }
            let entry = &dir[at..at + ENTRY_LEN];
            let first = u16::from_le_bytes([entry[0], entry[1]]) as u64;
            let past_last = u16::from_le_bytes([entry[2], entry[3]]) as u64;
            let file_type = entry[4] & 0x0f;
            let name_len = (entry[6] as usize).min(15);
            if first == 0 && past_last == 0 {
                continue;
            }
            if past_last <= first {
                return Err(DiskImageError::BadDirectory);
            }
            let last_bytes = u16::from_le_bytes([entry[22], entry[23]]) as u64;

            entries.push(FileEntry {
                name: String::from_utf8_lossy(&entry[7..7 + name_len]).to_string(),
                kind: pascal_file_type(file_type).to_string(),
                size: (past_last - first - 1) * BLOCK_SIZE as u64 + last_bytes,
                locked: false,
                locator: FileLocator::BlockRun {
                    first,
                    past_last,
                    last_bytes,
                },
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
        let FileLocator::BlockRun {
            first,
            past_last,
            last_bytes,
        } = entry.locator
        else {
            return Err(DiskImageError::BadFile);
        };

        let mut data = Vec::new();
        for block in first..past_last {
            data.extend_from_slice(&img.read_block(block)?);
        }
        let keep = data
            .len()
            .saturating_sub(BLOCK_SIZE)
            .saturating_add(last_bytes as usize);
        data.truncate(keep);
        Ok(data)
    }
}

fn pascal_file_type(file_type: u8) -> &'static str {
    match file_type {
        0 => "None",
        1 => "Bad",
        2 => "Code",
        3 => "Text",
        4 => "Info",
        5 => "Data",
        6 => "Graf",
        7 => "Foto",
        _ => "Sdir",
    }
}
