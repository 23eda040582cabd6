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

    src/fs/prodos.rs

    ProDOS. The volume directory key block sits at block 2; file entries
    carry a storage type (seedling/sapling/tree) naming the shape of the
    block index structure under the key pointer.
*/

use crate::{
    diskimage::DiskImage,
    fs::{order_candidates, FileEntry, FileLocator, Leniency},
    types::enums::{FsFormat, SectorOrder},
    DiskImageError, BLOCK_SIZE,
};

pub const VOLUME_KEY_BLOCK: u64 = 2;
const ENTRY_LEN: usize = 0x27;
const ENTRIES_PER_BLOCK: usize = 0x0d;

const STORAGE_SEEDLING: u8 = 0x1;
const STORAGE_SAPLING: u8 = 0x2;
const STORAGE_TREE: u8 = 0x3;
const STORAGE_SUBDIR: u8 = 0xd;
const STORAGE_SUBDIR_HEADER: u8 = 0xe;
const STORAGE_VOLUME_HEADER: u8 = 0xf;

const MAX_DIR_BLOCKS: usize = 512;
const MAX_DEPTH: usize = 16;

fn name_ok(name: &[u8]) -> bool {
    !name.is_empty()
        && name[0].is_ascii_alphabetic()
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'.')
}

fn key_block_plausible(block: &[u8], num_blocks: u64, leniency: Leniency) -> bool {
    let storage = block[4] >> 4;
    let name_len = (block[4] & 0x0f) as usize;
    if storage != STORAGE_VOLUME_HEADER || name_len == 0 || name_len > 15 {
        return false;
    }
    if !name_ok(&block[5..5 + name_len]) {
        return false;
    }
    if leniency == Leniency::Very {
        return true;
    }
    let entry_len = block[0x23];
    let entries_per_block = block[0x24];
    let total_blocks = u16::from_le_bytes([block[0x29], block[0x2a]]) as u64;
    entry_len == ENTRY_LEN as u8
        && entries_per_block == ENTRIES_PER_BLOCK as u8
        && total_blocks > 0
        && total_blocks <= num_blocks
}

pub fn test_fs(
    img: &mut DiskImage,
    hint: SectorOrder,
    leniency: Leniency,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() <= VOLUME_KEY_BLOCK {
        return Err(DiskImageError::FilesystemNotFound);
    }
    let num_blocks = img.num_blocks();

    for order in order_candidates(hint) {
        let Ok(block) = img.probe_read_block(VOLUME_KEY_BLOCK, order, SectorOrder::ProDos) else {
            continue;
        };
        if key_block_plausible(&block, num_blocks, leniency) {
            return Ok((order, FsFormat::ProDos));
        }
    }
    Err(DiskImageError::FilesystemNotFound)
}

pub struct ProDosFs {
    volume_name: String,
    total_blocks: u64,
}

impl ProDosFs {
    pub fn open(img: &mut DiskImage) -> Result<ProDosFs, DiskImageError> {
        let key = img.read_block(VOLUME_KEY_BLOCK)?;
        let name_len = (key[4] & 0x0f) as usize;
        let volume_name = String::from_utf8_lossy(&key[5..5 + name_len]).to_string();
        let total_blocks = u16::from_le_bytes([key[0x29], key[0x2a]]) as u64;
        Ok(ProDosFs {
            volume_name,
            total_blocks,
        })
    }

    pub fn volume_name(&self) -> String {
        format!("/{}", self.volume_name)
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        img.update_scan_progress(Some(&self.volume_name()))?;
        let mut entries = Vec::new();
        self.walk_directory(img, VOLUME_KEY_BLOCK, "", 0, &mut entries)?;
        Ok(entries)
    }

    fn walk_directory(
        &self,
        img: &mut DiskImage,
        key_block: u64,
        prefix: &str,
        depth: usize,
        out: &mut Vec<FileEntry>,
    ) -> Result<(), DiskImageError> {
        if depth >= MAX_DEPTH {
            return Err(DiskImageError::DirectoryLoop);
        }

        let mut block_num = key_block;
        let mut hops = 0;
        let mut first = true;

        while block_num != 0 {
            if hops >= MAX_DIR_BLOCKS {
                return Err(DiskImageError::DirectoryLoop);
            }
            hops += 1;

            let block = img.read_block(block_num)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if first && slot == 0 {
                    // header entry
                    continue;
                }
                let at = 4 + slot * ENTRY_LEN;
                let entry = &block[at..at + ENTRY_LEN];
                let storage = entry[0] >> 4;
                let name_len = (entry[0] & 0x0f) as usize;
                if storage == 0 || name_len == 0 {
                    continue;
                }

                let name = format!(
                    "{}{}",
                    prefix,
                    String::from_utf8_lossy(&entry[1..1 + name_len])
                );
                let file_type = entry[0x10];
                let key_pointer = u16::from_le_bytes([entry[0x11], entry[0x12]]) as u64;
                let eof = u32::from_le_bytes([entry[0x15], entry[0x16], entry[0x17], 0]) as u64;
                let access = entry[0x1e];

                match storage {
                    STORAGE_SUBDIR => {
                        out.push(FileEntry {
                            name: name.clone(),
                            kind: "DIR".to_string(),
                            size: eof,
                            locked: access & 0x02 == 0,
                            locator: FileLocator::None,
                        });
                        let sub_prefix = format!("{}/", name);
                        self.walk_directory(img, key_pointer, &sub_prefix, depth + 1, out)?;
                    }
                    STORAGE_SEEDLING | STORAGE_SAPLING | STORAGE_TREE => {
                        out.push(FileEntry {
                            name,
                            kind: prodos_file_type(file_type),
                            size: eof,
                            locked: access & 0x02 == 0,
                            locator: FileLocator::ProDos {
                                key_block: key_pointer,
                                storage_type: storage,
                                eof,
                            },
                        });
                        img.update_scan_progress(None)?;
                    }
                    STORAGE_SUBDIR_HEADER | STORAGE_VOLUME_HEADER => {}
                    other => {
                        log::trace!("walk_directory(): odd storage type {:x}", other);
                    }
                }
            }

            block_num = u16::from_le_bytes([block[2], block[3]]) as u64;
            first = false;
        }
        Ok(())
    }

    pub fn read_file(
        &self,
        img: &mut DiskImage,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, DiskImageError> {
        let FileLocator::ProDos {
            key_block,
            storage_type,
            eof,
        } = entry.locator
        else {
            return Err(DiskImageError::BadFile);
        };

        let mut data = Vec::new();
        match storage_type {
            STORAGE_SEEDLING => {
                data.extend_from_slice(&img.read_block(key_block)?);
            }
            STORAGE_SAPLING => {
                read_index_block(img, key_block, &mut data)?;
            }
            STORAGE_TREE => {
                let master = img.read_block(key_block)?;
                for i in 0..128 {
                    let index = block_pointer(&master, i);
                    if index == 0 {
                        data.resize(data.len() + 128 * BLOCK_SIZE, 0);
                    } else {
                        read_index_block(img, index, &mut data)?;
                    }
                    if data.len() as u64 >= eof {
                        break;
                    }
                }
            }
            _ => return Err(DiskImageError::BadFile),
        }

        data.truncate(eof as usize);
        Ok(data)
    }
}

/// Pointers in index blocks are split: low bytes in the first half,
/// high bytes in the second.
fn block_pointer(index_block: &[u8], slot: usize) -> u64 {
    u16::from_le_bytes([index_block[slot], index_block[slot + 256]]) as u64
}

fn read_index_block(
    img: &mut DiskImage,
    index: u64,
    data: &mut Vec<u8>,
) -> Result<(), DiskImageError> {
    let index_block = img.read_block(index)?;
    for i in 0..256 {
        let pointer = block_pointer(&index_block, i);
        if pointer == 0 {
            // sparse
            data.resize(data.len() + BLOCK_SIZE, 0);
        } else {
            data.extend_from_slice(&img.read_block(pointer)?);
        }
    }
    Ok(())
}

fn prodos_file_type(file_type: u8) -> String {
    match file_type {
        0x00 => "UNK".to_string(),
        0x04 => "TXT".to_string(),
        0x06 => "BIN".to_string(),
        0x0f => "DIR".to_string(),
        0x19 => "ADB".to_string(),
        0x1a => "AWP".to_string(),
        0x1b => "ASP".to_string(),
        0xfc => "BAS".to_string(),
        0xfd => "VAR".to_string(),
        0xfe => "REL".to_string(),
        0xff => "SYS".to_string(),
        other => format!("${:02X}", other),
    }
}

/// Write an empty volume: directory key/chain blocks 2-5 and the volume
/// bitmap at block 6.
pub fn format(img: &mut DiskImage, volume_name: &str) -> Result<(), DiskImageError> {
    if !img.has_blocks() || img.num_blocks() < 8 {
        return Err(DiskImageError::InvalidCreateReq);
    }
    let total_blocks = img.num_blocks().min(0xffff);
    let name: Vec<u8> = volume_name
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'.')
        .take(15)
        .collect();
    if name.is_empty() || !name[0].is_ascii_alphabetic() {
        return Err(DiskImageError::InvalidArg);
    }

    // Directory chain: blocks 2..=5.
    for dir_block in 2u64..=5 {
        let mut block = [0u8; BLOCK_SIZE];
        let prev = if dir_block == 2 { 0 } else { dir_block - 1 } as u16;
        let next = if dir_block == 5 { 0 } else { dir_block + 1 } as u16;
        block[0..2].copy_from_slice(&prev.to_le_bytes());
        block[2..4].copy_from_slice(&next.to_le_bytes());

        if dir_block == 2 {
            block[4] = (STORAGE_VOLUME_HEADER << 4) | name.len() as u8;
            block[5..5 + name.len()].copy_from_slice(&name);
            block[0x23] = ENTRY_LEN as u8;
            block[0x24] = ENTRIES_PER_BLOCK as u8;
            block[0x25..0x27].copy_from_slice(&0u16.to_le_bytes()); // file count
            block[0x27..0x29].copy_from_slice(&6u16.to_le_bytes()); // bitmap pointer
            block[0x29..0x2b].copy_from_slice(&(total_blocks as u16).to_le_bytes());
        }
        img.write_block(dir_block, &block)?;
        img.check_cancel()?;
    }

    // Volume bitmap: one bit per block, 1 = free. Blocks 0-6 are used.
    let bitmap_blocks = total_blocks.div_ceil(BLOCK_SIZE as u64 * 8);
    let mut marked = vec![true; total_blocks as usize];
    for used in 0..=(6 + bitmap_blocks - 1).min(total_blocks - 1) {
        marked[used as usize] = false;
    }
    for bm in 0..bitmap_blocks {
        let mut block = [0u8; BLOCK_SIZE];
        for bit in 0..(BLOCK_SIZE * 8) {
            let idx = bm as usize * BLOCK_SIZE * 8 + bit;
            if idx < marked.len() && marked[idx] {
                block[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        img.write_block(6 + bm, &block)?;
    }

    log::debug!(
        "prodos::format(): /{} with {} blocks",
        String::from_utf8_lossy(&name),
        total_blocks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_types_map() {
        assert_eq!(prodos_file_type(0xff), "SYS");
        assert_eq!(prodos_file_type(0x42), "$42");
    }

    #[test]
    fn index_pointers_split_low_high() {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[3] = 0x34;
        block[3 + 256] = 0x12;
        assert_eq!(block_pointer(&block, 3), 0x1234);
    }
}
