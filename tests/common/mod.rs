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

    tests/common/mod.rs

    Support routines for the integration tests: in-memory constructors
    for the image formats the suites exercise.
*/
#![allow(dead_code)]

use std::path::PathBuf;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scratch path under the system temp dir, removed on drop.
pub struct ScratchFile {
    pub path: PathBuf,
}

impl ScratchFile {
    pub fn new(name: &str) -> ScratchFile {
        let path = std::env::temp_dir().join(format!(
            "nibfox-test-{}-{}",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        ScratchFile { path }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub const SECTOR: usize = 256;
pub const BLOCK: usize = 512;
pub const DOS_140K: usize = 35 * 16 * SECTOR;
pub const PRODOS_800K: usize = 1600 * BLOCK;

/// Build a 140K DOS 3.3 payload in DOS sector order: VTOC at T17 S0,
/// catalog chain from S15 down to S1, volume number as given.
pub fn build_dos33_payload(volume: u8) -> Vec<u8> {
    let mut disk = vec![0u8; DOS_140K];
    let track_len = 16 * SECTOR;

    {
        let vtoc_at = 17 * track_len;
        let vtoc = &mut disk[vtoc_at..vtoc_at + SECTOR];
        vtoc[0x01] = 17; // catalog track
        vtoc[0x02] = 15; // catalog sector
        vtoc[0x03] = 3; // DOS release
        vtoc[0x06] = volume;
        vtoc[0x27] = 122; // TS pairs per list sector
        vtoc[0x34] = 35; // tracks per disk
        vtoc[0x35] = 16; // sectors per track
        vtoc[0x36] = 0x00;
        vtoc[0x37] = 0x01; // 256 bytes/sector
    }
    // Catalog sectors chain 15 -> 1.
    for sector in (1..16usize).rev() {
        let at = 17 * track_len + sector * SECTOR;
        if sector > 1 {
            disk[at + 0x01] = 17;
            disk[at + 0x02] = (sector - 1) as u8;
        }
    }
    disk
}

/// Add one file entry to the first catalog sector of a DOS payload and
/// lay down its TS list and data sectors.
pub fn add_dos33_file(disk: &mut [u8], name: &str, data_track: usize, sectors: usize) {
    let track_len = 16 * SECTOR;
    let cat_at = 17 * track_len + 15 * SECTOR;

    // TS list at (data_track, 0); data at sectors 1..=sectors.
    let ts_at = data_track * track_len;
    for i in 0..sectors {
        disk[ts_at + 0x0c + i * 2] = data_track as u8;
        disk[ts_at + 0x0c + i * 2 + 1] = (i + 1) as u8;
        let data_at = data_track * track_len + (i + 1) * SECTOR;
        disk[data_at] = 0xa5;
    }

    let entry_at = cat_at + 0x0b;
    disk[entry_at] = data_track as u8;
    disk[entry_at + 1] = 0;
    disk[entry_at + 2] = 0x04; // B file
    for (i, slot) in disk[entry_at + 3..entry_at + 33].iter_mut().enumerate() {
        *slot = name.as_bytes().get(i).map(|&b| b | 0x80).unwrap_or(0xa0);
    }
    let count = (sectors + 1) as u16;
    disk[entry_at + 33..entry_at + 35].copy_from_slice(&count.to_le_bytes());
}

/// Build an 800K ProDOS payload in ProDOS block order: volume directory
/// key block at block 2 with chain through block 5, bitmap at block 6.
pub fn build_prodos_payload(volume_name: &str, total_blocks: u16) -> Vec<u8> {
    let mut disk = vec![0u8; total_blocks as usize * BLOCK];

    for dir_block in 2usize..=5 {
        let at = dir_block * BLOCK;
        let prev = if dir_block == 2 { 0 } else { dir_block - 1 } as u16;
        let next = if dir_block == 5 { 0 } else { dir_block + 1 } as u16;
        disk[at..at + 2].copy_from_slice(&prev.to_le_bytes());
        disk[at + 2..at + 4].copy_from_slice(&next.to_le_bytes());

        if dir_block == 2 {
            let name = volume_name.as_bytes();
            disk[at + 4] = 0xf0 | name.len() as u8;
            disk[at + 5..at + 5 + name.len()].copy_from_slice(name);
            disk[at + 0x23] = 0x27; // entry length
            disk[at + 0x24] = 0x0d; // entries per block
            disk[at + 0x27..at + 0x29].copy_from_slice(&6u16.to_le_bytes());
            disk[at + 0x29..at + 0x2b].copy_from_slice(&total_blocks.to_le_bytes());
        }
    }
    disk
}

/// Add a seedling file entry to the ProDOS volume directory.
pub fn add_prodos_seedling(disk: &mut [u8], name: &str, key_block: u16, eof: u32, fill: u8) {
    let dir_at = 2 * BLOCK;
    let entry_at = dir_at + 4 + 0x27; // slot 1, after the header entry

    disk[entry_at] = 0x10 | name.len() as u8; // seedling
    disk[entry_at + 1..entry_at + 1 + name.len()].copy_from_slice(name.as_bytes());
    disk[entry_at + 0x10] = 0x06; // BIN
    disk[entry_at + 0x11..entry_at + 0x13].copy_from_slice(&key_block.to_le_bytes());
    disk[entry_at + 0x13..entry_at + 0x15].copy_from_slice(&1u16.to_le_bytes());
    disk[entry_at + 0x15..entry_at + 0x18].copy_from_slice(&eof.to_le_bytes()[..3]);
    disk[entry_at + 0x1e] = 0xe3; // access

    let key_at = key_block as usize * BLOCK;
    for b in disk[key_at..key_at + BLOCK].iter_mut() {
        *b = fill;
    }
    // file count in the volume header
    let hdr = dir_at + 4;
    disk[hdr + 0x21..hdr + 0x23].copy_from_slice(&1u16.to_le_bytes());
}

/// Build an 800K UNIDOS payload: two 400K DOS 3.3 volumes of 50 wide
/// tracks (32 sectors), stacked front and back.
pub fn build_unidos_payload(volume_a: u8, volume_b: u8) -> Vec<u8> {
    let mut disk = vec![0u8; PRODOS_800K];
    let wide_track_len = 32 * SECTOR;

    for (half, volume) in [(0usize, volume_a), (1usize, volume_b)] {
        let base = half * 50 * wide_track_len;
        let vtoc_at = base + 17 * wide_track_len;
        {
            let vtoc = &mut disk[vtoc_at..vtoc_at + SECTOR];
            vtoc[0x01] = 17;
            vtoc[0x02] = 31;
            vtoc[0x03] = 3;
            vtoc[0x06] = volume;
            vtoc[0x27] = 122;
            vtoc[0x34] = 50; // tracks per disk
            vtoc[0x35] = 32; // sectors per track
            vtoc[0x36] = 0x00;
            vtoc[0x37] = 0x01;
        }
        for sector in (1..32usize).rev() {
            let at = vtoc_at + sector * SECTOR;
            if sector > 1 {
                disk[at + 0x01] = 17;
                disk[at + 0x02] = (sector - 1) as u8;
            }
        }
    }
    disk
}

/// Wrap a payload in a 64-byte 2MG header.
pub fn wrap_2mg(payload: &[u8], format: u32, volume: Option<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + payload.len());
    out.extend_from_slice(b"2IMG");
    out.extend_from_slice(b"XGS!");
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&format.to_le_bytes());
    let flags = volume.map(|v| 0x0100 | v as u32).unwrap_or(0);
    out.extend_from_slice(&flags.to_le_bytes());
    let blocks = if format == 1 {
        (payload.len() / BLOCK) as u32
    } else {
        0
    };
    out.extend_from_slice(&blocks.to_le_bytes());
    out.extend_from_slice(&64u32.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]); // comment/creator chunk offsets
    out.extend_from_slice(&[0u8; 16]); // reserved
    out.extend_from_slice(payload);
    out
}

/// Wrap an 800K payload in a DiskCopy 4.2 header, optionally with a
/// corrupted data checksum.
pub fn wrap_dc42(payload: &[u8], name: &str, corrupt: bool) -> Vec<u8> {
    use nibfox::wrappers::diskcopy42::compute_checksum;

    assert_eq!(payload.len(), PRODOS_800K);
    let mut out = Vec::with_capacity(84 + payload.len());

    let mut disk_name = [0u8; 64];
    disk_name[0] = name.len().min(63) as u8;
    disk_name[1..1 + name.len().min(63)].copy_from_slice(&name.as_bytes()[..name.len().min(63)]);
    out.extend_from_slice(&disk_name);

    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // tag size
    let mut checksum = compute_checksum(payload);
    if corrupt {
        checksum ^= 0x1234_5678;
    }
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // tag checksum
    out.push(1); // 800K
    out.push(0x24); // 800K ProDOS
    out.extend_from_slice(&0x0100u16.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Gzip-compress an image file's bytes.
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
