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

    src/wrappers/diskcopy42.rs

    DiskCopy 4.2: a big-endian 84-byte header with a Pascal-string disk
    name and Apple's rotate-right checksums over the data and tag
    sections. Only 800K 16-sector disks are supported. A data checksum
    mismatch opens the image read-only rather than failing the open.
*/

use std::collections::BTreeSet;
use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use crate::{
    source::{read_all, SourceHandle, WindowSource},
    types::enums::{PhysicalFormat, SectorOrder},
    util,
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError,
};

pub const HEADER_LEN: u64 = 84;
const DATA_SIZE_800K: u32 = 819_200;
const PRIVATE_MAGIC: u16 = 0x0100;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct DiskCopy42Header {
    /// 64-byte Pascal string: 1 length byte + up to 63 characters.
    pub disk_name: [u8; 64],
    pub data_size: u32,
    pub tag_size: u32,
    pub data_checksum: u32,
    pub tag_checksum: u32,
    /// 0=400K, 1=800K, 2=720K, 3=1440K.
    pub disk_format: u8,
    /// 0x12 = Lisa 400K, 0x22 = Mac 800K, 0x24 = 800K ProDOS.
    pub format_byte: u8,
    pub private: u16,
}

/// Apple's rotate-right checksum: sum big-endian words, rotating the
/// 32-bit accumulator right after each addition.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for pair in data.chunks_exact(2) {
        let word = u16::from_be_bytes([pair[0], pair[1]]) as u32;
        checksum = checksum.wrapping_add(word);
        checksum = checksum.rotate_right(1);
    }
    checksum
}

fn parse_header(src: &SourceHandle) -> Option<DiskCopy42Header> {
    let mut raw = [0u8; HEADER_LEN as usize];
    src.borrow_mut().read_at(0, &mut raw).ok()?;
    DiskCopy42Header::read(&mut Cursor::new(&raw[..])).ok()
}

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len < HEADER_LEN {
        return WrapperTestResult::None;
    }
    let Some(header) = parse_header(src) else {
        return WrapperTestResult::None;
    };
    if header.private != PRIVATE_MAGIC || header.disk_name[0] as usize > 63 {
        return WrapperTestResult::None;
    }
    if HEADER_LEN + header.data_size as u64 + header.tag_size as u64 != len {
        return WrapperTestResult::None;
    }
    if header.data_size != DATA_SIZE_800K {
        // Positively DiskCopy, but not a geometry we can serve.
        log::debug!(
            "DiskCopy42::test(): unsupported data size {}",
            header.data_size
        );
        return WrapperTestResult::None;
    }

    // Verify the data checksum so content probing can treat a damaged
    // image as terminal rather than guessing onward.
    let mut data = vec![0u8; header.data_size as usize];
    if src.borrow_mut().read_at(HEADER_LEN, &mut data).is_err() {
        return WrapperTestResult::None;
    }
    if compute_checksum(&data) != header.data_checksum {
        return WrapperTestResult::Corrupt;
    }
    WrapperTestResult::Match
}

pub struct DiskCopy42 {
    header: Option<DiskCopy42Header>,
}

impl DiskCopy42 {
    pub fn new() -> DiskCopy42 {
        DiskCopy42 { header: None }
    }

    /// The embedded disk name, converted from Mac high ASCII.
    pub fn storage_name(&self) -> Option<String> {
        self.header.as_ref().map(|h| {
            let len = (h.disk_name[0] as usize).min(63);
            util::clean_mac_name(&h.disk_name[1..1 + len])
        })
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        let header = parse_header(src).ok_or(DiskImageError::BadFileFormat)?;
        if HEADER_LEN + header.data_size as u64 + header.tag_size as u64 != len {
            return Err(DiskImageError::BadFileFormat);
        }
        if header.data_size != DATA_SIZE_800K {
            return Err(DiskImageError::UnsupportedImageFeature);
        }

        let mut data = vec![0u8; header.data_size as usize];
        src.borrow_mut().read_at(HEADER_LEN, &mut data)?;
        let checksum = compute_checksum(&data);
        let damaged = checksum != header.data_checksum;
        if damaged {
            log::warn!(
                "DiskCopy42::prep(): data checksum mismatch (got {:08x} want {:08x})",
                checksum,
                header.data_checksum
            );
        }

        let payload =
            WindowSource::new(src.clone(), HEADER_LEN, header.data_size as u64)?.into_handle();

        let result = PrepResult {
            payload,
            length: header.data_size as u64,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::ProDos,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged,
        };
        self.header = Some(header);
        Ok(result)
    }

    pub fn flush(
        &mut self,
        src: &SourceHandle,
        payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<u64, DiskImageError> {
        let header = self.header.as_mut().ok_or(DiskImageError::NotReady)?;

        let data = read_all(payload)?;
        header.data_checksum = compute_checksum(&data);

        // Tag data, if present, sits after the data section; recompute
        // its checksum too (skipping the first 12 bytes per DiskCopy).
        if header.tag_size > 0 {
            let mut tags = vec![0u8; header.tag_size as usize];
            src.borrow_mut()
                .read_at(HEADER_LEN + header.data_size as u64, &mut tags)?;
            header.tag_checksum = compute_checksum(&tags[12.min(tags.len())..]);
        }

        let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        header.write(&mut out).map_err(|_| DiskImageError::Internal)?;
        src.borrow_mut().write_at(0, &out.into_inner())?;

        Ok(HEADER_LEN + payload_len + header.tag_size as u64)
    }

    /// Write a fresh 800K DiskCopy image with a zeroed payload.
    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
        storage_name: Option<&str>,
    ) -> Result<PrepResult, DiskImageError> {
        if payload_len != DATA_SIZE_800K as u64 {
            return Err(DiskImageError::InvalidCreateReq);
        }

        let mut disk_name = [0u8; 64];
        let name = storage_name.unwrap_or("-not a Macintosh disk");
        let len = name.len().min(63);
        disk_name[0] = len as u8;
        disk_name[1..1 + len].copy_from_slice(&name.as_bytes()[..len]);

        let zero = vec![0u8; payload_len as usize];
        let header = DiskCopy42Header {
            disk_name,
            data_size: DATA_SIZE_800K,
            tag_size: 0,
            data_checksum: compute_checksum(&zero),
            tag_checksum: 0,
            disk_format: 1,  // 800K
            format_byte: 0x24, // 800K ProDOS
            private: PRIVATE_MAGIC,
        };

        let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        header.write(&mut out).map_err(|_| DiskImageError::Internal)?;

        src.borrow_mut().set_len(HEADER_LEN + payload_len)?;
        src.borrow_mut().write_at(0, &out.into_inner())?;
        src.borrow_mut().write_at(HEADER_LEN, &zero)?;

        self.header = Some(header);

        Ok(PrepResult {
            payload: WindowSource::new(src.clone(), HEADER_LEN, payload_len)?.into_handle(),
            length: payload_len,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::ProDos,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }
}

impl Default for DiskCopy42 {
    fn default() -> Self {
        DiskCopy42::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BufferSource, Source};

    pub(crate) fn build_dc42(payload: &[u8], corrupt_checksum: bool) -> SourceHandle {
        let mut disk_name = [0u8; 64];
        disk_name[0] = 4;
        disk_name[1..5].copy_from_slice(b"Test");
        let mut checksum = compute_checksum(payload);
        if corrupt_checksum {
            checksum ^= 0xdead_beef;
        }
        let header = DiskCopy42Header {
            disk_name,
            data_size: payload.len() as u32,
            tag_size: 0,
            data_checksum: checksum,
            tag_checksum: 0,
            disk_format: 1,
            format_byte: 0x24,
            private: PRIVATE_MAGIC,
        };
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        let mut bytes = out.into_inner();
        bytes.extend_from_slice(payload);
        Source::Buffer(BufferSource::with_data(bytes, true)).into_handle()
    }

    #[test]
    fn checksum_is_rotate_right_word_sum() {
        // Hand-checked: two words 0x0102 and 0x0304.
        // step 1: 0x0102 ror 1 = 0x81
        // step 2: 0x81 + 0x0304 = 0x0385, ror 1 = 0x800001C2
        assert_eq!(compute_checksum(&[0x01, 0x02, 0x03, 0x04]), 0x8000_01c2);
    }

    #[test]
    fn good_checksum_preps_clean() {
        let payload = vec![0x11u8; DATA_SIZE_800K as usize];
        let src = build_dc42(&payload, false);
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);

        let mut wrapper = DiskCopy42::new();
        let prep = wrapper.prep(&src, len).unwrap();
        assert!(!prep.damaged);
        assert_eq!(prep.order, SectorOrder::ProDos);
        assert_eq!(wrapper.storage_name().as_deref(), Some("Test"));
    }

    #[test]
    fn bad_checksum_preps_damaged() {
        let payload = vec![0x11u8; DATA_SIZE_800K as usize];
        let src = build_dc42(&payload, true);
        let len = src.borrow().len();

        let mut wrapper = DiskCopy42::new();
        let prep = wrapper.prep(&src, len).unwrap();
        assert!(prep.damaged);
    }

    #[test]
    fn flush_recomputes_checksum() {
        let payload = vec![0u8; DATA_SIZE_800K as usize];
        let src = build_dc42(&payload, false);
        let len = src.borrow().len();

        let mut wrapper = DiskCopy42::new();
        let prep = wrapper.prep(&src, len).unwrap();
        prep.payload.borrow_mut().write_at(0, &[0xFF; 512]).unwrap();
        wrapper.flush(&src, &prep.payload, prep.length).unwrap();

        let mut wrapper2 = DiskCopy42::new();
        let len2 = src.borrow().len();
        let prep2 = wrapper2.prep(&src, len2).unwrap();
        assert!(!prep2.damaged);
    }
}
