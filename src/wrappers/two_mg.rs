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

    src/wrappers/two_mg.rs

    The 2MG (2IMG) wrapper: a 64-byte little-endian header in front of a
    DOS-ordered, ProDOS-ordered or 6656-nibble payload, with optional
    trailing comment and creator chunks. All header fields round-trip.
*/

use std::collections::BTreeSet;
use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use bitflags::bitflags;

use crate::{
    source::{SourceHandle, WindowSource},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError, BLOCK_SIZE,
};

pub const HEADER_LEN: u64 = 64;
const MAGIC: [u8; 4] = *b"2IMG";
const CREATOR_NIBFOX: [u8; 4] = *b"nfox";

pub const FORMAT_DOS: u32 = 0;
pub const FORMAT_PRODOS: u32 = 1;
pub const FORMAT_NIB: u32 = 2;

bitflags! {
    #[derive(Copy, Clone, Debug, Default)]
    pub struct TwoMgFlags: u32 {
        const LOCKED = 0x8000_0000;
        const VOL_NUM_SET = 0x0000_0100;
        const VOL_NUM_MASK = 0x0000_00ff;
    }
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct TwoMgHeader {
    pub magic: [u8; 4],
    pub creator: [u8; 4],
    pub header_len: u16,
    pub version: u16,
    pub image_format: u32,
    pub flags: u32,
    pub num_blocks: u32,
    pub data_offset: u32,
    pub data_len: u32,
    pub cmnt_offset: u32,
    pub cmnt_len: u32,
    pub creator_offset: u32,
    pub creator_len: u32,
    pub spare: [u8; 16],
}

impl TwoMgHeader {
    fn dos_volume(&self) -> Option<u8> {
        let flags = TwoMgFlags::from_bits_retain(self.flags);
        flags
            .contains(TwoMgFlags::VOL_NUM_SET)
            .then_some((self.flags & TwoMgFlags::VOL_NUM_MASK.bits()) as u8)
    }

    fn locked(&self) -> bool {
        TwoMgFlags::from_bits_retain(self.flags).contains(TwoMgFlags::LOCKED)
    }
}

pub struct TwoMg {
    header: Option<TwoMgHeader>,
    /// Raw comment and creator-data chunks, preserved across flush.
    comment: Vec<u8>,
    creator_data: Vec<u8>,
}

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len < HEADER_LEN {
        return WrapperTestResult::None;
    }
    let mut raw = [0u8; HEADER_LEN as usize];
    if src.borrow_mut().read_at(0, &mut raw).is_err() {
        return WrapperTestResult::None;
    }
    let header = match TwoMgHeader::read(&mut Cursor::new(&raw[..])) {
        Ok(h) => h,
        Err(_) => return WrapperTestResult::None,
    };
    if header.magic != MAGIC || (header.header_len as u64) < HEADER_LEN {
        return WrapperTestResult::None;
    }
    if header.image_format > FORMAT_NIB {
        return WrapperTestResult::None;
    }
    if header.data_offset as u64 + header.data_len as u64 > len {
        log::debug!("TwoMg::test(): header data range exceeds file");
        return WrapperTestResult::Corrupt;
    }
    WrapperTestResult::Match
}

impl TwoMg {
    pub fn new() -> TwoMg {
        TwoMg {
            header: None,
            comment: Vec::new(),
            creator_data: Vec::new(),
        }
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        let mut raw = [0u8; HEADER_LEN as usize];
        src.borrow_mut().read_at(0, &mut raw)?;
        let header = TwoMgHeader::read(&mut Cursor::new(&raw[..]))
            .map_err(|_| DiskImageError::BadFileFormat)?;

        if header.magic != MAGIC {
            return Err(DiskImageError::BadFileFormat);
        }
        if header.data_offset as u64 + header.data_len as u64 > len {
            return Err(DiskImageError::BadFileFormat);
        }

        let (physical, order) = match header.image_format {
            FORMAT_DOS => (PhysicalFormat::Sectors, SectorOrder::Dos),
            FORMAT_PRODOS => (PhysicalFormat::Sectors, SectorOrder::ProDos),
            FORMAT_NIB => (PhysicalFormat::Nib525_6656, SectorOrder::Physical),
            _ => return Err(DiskImageError::UnsupportedImageFeature),
        };

        // Preserve the comment and creator chunks for the round trip.
        self.comment = read_chunk(src, header.cmnt_offset, header.cmnt_len, len)?;
        self.creator_data = read_chunk(src, header.creator_offset, header.creator_len, len)?;

        log::debug!(
            "TwoMg::prep(): creator {:?} v{} format {} len {}",
            String::from_utf8_lossy(&header.creator),
            header.version,
            header.image_format,
            header.data_len,
        );

        let payload = WindowSource::new(
            src.clone(),
            header.data_offset as u64,
            header.data_len as u64,
        )?
        .into_handle();

        let result = PrepResult {
            payload,
            length: header.data_len as u64,
            physical,
            order,
            dos_volume: header.dos_volume(),
            bad_blocks: BTreeSet::new(),
            damaged: false,
        };
        // The locked bit forces read-only at the DiskImage level.
        self.header = Some(header);
        Ok(result)
    }

    pub fn locked(&self) -> bool {
        self.header.as_ref().is_some_and(|h| h.locked())
    }

    pub fn flush(&mut self, src: &SourceHandle, payload_len: u64) -> Result<u64, DiskImageError> {
        let header = self.header.as_mut().ok_or(DiskImageError::NotReady)?;

        // Payload bytes went through the window; refresh the header and
        // re-append the preserved chunks.
        header.data_len = payload_len as u32;
        let mut pos = header.data_offset as u64 + payload_len;
        if self.comment.is_empty() {
            header.cmnt_offset = 0;
            header.cmnt_len = 0;
        } else {
            header.cmnt_offset = pos as u32;
            header.cmnt_len = self.comment.len() as u32;
            pos += self.comment.len() as u64;
        }
        if self.creator_data.is_empty() {
            header.creator_offset = 0;
            header.creator_len = 0;
        } else {
            header.creator_offset = pos as u32;
            header.creator_len = self.creator_data.len() as u32;
            pos += self.creator_data.len() as u64;
        }

        let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        header.write(&mut out).map_err(|_| DiskImageError::Internal)?;
        src.borrow_mut().write_at(0, &out.into_inner())?;

        let chunk_base = header.data_offset as u64 + payload_len;
        if !self.comment.is_empty() {
            src.borrow_mut().write_at(chunk_base, &self.comment)?;
        }
        if !self.creator_data.is_empty() {
            src.borrow_mut()
                .write_at(header.creator_offset as u64, &self.creator_data)?;
        }
        Ok(pos)
    }

    /// Write a fresh header and zero payload for image creation.
    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
        physical: PhysicalFormat,
        order: SectorOrder,
        dos_volume: Option<u8>,
    ) -> Result<PrepResult, DiskImageError> {
        let image_format = match (physical, order) {
            (PhysicalFormat::Sectors, SectorOrder::Dos) => FORMAT_DOS,
            (PhysicalFormat::Sectors, SectorOrder::ProDos) => FORMAT_PRODOS,
            (PhysicalFormat::Nib525_6656, SectorOrder::Physical) => FORMAT_NIB,
            _ => return Err(DiskImageError::InvalidCreateReq),
        };

        let mut flags = 0u32;
        if let Some(vol) = dos_volume {
            flags |= TwoMgFlags::VOL_NUM_SET.bits() | vol as u32;
        }

        let header = TwoMgHeader {
            magic: MAGIC,
            creator: CREATOR_NIBFOX,
            header_len: HEADER_LEN as u16,
            version: 1,
            image_format,
            flags,
            num_blocks: if image_format == FORMAT_PRODOS {
                (payload_len / BLOCK_SIZE as u64) as u32
            } else {
                0
            },
            data_offset: HEADER_LEN as u32,
            data_len: payload_len as u32,
            cmnt_offset: 0,
            cmnt_len: 0,
            creator_offset: 0,
            creator_len: 0,
            spare: [0u8; 16],
        };

        let mut out = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        header.write(&mut out).map_err(|_| DiskImageError::Internal)?;

        src.borrow_mut().set_len(HEADER_LEN + payload_len)?;
        src.borrow_mut().write_at(0, &out.into_inner())?;

        self.header = Some(header);

        Ok(PrepResult {
            payload: WindowSource::new(src.clone(), HEADER_LEN, payload_len)?.into_handle(),
            length: payload_len,
            physical,
            order,
            dos_volume,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }
}

impl Default for TwoMg {
    fn default() -> Self {
        TwoMg::new()
    }
}

fn read_chunk(
    src: &SourceHandle,
    offset: u32,
    len: u32,
    file_len: u64,
) -> Result<Vec<u8>, DiskImageError> {
    if offset == 0 || len == 0 {
        return Ok(Vec::new());
    }
    if offset as u64 + len as u64 > file_len {
        log::warn!("TwoMg: chunk at {} len {} exceeds file; dropping", offset, len);
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len as usize];
    src.borrow_mut().read_at(offset as u64, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BufferSource, Source};

    fn build_2mg(format: u32, payload: &[u8]) -> SourceHandle {
        let header = TwoMgHeader {
            magic: MAGIC,
            creator: *b"test",
            header_len: 64,
            version: 1,
            image_format: format,
            flags: TwoMgFlags::VOL_NUM_SET.bits() | 254,
            num_blocks: 0,
            data_offset: 64,
            data_len: payload.len() as u32,
            cmnt_offset: 0,
            cmnt_len: 0,
            creator_offset: 0,
            creator_len: 0,
            spare: [0u8; 16],
        };
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        let mut bytes = out.into_inner();
        bytes.extend_from_slice(payload);
        Source::Buffer(BufferSource::with_data(bytes, true)).into_handle()
    }

    #[test]
    fn header_parses_and_windows_payload() {
        let payload = vec![0x42u8; 143_360];
        let src = build_2mg(FORMAT_DOS, &payload);
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);

        let mut wrapper = TwoMg::new();
        let prep = wrapper.prep(&src, len).unwrap();
        assert_eq!(prep.length, 143_360);
        assert_eq!(prep.physical, PhysicalFormat::Sectors);
        assert_eq!(prep.order, SectorOrder::Dos);
        assert_eq!(prep.dos_volume, Some(254));

        let mut buf = [0u8; 4];
        prep.payload.borrow_mut().read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x42; 4]);
    }

    #[test]
    fn bad_magic_is_not_recognized() {
        let payload = vec![0u8; 512];
        let src = build_2mg(FORMAT_PRODOS, &payload);
        src.borrow_mut().write_at(0, b"XIMG").unwrap();
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::None);
    }

    #[test]
    fn flush_preserves_all_fields() {
        let payload = vec![0u8; 143_360];
        let src = build_2mg(FORMAT_DOS, &payload);
        let len = src.borrow().len();

        let mut wrapper = TwoMg::new();
        let prep = wrapper.prep(&src, len).unwrap();
        prep.payload.borrow_mut().write_at(0, &[0xEE]).unwrap();
        wrapper.flush(&src, prep.length).unwrap();

        let mut wrapper2 = TwoMg::new();
        let len2 = src.borrow().len();
        let prep2 = wrapper2.prep(&src, len2).unwrap();
        assert_eq!(prep2.dos_volume, Some(254));
        let h1 = wrapper.header.unwrap();
        let h2 = wrapper2.header.unwrap();
        assert_eq!(h1.creator, h2.creator);
        assert_eq!(h1.flags, h2.flags);
        assert_eq!(h1.version, h2.version);
        let mut buf = [0u8; 1];
        prep2.payload.borrow_mut().read_at(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xEE);
    }
}
