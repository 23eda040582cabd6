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

    src/wrappers/sim2e.rs

    Sim //e HDV: a 16-byte signature block in front of ProDOS-ordered
    blocks.
*/

use std::collections::BTreeSet;

use crate::{
    source::{SourceHandle, WindowSource},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError, BLOCK_SIZE,
};

pub const HEADER_LEN: u64 = 16;
const SIGNATURE: &[u8; 13] = b"SIMSYSTEM_HDV";

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len < HEADER_LEN {
        return WrapperTestResult::None;
    }
    let mut magic = [0u8; 13];
    if src.borrow_mut().read_at(0, &mut magic).is_err() {
        return WrapperTestResult::None;
    }
    if &magic == SIGNATURE {
        WrapperTestResult::Match
    } else {
        WrapperTestResult::None
    }
}

pub struct Sim2eHdv {}

impl Sim2eHdv {
    pub fn new() -> Sim2eHdv {
        Sim2eHdv {}
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        if len < HEADER_LEN {
            return Err(DiskImageError::BadFileFormat);
        }
        let payload_len = (len - HEADER_LEN) / BLOCK_SIZE as u64 * BLOCK_SIZE as u64;

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

    pub fn flush(&mut self, _src: &SourceHandle, payload_len: u64) -> Result<u64, DiskImageError> {
        Ok(HEADER_LEN + payload_len)
    }

    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
    ) -> Result<PrepResult, DiskImageError> {
        let mut header = [0u8; HEADER_LEN as usize];
        header[..13].copy_from_slice(SIGNATURE);

        src.borrow_mut().set_len(HEADER_LEN + payload_len)?;
        src.borrow_mut().write_at(0, &header)?;
        self.prep(src, HEADER_LEN + payload_len)
    }
}

impl Default for Sim2eHdv {
    fn default() -> Self {
        Sim2eHdv::new()
    }
}
