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

    src/wrappers/unadorned.rs

    The trivial wrapper: the payload is the whole source. Sector images
    must be a multiple of the sector size; nibble images must match one
    of the fixed whole-disk nibble lengths.
*/

use std::collections::BTreeSet;

use crate::{
    source::{SourceHandle, WindowSource},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError, D13_LENGTH, NIB_TRACK_LEN_6384, NIB_TRACK_LEN_6656, SECTOR_SIZE,
    TRACK_COUNT_525,
};

pub struct Unadorned {
    physical: PhysicalFormat,
    order: SectorOrder,
}

/// Whole-disk lengths of the fixed nibble layouts.
const NIB_LEN_6656: u64 = (TRACK_COUNT_525 * NIB_TRACK_LEN_6656) as u64;
const NIB_LEN_6384: u64 = (TRACK_COUNT_525 * NIB_TRACK_LEN_6384) as u64;

pub fn test_sector(len: u64) -> WrapperTestResult {
    if len == 0 {
        return WrapperTestResult::None;
    }
    if len == D13_LENGTH || len % SECTOR_SIZE as u64 == 0 {
        WrapperTestResult::Match
    } else {
        WrapperTestResult::None
    }
}

pub fn test_nibble(len: u64) -> WrapperTestResult {
    if len == NIB_LEN_6656 || len == NIB_LEN_6384 {
        WrapperTestResult::Match
    } else {
        WrapperTestResult::None
    }
}

impl Unadorned {
    pub fn new(physical: PhysicalFormat) -> Unadorned {
        Unadorned {
            physical,
            order: SectorOrder::Unknown,
        }
    }

    pub fn with_order(physical: PhysicalFormat, order: SectorOrder) -> Unadorned {
        Unadorned { physical, order }
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        if len == 0 {
            return Err(DiskImageError::UnrecognizedFileFmt);
        }

        // A ".nib" extension pins the family but not the variant; refine
        // from the length.
        let physical = match self.physical {
            PhysicalFormat::Nib525_6656 if len == NIB_LEN_6384 => PhysicalFormat::Nib525_6384,
            other => other,
        };
        if physical.is_sectors() && len != D13_LENGTH && len % SECTOR_SIZE as u64 != 0 {
            return Err(DiskImageError::OddLength);
        }
        self.physical = physical;

        Ok(PrepResult {
            payload: WindowSource::new(src.clone(), 0, len)?.into_handle(),
            length: len,
            physical,
            order: self.order,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }

    pub fn flush(&mut self, _src: &SourceHandle, payload_len: u64) -> Result<u64, DiskImageError> {
        // Payload writes already landed in the source.
        Ok(payload_len)
    }

    /// Size the backing source for a new image and return its prep.
    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
    ) -> Result<PrepResult, DiskImageError> {
        src.borrow_mut().set_len(payload_len)?;
        self.prep(src, payload_len)
    }
}
