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

    src/wrappers/trackstar.rs

    TrackStar ".app" images: 40 fixed-size track records, each holding an
    ASCII description area and variable-length nibble data with the
    in-use length in the record's trailing word. A dump of a 35-track
    disk leaves records 35..39 empty.
*/

use std::collections::BTreeSet;

use crate::{
    source::{SourceHandle, WindowSource},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError,
};

/// Each track record is 6656 bytes on disk.
pub const TRACK_RECORD_LEN: usize = 6656;
/// The description area at the head of each record.
pub const DESCR_LEN: usize = 0x81;
/// Nibble bytes available per record.
pub const MAX_TRACK_DATA: usize = TRACK_RECORD_LEN - DESCR_LEN - 2;

const RECORD_COUNT: usize = 40;
const FILE_LEN: u64 = (RECORD_COUNT * TRACK_RECORD_LEN) as u64;

pub struct TrackStar {
    /// In-use nibble length per track record.
    track_lens: Vec<usize>,
    num_tracks: usize,
}

fn record_data_len(src: &SourceHandle, track: usize) -> Result<usize, DiskImageError> {
    let base = (track * TRACK_RECORD_LEN) as u64;
    let mut trailer = [0u8; 2];
    src.borrow_mut()
        .read_at(base + TRACK_RECORD_LEN as u64 - 2, &mut trailer)?;
    Ok(u16::from_le_bytes(trailer) as usize)
}

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len != FILE_LEN {
        return WrapperTestResult::None;
    }
    // The description area is printable ASCII or NULs; check track 0.
    let mut descr = [0u8; DESCR_LEN];
    if src.borrow_mut().read_at(0, &mut descr).is_err() {
        return WrapperTestResult::None;
    }
    if !descr.iter().all(|&b| b == 0 || (0x20..0x7f).contains(&b)) {
        return WrapperTestResult::None;
    }
    match record_data_len(src, 0) {
        Ok(n) if n <= MAX_TRACK_DATA => WrapperTestResult::Match,
        Ok(_) => WrapperTestResult::Corrupt,
        Err(_) => WrapperTestResult::None,
    }
}

impl TrackStar {
    pub fn new() -> TrackStar {
        TrackStar {
            track_lens: Vec::new(),
            num_tracks: 0,
        }
    }

    pub fn track_len(&self, track: usize) -> usize {
        self.track_lens.get(track).copied().unwrap_or(0)
    }

    pub fn track_offset(&self, track: usize) -> u64 {
        (track * TRACK_RECORD_LEN + DESCR_LEN) as u64
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        if len != FILE_LEN {
            return Err(DiskImageError::BadFileFormat);
        }

        self.track_lens = Vec::with_capacity(RECORD_COUNT);
        for track in 0..RECORD_COUNT {
            let data_len = record_data_len(src, track)?;
            if data_len > MAX_TRACK_DATA {
                return Err(DiskImageError::BadFileFormat);
            }
            self.track_lens.push(data_len);
        }

        // 35-track disks leave the high records empty.
        self.num_tracks = if self.track_lens[35..].iter().all(|&l| l == 0) {
            35
        } else {
            40
        };
        log::debug!(
            "TrackStar::prep(): {} tracks in use",
            self.num_tracks
        );

        Ok(PrepResult {
            payload: WindowSource::new(src.clone(), 0, len)?.into_handle(),
            length: len,
            physical: PhysicalFormat::Nib525Var,
            order: SectorOrder::Physical,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    pub fn flush(
        &mut self,
        _src: &SourceHandle,
        _payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<u64, DiskImageError> {
        // Track data is written in place through the payload window; the
        // per-record descriptors and lengths are only touched by create.
        Ok(payload_len)
    }

    /// Lay out a fresh image of `num_tracks` formatted nibble tracks.
    pub fn create(
        &mut self,
        src: &SourceHandle,
        num_tracks: usize,
        track_data: &dyn Fn(usize) -> Vec<u8>,
    ) -> Result<PrepResult, DiskImageError> {
        if num_tracks != 35 && num_tracks != 40 {
            return Err(DiskImageError::InvalidCreateReq);
        }

        src.borrow_mut().set_len(FILE_LEN)?;
        self.track_lens = vec![0; RECORD_COUNT];

        for track in 0..RECORD_COUNT {
            let base = (track * TRACK_RECORD_LEN) as u64;
            let mut record = vec![0u8; TRACK_RECORD_LEN];

            if track < num_tracks {
                let descr = format!("NibFox track {:02}", track);
                record[..descr.len().min(DESCR_LEN)]
                    .copy_from_slice(&descr.as_bytes()[..descr.len().min(DESCR_LEN)]);

                let data = track_data(track);
                if data.len() > MAX_TRACK_DATA {
                    return Err(DiskImageError::InvalidCreateReq);
                }
                record[DESCR_LEN..DESCR_LEN + data.len()].copy_from_slice(&data);
                record[TRACK_RECORD_LEN - 2..]
                    .copy_from_slice(&(data.len() as u16).to_le_bytes());
                self.track_lens[track] = data.len();
            }
            src.borrow_mut().write_at(base, &record)?;
        }
        self.num_tracks = num_tracks;

        Ok(PrepResult {
            payload: WindowSource::new(src.clone(), 0, FILE_LEN)?.into_handle(),
            length: FILE_LEN,
            physical: PhysicalFormat::Nib525Var,
            order: SectorOrder::Physical,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }
}

impl Default for TrackStar {
    fn default() -> Self {
        TrackStar::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BufferSource, Source};

    #[test]
    fn create_then_prep_recovers_track_table() {
        let src = Source::Buffer(BufferSource::new(0, true)).into_handle();
        let mut wrapper = TrackStar::new();
        wrapper
            .create(&src, 35, &|track| vec![0xff; 6000 + track])
            .unwrap();

        let mut reopened = TrackStar::new();
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);
        let prep = reopened.prep(&src, len).unwrap();
        assert_eq!(prep.physical, PhysicalFormat::Nib525Var);
        assert_eq!(reopened.num_tracks(), 35);
        assert_eq!(reopened.track_len(0), 6000);
        assert_eq!(reopened.track_len(34), 6034);
        assert_eq!(reopened.track_len(35), 0);
        assert_eq!(reopened.track_offset(1), (TRACK_RECORD_LEN + DESCR_LEN) as u64);
    }
}
