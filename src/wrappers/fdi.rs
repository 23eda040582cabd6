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

    src/wrappers/fdi.rs

    Formatted Disk Image (FDI): a signature header, a per-track
    descriptor table (type and size in 256-byte pages), and raw GCR
    recordings. The recordings are converted to a variable-length nibble
    payload in memory on load; tracks of unsupported type land in the
    bad block map. FDI images are always read-only.
*/

use std::collections::BTreeSet;

use crate::{
    source::{BufferSource, Source, SourceHandle},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError,
};

pub const SIGNATURE: &[u8; 27] = b"Formatted Disk Image file\r\n";
const HEADER_LEN: u64 = 512;
/// Offsets within the fixed header.
const OFF_VERSION: u64 = 140;
const OFF_LAST_TRACK: u64 = 142;
const OFF_LAST_HEAD: u64 = 144;
const OFF_TRACK_TABLE: u64 = 152;
const MAX_TRACKS: usize = 180;

/// Track descriptor types we can serve as GCR nibbles.
const TRACK_TYPE_BLANK: u8 = 0x00;
const TRACK_TYPE_GCR_APPLE: u8 = 0xa0;

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len < HEADER_LEN {
        return WrapperTestResult::None;
    }
    let mut magic = [0u8; 27];
    if src.borrow_mut().read_at(0, &mut magic).is_err() {
        return WrapperTestResult::None;
    }
    if &magic == SIGNATURE {
        WrapperTestResult::Match
    } else {
        WrapperTestResult::None
    }
}

pub struct Fdi {
    /// (offset, len) into the assembled nibble payload, per track.
    tracks: Vec<(u64, usize)>,
    num_tracks: usize,
}

impl Fdi {
    pub fn new() -> Fdi {
        Fdi {
            tracks: Vec::new(),
            num_tracks: 0,
        }
    }

    pub fn track_len(&self, track: usize) -> usize {
        self.tracks.get(track).map(|t| t.1).unwrap_or(0)
    }

    pub fn track_offset(&self, track: usize) -> u64 {
        self.tracks.get(track).map(|t| t.0).unwrap_or(0)
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    pub fn prep(&mut self, src: &SourceHandle, len: u64) -> Result<PrepResult, DiskImageError> {
        let mut word = [0u8; 2];
        src.borrow_mut().read_at(OFF_VERSION, &mut word)?;
        let version = u16::from_be_bytes(word);
        src.borrow_mut().read_at(OFF_LAST_TRACK, &mut word)?;
        let last_track = u16::from_be_bytes(word) as usize;
        let mut byte = [0u8; 1];
        src.borrow_mut().read_at(OFF_LAST_HEAD, &mut byte)?;
        let last_head = byte[0];

        log::debug!(
            "Fdi::prep(): version {:04x}, last track {}, last head {}",
            version,
            last_track,
            last_head
        );
        if last_head != 0 {
            // Apple 5.25" disks are single-sided.
            return Err(DiskImageError::UnsupportedImageFeature);
        }
        let track_count = (last_track + 1).min(MAX_TRACKS);

        // Descriptor table: one (type, pages) pair per track.
        let mut table = vec![0u8; MAX_TRACKS * 2];
        src.borrow_mut().read_at(OFF_TRACK_TABLE, &mut table)?;

        let mut payload = Vec::new();
        let mut bad_blocks = BTreeSet::new();
        self.tracks.clear();
        let mut data_pos = HEADER_LEN;

        for track in 0..track_count {
            let track_type = table[track * 2];
            let pages = table[track * 2 + 1] as usize;
            let data_len = pages * 256;

            if data_pos + data_len as u64 > len {
                log::warn!("Fdi::prep(): track {} extends past EOF", track);
                return Err(DiskImageError::BadFileFormat);
            }

            match track_type {
                TRACK_TYPE_GCR_APPLE => {
                    let mut data = vec![0u8; data_len];
                    src.borrow_mut().read_at(data_pos, &mut data)?;
                    let offset = payload.len() as u64;
                    payload.extend_from_slice(&data);
                    self.tracks.push((offset, data_len));
                }
                TRACK_TYPE_BLANK => {
                    self.tracks.push((payload.len() as u64, 0));
                }
                other => {
                    // A recording we can't decode; raw track access for
                    // this track is impossible.
                    log::warn!(
                        "Fdi::prep(): track {} has unsupported type {:02x}",
                        track,
                        other
                    );
                    self.tracks.push((payload.len() as u64, 0));
                    for block in (track * 8)..(track * 8 + 8) {
                        bad_blocks.insert(block as u64);
                    }
                }
            }
            data_pos += data_len as u64;
        }
        self.num_tracks = track_count;

        let length = payload.len() as u64;
        Ok(PrepResult {
            payload: Source::Buffer(BufferSource::with_data(payload, false)).into_handle(),
            length,
            physical: PhysicalFormat::Nib525Var,
            order: SectorOrder::Physical,
            dos_volume: None,
            bad_blocks,
            damaged: false,
        })
    }
}

impl Default for Fdi {
    fn default() -> Self {
        Fdi::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BufferSource, Source};

    fn build_fdi(tracks: &[(u8, Vec<u8>)]) -> SourceHandle {
        let mut bytes = vec![0u8; HEADER_LEN as usize];
        bytes[..27].copy_from_slice(SIGNATURE);
        bytes[OFF_VERSION as usize..OFF_VERSION as usize + 2]
            .copy_from_slice(&0x0200u16.to_be_bytes());
        bytes[OFF_LAST_TRACK as usize..OFF_LAST_TRACK as usize + 2]
            .copy_from_slice(&((tracks.len() as u16 - 1).to_be_bytes()));
        for (i, (track_type, data)) in tracks.iter().enumerate() {
            assert_eq!(data.len() % 256, 0);
            bytes[OFF_TRACK_TABLE as usize + i * 2] = *track_type;
            bytes[OFF_TRACK_TABLE as usize + i * 2 + 1] = (data.len() / 256) as u8;
        }
        for (_, data) in tracks {
            bytes.extend_from_slice(data);
        }
        Source::Buffer(BufferSource::with_data(bytes, false)).into_handle()
    }

    #[test]
    fn gcr_tracks_become_nibble_payload() {
        let src = build_fdi(&[
            (TRACK_TYPE_GCR_APPLE, vec![0xff; 6656]),
            (TRACK_TYPE_GCR_APPLE, vec![0xaa; 6400]),
        ]);
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);

        let mut wrapper = Fdi::new();
        let prep = wrapper.prep(&src, len).unwrap();
        assert_eq!(prep.physical, PhysicalFormat::Nib525Var);
        assert_eq!(wrapper.num_tracks(), 2);
        assert_eq!(wrapper.track_len(0), 6656);
        assert_eq!(wrapper.track_len(1), 6400);
        assert_eq!(wrapper.track_offset(1), 6656);
        assert!(prep.bad_blocks.is_empty());
    }

    #[test]
    fn unsupported_track_type_marks_bad_blocks() {
        let src = build_fdi(&[(0x02, vec![0u8; 512])]);
        let len = src.borrow().len();
        let mut wrapper = Fdi::new();
        let prep = wrapper.prep(&src, len).unwrap();
        assert_eq!(prep.bad_blocks.len(), 8);
        assert_eq!(wrapper.track_len(0), 0);
    }
}
