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

    src/wrappers/ddd.rs

    Dalton's Disk Disintegrator: per-track compression of a 35-track
    DOS-ordered sector disk. Each track lists its most frequent bytes in
    a favorites table and then bit-packs the track, spending a short
    code on favorites and nine bits on everything else. Detection is by
    trial expansion, since the format carries no magic.
*/

use std::collections::BTreeSet;

use crate::{
    source::{read_all, BufferSource, Source, SourceHandle},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError, SECTOR_SIZE, TRACK_COUNT_525,
};

const NUM_FAVORITES: usize = 20;
const TRACK_LEN: usize = 16 * SECTOR_SIZE;
const DISK_LEN: usize = TRACK_COUNT_525 * TRACK_LEN;

struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitWriter {
    fn new() -> BitWriter {
        BitWriter {
            out: Vec::new(),
            acc: 0,
            bits: 0,
        }
    }

    fn put(&mut self, value: u32, width: u32) {
        self.acc = (self.acc << width) | (value & ((1 << width) - 1));
        self.bits += width;
        while self.bits >= 8 {
            self.out.push((self.acc >> (self.bits - 8)) as u8);
            self.bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.out.push((self.acc << (8 - self.bits)) as u8);
        }
        self.out
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    bits: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader {
            data,
            pos: 0,
            acc: 0,
            bits: 0,
        }
    }

    fn get(&mut self, width: u32) -> Option<u32> {
        while self.bits < width {
            let byte = *self.data.get(self.pos)?;
            self.pos += 1;
            self.acc = (self.acc << 8) | byte as u32;
            self.bits += 8;
        }
        self.bits -= width;
        Some((self.acc >> self.bits) & ((1 << width) - 1))
    }

    fn byte_pos(&self) -> usize {
        self.pos
    }
}

/// Compress one 4096-byte track: favorites table, then codes. A
/// favorite costs 1 + 5 bits, a literal 1 + 8.
fn pack_track(track: &[u8]) -> Vec<u8> {
    let mut freq = [0usize; 256];
    for &b in track {
        freq[b as usize] += 1;
    }
    let mut ranked: Vec<u8> = (0u16..256).map(|b| b as u8).collect();
    ranked.sort_by_key(|&b| std::cmp::Reverse(freq[b as usize]));
    let favorites: Vec<u8> = ranked[..NUM_FAVORITES].to_vec();

    let mut index = [None::<u8>; 256];
    for (i, &b) in favorites.iter().enumerate() {
        index[b as usize] = Some(i as u8);
    }

    let mut writer = BitWriter::new();
    for &b in &favorites {
        writer.put(b as u32, 8);
    }
    for &b in track {
        match index[b as usize] {
            Some(i) => {
                writer.put(0, 1);
                writer.put(i as u32, 5);
            }
            None => {
                writer.put(1, 1);
                writer.put(b as u32, 8);
            }
        }
    }
    writer.finish()
}

/// Expand one track; returns the decoded track and the number of input
/// bytes consumed.
fn unpack_track(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut reader = BitReader::new(data);
    let mut favorites = [0u8; NUM_FAVORITES];
    for fav in favorites.iter_mut() {
        *fav = reader.get(8)? as u8;
    }

    let mut track = Vec::with_capacity(TRACK_LEN);
    while track.len() < TRACK_LEN {
        if reader.get(1)? == 0 {
            let idx = reader.get(5)? as usize;
            if idx >= NUM_FAVORITES {
                return None;
            }
            track.push(favorites[idx]);
        } else {
            track.push(reader.get(8)? as u8);
        }
    }
    Some((track, reader.byte_pos()))
}

fn unpack_disk(raw: &[u8]) -> Option<(u8, Vec<u8>)> {
    if raw.len() < 2 {
        return None;
    }
    let volume = raw[0];
    let mut payload = Vec::with_capacity(DISK_LEN);
    let mut pos = 1;
    for _track in 0..TRACK_COUNT_525 {
        let (track, used) = unpack_track(&raw[pos..])?;
        payload.extend_from_slice(&track);
        pos += used;
    }
    // With no magic number, full consumption of the input is the only
    // corroboration that this really was a DDD file.
    if pos != raw.len() {
        return None;
    }
    Some((volume, payload))
}

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    // No magic number; a plausible size plus a clean trial expansion is
    // the only identification available. An incompressible disk can
    // pack slightly larger than its raw form.
    if len < 512 || len > (DISK_LEN + DISK_LEN / 7) as u64 {
        return WrapperTestResult::None;
    }
    let raw = match read_all(src) {
        Ok(raw) => raw,
        Err(_) => return WrapperTestResult::None,
    };
    match unpack_disk(&raw) {
        Some(_) => WrapperTestResult::Match,
        None => WrapperTestResult::None,
    }
}

pub struct Ddd {
    volume: u8,
}

impl Ddd {
    pub fn new() -> Ddd {
        Ddd { volume: 254 }
    }

    pub fn prep(&mut self, src: &SourceHandle, _len: u64) -> Result<PrepResult, DiskImageError> {
        let raw = read_all(src)?;
        let (volume, payload) = unpack_disk(&raw).ok_or(DiskImageError::BadCompressedData)?;
        self.volume = volume;

        log::debug!(
            "Ddd::prep(): expanded {} -> {} bytes, volume {}",
            raw.len(),
            payload.len(),
            volume
        );

        Ok(PrepResult {
            payload: Source::Buffer(BufferSource::with_data(payload, false)).into_handle(),
            length: DISK_LEN as u64,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::Dos,
            dos_volume: Some(volume),
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }

    pub fn flush(
        &mut self,
        src: &SourceHandle,
        payload: &SourceHandle,
        _payload_len: u64,
    ) -> Result<u64, DiskImageError> {
        let data = read_all(payload)?;
        if data.len() != DISK_LEN {
            return Err(DiskImageError::BadRawData);
        }

        let mut out = vec![self.volume];
        for track in data.chunks_exact(TRACK_LEN) {
            out.extend_from_slice(&pack_track(track));
        }

        src.borrow_mut().set_len(0)?;
        src.borrow_mut().write_at(0, &out)?;
        src.borrow_mut().set_len(out.len() as u64)?;

        log::debug!("Ddd::flush(): compressed {} -> {} bytes", DISK_LEN, out.len());
        Ok(out.len() as u64)
    }

    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
        dos_volume: Option<u8>,
    ) -> Result<PrepResult, DiskImageError> {
        if payload_len != DISK_LEN as u64 {
            return Err(DiskImageError::InvalidCreateReq);
        }
        self.volume = dos_volume.unwrap_or(254);

        let payload =
            Source::Buffer(BufferSource::with_data(vec![0u8; DISK_LEN], false)).into_handle();
        self.flush(src, &payload, payload_len)?;

        Ok(PrepResult {
            payload,
            length: DISK_LEN as u64,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::Dos,
            dos_volume: Some(self.volume),
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }
}

impl Default for Ddd {
    fn default() -> Self {
        Ddd::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_pack_roundtrip() {
        let mut track = vec![0u8; TRACK_LEN];
        for (i, b) in track.iter_mut().enumerate() {
            *b = if i % 7 == 0 { (i % 3) as u8 } else { 0xe5 };
        }
        let packed = pack_track(&track);
        assert!(packed.len() < TRACK_LEN);
        let (unpacked, used) = unpack_track(&packed).unwrap();
        assert_eq!(unpacked, track);
        assert_eq!(used, packed.len());
    }

    #[test]
    fn disk_roundtrip_through_wrapper() {
        use crate::source::{BufferSource, Source};

        let src = Source::Buffer(BufferSource::new(0, true)).into_handle();
        let mut wrapper = Ddd::new();
        let prep = wrapper.create(&src, DISK_LEN as u64, Some(100)).unwrap();

        prep.payload.borrow_mut().write_at(4096, &[0x17; 256]).unwrap();
        wrapper.flush(&src, &prep.payload, DISK_LEN as u64).unwrap();

        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);

        let mut wrapper2 = Ddd::new();
        let prep2 = wrapper2.prep(&src, len).unwrap();
        assert_eq!(prep2.dos_volume, Some(100));
        let mut buf = [0u8; 256];
        prep2.payload.borrow_mut().read_at(4096, &mut buf).unwrap();
        assert_eq!(buf, [0x17; 256]);
    }
}
