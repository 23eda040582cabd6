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

    src/wrappers/mod.rs

    Image wrappers: the per-format adorned container between the (outer)
    file and the unadorned payload. Each wrapper parses its header on
    prep, exposes the payload as a window or buffer, and rebuilds its
    header (or recompresses) on flush. Dispatch is a tagged enum.
*/

pub mod ddd;
pub mod diskcopy42;
pub mod fdi;
pub mod nufx;
pub mod sim2e;
pub mod trackstar;
pub mod two_mg;
pub mod unadorned;

use std::collections::BTreeSet;

use crate::{
    source::SourceHandle,
    types::enums::{FileFormat, PhysicalFormat, SectorOrder},
    DiskImageError,
};

/// Result of probing a source for a wrapper format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WrapperTestResult {
    None,
    Match,
    /// Definitely this format, but the embedded checksum is bad. Terminal
    /// during content probing; recoverable for extension matches.
    Corrupt,
    /// A NuFX archive of ordinary files rather than a disk image.
    IsFileArchive,
}

/// Everything a wrapper learns while prepping an image for access.
pub struct PrepResult {
    /// Handle addressing the unadorned payload.
    pub payload: SourceHandle,
    /// Length of the unadorned payload in bytes.
    pub length: u64,
    pub physical: PhysicalFormat,
    pub order: SectorOrder,
    pub dos_volume: Option<u8>,
    pub bad_blocks: BTreeSet<u64>,
    /// Set when the wrapper identified itself but its checksum failed;
    /// the image opens read-only with a warning note.
    pub damaged: bool,
}

/// An instantiated image wrapper, carrying whatever header state the
/// format needs for a faithful round trip.
pub enum ImageWrapper {
    Unadorned(unadorned::Unadorned),
    TwoMg(two_mg::TwoMg),
    DiskCopy42(diskcopy42::DiskCopy42),
    Sim2e(sim2e::Sim2eHdv),
    TrackStar(trackstar::TrackStar),
    Fdi(fdi::Fdi),
    NuFx(nufx::NuFx),
    Ddd(ddd::Ddd),
}

impl ImageWrapper {
    pub fn format(&self) -> FileFormat {
        match self {
            ImageWrapper::Unadorned(_) => FileFormat::Unadorned,
            ImageWrapper::TwoMg(_) => FileFormat::TwoMG,
            ImageWrapper::DiskCopy42(_) => FileFormat::DiskCopy42,
            ImageWrapper::Sim2e(_) => FileFormat::Sim2eHDV,
            ImageWrapper::TrackStar(_) => FileFormat::TrackStar,
            ImageWrapper::Fdi(_) => FileFormat::FDI,
            ImageWrapper::NuFx(_) => FileFormat::NuFX,
            ImageWrapper::Ddd(_) => FileFormat::DDD,
        }
    }

    /// Parse the header and expose the unadorned payload.
    pub fn prep(
        &mut self,
        src: &SourceHandle,
        len: u64,
        read_only: bool,
    ) -> Result<PrepResult, DiskImageError> {
        match self {
            ImageWrapper::Unadorned(w) => w.prep(src, len),
            ImageWrapper::TwoMg(w) => w.prep(src, len),
            ImageWrapper::DiskCopy42(w) => w.prep(src, len),
            ImageWrapper::Sim2e(w) => w.prep(src, len),
            ImageWrapper::TrackStar(w) => w.prep(src, len),
            ImageWrapper::Fdi(w) => w.prep(src, len),
            ImageWrapper::NuFx(w) => w.prep(src, len, read_only),
            ImageWrapper::Ddd(w) => w.prep(src, len),
        }
    }

    /// Push payload changes back through the wrapper, rebuilding headers
    /// or recompressing as needed. Returns the new wrapped length.
    pub fn flush(
        &mut self,
        src: &SourceHandle,
        payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<u64, DiskImageError> {
        match self {
            ImageWrapper::Unadorned(w) => w.flush(src, payload_len),
            ImageWrapper::TwoMg(w) => w.flush(src, payload_len),
            ImageWrapper::DiskCopy42(w) => w.flush(src, payload, payload_len),
            ImageWrapper::Sim2e(w) => w.flush(src, payload_len),
            ImageWrapper::TrackStar(w) => w.flush(src, payload, payload_len),
            ImageWrapper::Fdi(_) => Err(DiskImageError::AccessDenied),
            ImageWrapper::NuFx(w) => w.flush(src, payload, payload_len),
            ImageWrapper::Ddd(w) => w.flush(src, payload, payload_len),
        }
    }

    /// A wrapper has fast flush when flushing costs no more than a header
    /// rewrite; compressing wrappers do not.
    pub fn has_fast_flush(&self) -> bool {
        match self {
            ImageWrapper::Unadorned(_) => true,
            ImageWrapper::TwoMg(_) => true,
            ImageWrapper::DiskCopy42(_) => true,
            ImageWrapper::Sim2e(_) => true,
            ImageWrapper::TrackStar(_) => true,
            ImageWrapper::Fdi(_) => false,
            ImageWrapper::NuFx(_) => false,
            ImageWrapper::Ddd(_) => false,
        }
    }

    /// Byte length of one raw nibble track within the payload. Only
    /// meaningful for nibble images; variable-length formats answer from
    /// their track tables.
    pub fn nibble_track_len(&self, physical: PhysicalFormat, track: usize) -> usize {
        match self {
            ImageWrapper::TrackStar(w) => w.track_len(track),
            ImageWrapper::Fdi(w) => w.track_len(track),
            _ => match physical {
                PhysicalFormat::Nib525_6656 => crate::NIB_TRACK_LEN_6656,
                PhysicalFormat::Nib525_6384 => crate::NIB_TRACK_LEN_6384,
                _ => 0,
            },
        }
    }

    /// Byte offset of one raw nibble track within the payload.
    pub fn nibble_track_offset(&self, physical: PhysicalFormat, track: usize) -> u64 {
        match self {
            ImageWrapper::TrackStar(w) => w.track_offset(track),
            ImageWrapper::Fdi(w) => w.track_offset(track),
            _ => match physical {
                PhysicalFormat::Nib525_6656 => (track * crate::NIB_TRACK_LEN_6656) as u64,
                PhysicalFormat::Nib525_6384 => (track * crate::NIB_TRACK_LEN_6384) as u64,
                _ => 0,
            },
        }
    }
}

/// Probe `src` for `format` by content.
pub fn test_wrapper(
    format: FileFormat,
    src: &SourceHandle,
    len: u64,
) -> WrapperTestResult {
    match format {
        FileFormat::Unadorned => unadorned::test_sector(len).max_with(unadorned::test_nibble(len)),
        FileFormat::TwoMG => two_mg::test(src, len),
        FileFormat::DiskCopy42 => diskcopy42::test(src, len),
        FileFormat::Sim2eHDV => sim2e::test(src, len),
        FileFormat::TrackStar => trackstar::test(src, len),
        FileFormat::FDI => fdi::test(src, len),
        FileFormat::NuFX => nufx::test(src, len),
        FileFormat::DDD => ddd::test(src, len),
    }
}

impl WrapperTestResult {
    fn max_with(self, other: WrapperTestResult) -> WrapperTestResult {
        if self == WrapperTestResult::None {
            other
        } else {
            self
        }
    }
}

/// Instantiate a fresh wrapper for `format`.
pub fn new_wrapper(format: FileFormat, physical: PhysicalFormat) -> ImageWrapper {
    match format {
        FileFormat::Unadorned => ImageWrapper::Unadorned(unadorned::Unadorned::new(physical)),
        FileFormat::TwoMG => ImageWrapper::TwoMg(two_mg::TwoMg::new()),
        FileFormat::DiskCopy42 => ImageWrapper::DiskCopy42(diskcopy42::DiskCopy42::new()),
        FileFormat::Sim2eHDV => ImageWrapper::Sim2e(sim2e::Sim2eHdv::new()),
        FileFormat::TrackStar => ImageWrapper::TrackStar(trackstar::TrackStar::new()),
        FileFormat::FDI => ImageWrapper::Fdi(fdi::Fdi::new()),
        FileFormat::NuFX => ImageWrapper::NuFx(nufx::NuFx::new()),
        FileFormat::DDD => ImageWrapper::Ddd(ddd::Ddd::new()),
    }
}
