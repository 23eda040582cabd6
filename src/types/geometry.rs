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

    src/types/geometry.rs

    The track/sector/block geometry of an open image, together with the
    capability flags derived from it.
*/

use std::fmt::{Display, Formatter};

use crate::{BLOCK_SIZE, SECTOR_SIZE};

/// Geometry of an analyzed disk image. At least one of the capability
/// flags is always set on a successfully analyzed image; a 16-sector
/// nibble image sets all three.
#[derive(Copy, Clone, Debug, Default)]
pub struct DiskGeometry {
    pub num_tracks: usize,
    pub sectors_per_track: usize,
    pub num_blocks: u64,
    pub has_sectors: bool,
    pub has_blocks: bool,
    pub has_nibbles: bool,
}

impl DiskGeometry {
    /// Geometry for a plain sector image of `num_tracks` tracks of
    /// `sectors_per_track` sectors. Blocks are available whenever the
    /// sector count per track is even.
    pub fn from_sectors(num_tracks: usize, sectors_per_track: usize) -> DiskGeometry {
        let has_blocks = sectors_per_track % 2 == 0;
        DiskGeometry {
            num_tracks,
            sectors_per_track,
            num_blocks: if has_blocks {
                (num_tracks * sectors_per_track / 2) as u64
            } else {
                0
            },
            has_sectors: true,
            has_blocks,
            has_nibbles: false,
        }
    }

    /// Geometry for a block device with no track structure.
    pub fn from_blocks(num_blocks: u64) -> DiskGeometry {
        DiskGeometry {
            num_tracks: 0,
            sectors_per_track: 0,
            num_blocks,
            has_sectors: false,
            has_blocks: true,
            has_nibbles: false,
        }
    }

    /// Total payload bytes addressable through the sector view.
    pub fn sector_bytes(&self) -> u64 {
        (self.num_tracks * self.sectors_per_track * SECTOR_SIZE) as u64
    }

    /// Total payload bytes addressable through the block view.
    pub fn block_bytes(&self) -> u64 {
        self.num_blocks * BLOCK_SIZE as u64
    }

    pub fn is_valid(&self) -> bool {
        self.has_sectors || self.has_blocks || self.has_nibbles
    }
}

impl Display for DiskGeometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.has_sectors {
            write!(f, "{}t/{}s", self.num_tracks, self.sectors_per_track)?;
            if self.has_blocks {
                write!(f, " ({} blocks)", self.num_blocks)?;
            }
            Ok(())
        } else if self.has_blocks {
            write!(f, "{} blocks", self.num_blocks)
        } else {
            write!(f, "{} raw tracks", self.num_tracks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_geometry_derives_blocks() {
        let geom = DiskGeometry::from_sectors(35, 16);
        assert!(geom.has_blocks);
        assert_eq!(geom.num_blocks, 280);
        assert_eq!(geom.sector_bytes(), 143_360);
    }

    #[test]
    fn thirteen_sector_geometry_has_no_blocks() {
        let geom = DiskGeometry::from_sectors(35, 13);
        assert!(!geom.has_blocks);
        assert_eq!(geom.num_blocks, 0);
    }
}
