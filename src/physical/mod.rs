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

    src/physical/mod.rs

    Sector ordering. A 16-sector track is written in ascending "raw"
    (on-disk) order and remapped through a translation table per
    ordering; Copy ][+ "physical" order is the identity. 13-sector
    tracks have no skew translation.
*/

pub mod gcr;
pub mod nibble;

use crate::{
    types::enums::SectorOrder,
    DiskImageError, SECTOR_SIZE,
};

static RAW2DOS: [usize; 16] = [0, 7, 14, 6, 13, 5, 12, 4, 11, 3, 10, 2, 9, 1, 8, 15];
static DOS2RAW: [usize; 16] = [0, 13, 11, 9, 7, 5, 3, 1, 14, 12, 10, 8, 6, 4, 2, 15];
static RAW2PRODOS: [usize; 16] = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];
static PRODOS2RAW: [usize; 16] = [0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15];
static RAW2CPM: [usize; 16] = [0, 11, 6, 1, 12, 7, 2, 13, 8, 3, 14, 9, 4, 15, 10, 5];
static CPM2RAW: [usize; 16] = [0, 3, 6, 9, 12, 15, 2, 5, 8, 11, 14, 1, 4, 7, 10, 13];

/// Convert a logical sector number in `order` to the raw on-disk number.
fn to_raw(sector: usize, order: SectorOrder) -> usize {
    match order {
        SectorOrder::ProDos => PRODOS2RAW[sector],
        SectorOrder::Dos => DOS2RAW[sector],
        SectorOrder::Cpm => CPM2RAW[sector],
        SectorOrder::Physical | SectorOrder::Unknown => sector,
    }
}

/// Convert a raw on-disk sector number to its index under `order`.
fn from_raw(sector: usize, order: SectorOrder) -> usize {
    match order {
        SectorOrder::ProDos => RAW2PRODOS[sector],
        SectorOrder::Dos => RAW2DOS[sector],
        SectorOrder::Cpm => RAW2CPM[sector],
        SectorOrder::Physical | SectorOrder::Unknown => sector,
    }
}

/// Sector pairing state for OzDOS-style disks, where two logical
/// 16-sector tracks share one physical 32-sector slot.
#[derive(Copy, Clone, Debug)]
pub struct SectorPairing {
    /// Selects sectors at even (0) or odd (1) offsets.
    pub offset: usize,
}

/// The resolved target of one track/sector access.
#[derive(Copy, Clone, Debug)]
pub struct SectorTarget {
    /// Byte offset of the sector within the payload (meaningful for
    /// sector payloads).
    pub offset: u64,
    /// Sector index in the image's stored ordering (meaningful for
    /// nibble payloads, where it names the on-disk sector to decode).
    pub image_sector: usize,
}

/// Compute the payload location of `(track, sector)`, translating the
/// filesystem's ordering to the image's stored ordering.
///
/// 32-sector (UNIDOS/OzDOS) tracks are treated as two 16-sector halves
/// with the same permutation applied within each half. With pairing
/// enabled the track index is doubled and half the payload selected.
pub fn calc_sector_offset(
    track: usize,
    sector: usize,
    image_order: SectorOrder,
    fs_order: SectorOrder,
    num_tracks: usize,
    sectors_per_track: usize,
    pairing: Option<SectorPairing>,
) -> Result<SectorTarget, DiskImageError> {
    if track >= num_tracks {
        log::debug!("calc_sector_offset(): invalid track {}", track);
        return Err(DiskImageError::InvalidTrack);
    }
    if sector >= sectors_per_track {
        log::debug!("calc_sector_offset(): invalid sector {}", sector);
        return Err(DiskImageError::InvalidSector);
    }

    if sectors_per_track == 16 || sectors_per_track == 32 {
        let mut track = track;
        let mut sector = sector;
        let mut offset: u64;

        if let Some(pair) = pairing {
            // Two logical tracks per stored slot; the pair offset picks
            // the interleaved half.
            track *= 2;
            if sector >= 16 {
                track += 1;
                sector -= 16;
            }
            offset = (track * sectors_per_track * SECTOR_SIZE) as u64;

            sector = sector * 2 + pair.offset;
            if sector >= 16 {
                offset += (16 * SECTOR_SIZE) as u64;
                sector -= 16;
            }
        } else {
            offset = (track * sectors_per_track * SECTOR_SIZE) as u64;
            if sector >= 16 {
                offset += (16 * SECTOR_SIZE) as u64;
                sector -= 16;
            }
        }

        let raw = to_raw(sector, fs_order);
        let image_sector = from_raw(raw, image_order);

        if image_order == fs_order {
            debug_assert_eq!(sector, image_sector);
        }

        Ok(SectorTarget {
            offset: offset + (image_sector * SECTOR_SIZE) as u64,
            image_sector,
        })
    } else if sectors_per_track == 13 {
        // Sector skew has no meaning on 13-sector disks; no translation.
        if image_order != fs_order {
            log::debug!(
                "calc_sector_offset(): nspt=13 with img={:?} fs={:?}; using identity",
                image_order,
                fs_order
            );
        }
        Ok(SectorTarget {
            offset: ((track * sectors_per_track + sector) * SECTOR_SIZE) as u64,
            image_sector: sector,
        })
    } else {
        Err(DiskImageError::UnsupportedAccess)
    }
}

/// True when the block view is a straight linear mapping over the
/// payload, enabling single large reads. Holds whenever the image's
/// stored ordering equals the filesystem ordering on a sector payload,
/// or the payload is pure blocks.
pub fn is_linear_blocks(image_order: SectorOrder, fs_order: SectorOrder) -> bool {
    image_order == fs_order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_tables_are_inverse_pairs() {
        for i in 0..16 {
            assert_eq!(RAW2DOS[DOS2RAW[i]], i);
            assert_eq!(DOS2RAW[RAW2DOS[i]], i);
            assert_eq!(RAW2PRODOS[PRODOS2RAW[i]], i);
            assert_eq!(PRODOS2RAW[RAW2PRODOS[i]], i);
            assert_eq!(RAW2CPM[CPM2RAW[i]], i);
            assert_eq!(CPM2RAW[RAW2CPM[i]], i);
        }
    }

    #[test]
    fn same_order_is_identity() {
        for sector in 0..16 {
            let target = calc_sector_offset(
                3,
                sector,
                SectorOrder::Dos,
                SectorOrder::Dos,
                35,
                16,
                None,
            )
            .unwrap();
            assert_eq!(target.offset, (3 * 16 + sector) as u64 * 256);
        }
    }

    #[test]
    fn dos_fs_on_prodos_image_cross_maps() {
        // Logical DOS sector 1 is raw sector 13, stored at ProDOS index 14.
        let target = calc_sector_offset(
            0,
            1,
            SectorOrder::ProDos,
            SectorOrder::Dos,
            35,
            16,
            None,
        )
        .unwrap();
        assert_eq!(target.image_sector, 14);
        assert_eq!(target.offset, 14 * 256);
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(matches!(
            calc_sector_offset(35, 0, SectorOrder::Dos, SectorOrder::Dos, 35, 16, None),
            Err(DiskImageError::InvalidTrack)
        ));
        assert!(matches!(
            calc_sector_offset(0, 16, SectorOrder::Dos, SectorOrder::Dos, 35, 16, None),
            Err(DiskImageError::InvalidSector)
        ));
    }

    #[test]
    fn thirteen_sector_has_no_skew() {
        let target = calc_sector_offset(
            2,
            5,
            SectorOrder::Physical,
            SectorOrder::Dos,
            35,
            13,
            None,
        )
        .unwrap();
        assert_eq!(target.offset, (2 * 13 + 5) as u64 * 256);
        assert_eq!(target.image_sector, 5);
    }

    #[test]
    fn wide_track_second_half_offsets() {
        // 32-sector track: sector 16 maps into the second 16-sector half.
        let target = calc_sector_offset(
            1,
            16,
            SectorOrder::Dos,
            SectorOrder::Dos,
            50,
            32,
            None,
        )
        .unwrap();
        assert_eq!(target.offset, (32 * 256 + 16 * 256) as u64);
    }

    #[test]
    fn pairing_doubles_track_and_interleaves() {
        // OzDOS half at even offsets: logical t0/s1 lands at raw slot 2.
        let target = calc_sector_offset(
            0,
            1,
            SectorOrder::Dos,
            SectorOrder::Dos,
            50,
            32,
            Some(SectorPairing { offset: 0 }),
        )
        .unwrap();
        assert_eq!(target.image_sector, 2);
        let odd = calc_sector_offset(
            0,
            1,
            SectorOrder::Dos,
            SectorOrder::Dos,
            50,
            32,
            Some(SectorPairing { offset: 1 }),
        )
        .unwrap();
        assert_eq!(odd.image_sector, 3);
    }
}
