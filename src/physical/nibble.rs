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

    src/physical/nibble.rs

    Nibble track decoding. A NibbleDescr profile describes one GCR
    variant: the address/data field framing bytes, checksum behavior and
    payload encoding. The standard profiles are tried in table order
    against a whole disk; the first profile that yields a self-consistent
    full set of sectors on every track wins.

    Formats that don't verify the data checksum should never be written:
    the DOS on such a disk is probably using a non-standard seed, and
    newly written sectors would carry the wrong checksum value.
*/

use crate::{
    physical::gcr,
    DiskImageError, SECTOR_SIZE,
};

/// Payload encoding of one nibble variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NibbleEncoding {
    /// 410-byte groups; 13-sector disks.
    FiveAndThree,
    /// 342-byte groups; 16-sector disks.
    SixAndTwo,
}

/// Special-case behaviors layered on top of the base profile.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NibbleSpecial {
    None,
    /// Muse tweaked DOS 3.2: sectors are written doubled; the logical
    /// sector number is half the recorded one.
    Muse,
    /// SSI RDOS 3.3: odd tracks use a 0xD4 prolog lead-in, even tracks
    /// 0xD5, and the volume byte of the address field is not trusted.
    SkipFirstAddrByte,
}

/// A profile of prolog/epilog/checksum/encoding parameters describing
/// one nibble variant.
#[derive(Copy, Clone, Debug)]
pub struct NibbleDescr {
    pub description: &'static str,
    pub num_sectors: usize,
    pub addr_prolog: [u8; 3],
    pub addr_epilog: [u8; 3],
    pub addr_checksum_seed: u8,
    pub addr_verify_checksum: bool,
    pub addr_verify_track: bool,
    pub addr_epilog_verify_count: usize,
    pub data_prolog: [u8; 3],
    pub data_epilog: [u8; 3],
    pub data_checksum_seed: u8,
    pub data_verify_checksum: bool,
    pub data_epilog_verify_count: usize,
    pub encoding: NibbleEncoding,
    pub special: NibbleSpecial,
}

/// Index of a standard profile, in the order they are attempted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum StdNibbleDescr {
    Dos33Std = 0,
    Dos33Patched,
    Dos33IgnoreChecksum,
    Dos32Std,
    Dos32Patched,
    Muse32,
    Rdos33,
    Rdos32,
}

/// Standard profiles, tried in order of appearance.
pub static STD_NIBBLE_DESCRS: [NibbleDescr; 8] = [
    NibbleDescr {
        description: "DOS 3.3 Standard",
        num_sectors: 16,
        addr_prolog: [0xd5, 0xaa, 0x96],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: true,
        addr_verify_track: true,
        addr_epilog_verify_count: 2,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 2,
        encoding: NibbleEncoding::SixAndTwo,
        special: NibbleSpecial::None,
    },
    NibbleDescr {
        description: "DOS 3.3 Patched",
        num_sectors: 16,
        addr_prolog: [0xd5, 0xaa, 0x96],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: false,
        addr_verify_track: false,
        addr_epilog_verify_count: 0,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 0,
        encoding: NibbleEncoding::SixAndTwo,
        special: NibbleSpecial::None,
    },
    NibbleDescr {
        description: "DOS 3.3 Ignore Checksum",
        num_sectors: 16,
        addr_prolog: [0xd5, 0xaa, 0x96],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: false,
        addr_verify_track: false,
        addr_epilog_verify_count: 0,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: false,
        data_epilog_verify_count: 0,
        encoding: NibbleEncoding::SixAndTwo,
        special: NibbleSpecial::None,
    },
    NibbleDescr {
        description: "DOS 3.2 Standard",
        num_sectors: 13,
        addr_prolog: [0xd5, 0xaa, 0xb5],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: true,
        addr_verify_track: true,
        addr_epilog_verify_count: 2,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 2,
        encoding: NibbleEncoding::FiveAndThree,
        special: NibbleSpecial::None,
    },
    NibbleDescr {
        description: "DOS 3.2 Patched",
        num_sectors: 13,
        addr_prolog: [0xd5, 0xaa, 0xb5],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: false,
        addr_verify_track: false,
        addr_epilog_verify_count: 0,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 0,
        encoding: NibbleEncoding::FiveAndThree,
        special: NibbleSpecial::None,
    },
    NibbleDescr {
        description: "Muse DOS 3.2",
        num_sectors: 13,
        addr_prolog: [0xd5, 0xaa, 0xb5],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: true,
        addr_verify_track: true,
        addr_epilog_verify_count: 2,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 2,
        encoding: NibbleEncoding::FiveAndThree,
        special: NibbleSpecial::Muse,
    },
    NibbleDescr {
        description: "RDOS 3.3",
        num_sectors: 16,
        addr_prolog: [0xd4, 0xaa, 0x96],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: true,
        addr_verify_track: true,
        addr_epilog_verify_count: 0,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 2,
        encoding: NibbleEncoding::SixAndTwo,
        special: NibbleSpecial::SkipFirstAddrByte,
    },
    NibbleDescr {
        description: "RDOS 3.2",
        num_sectors: 13,
        addr_prolog: [0xd4, 0xaa, 0xb7],
        addr_epilog: [0xde, 0xaa, 0xeb],
        addr_checksum_seed: 0x00,
        addr_verify_checksum: true,
        addr_verify_track: true,
        addr_epilog_verify_count: 2,
        data_prolog: [0xd5, 0xaa, 0xad],
        data_epilog: [0xde, 0xaa, 0xeb],
        data_checksum_seed: 0x00,
        data_verify_checksum: true,
        data_epilog_verify_count: 2,
        encoding: NibbleEncoding::FiveAndThree,
        special: NibbleSpecial::SkipFirstAddrByte,
    },
];

impl NibbleDescr {
    pub fn standard(which: StdNibbleDescr) -> &'static NibbleDescr {
        &STD_NIBBLE_DESCRS[which as usize]
    }

    /// Disk bytes occupied by one encoded data payload, checksum included.
    pub fn payload_len(&self) -> usize {
        match self.encoding {
            NibbleEncoding::SixAndTwo => gcr::ENC62_LEN,
            NibbleEncoding::FiveAndThree => gcr::ENC53_LEN,
        }
    }

    /// The address prolog expected on `track`, accounting for the RDOS
    /// 3.3 odd/even lead-in switch.
    fn addr_prolog_for_track(&self, track: usize) -> [u8; 3] {
        let mut prolog = self.addr_prolog;
        if self.special == NibbleSpecial::SkipFirstAddrByte
            && self.encoding == NibbleEncoding::SixAndTwo
            && track % 2 == 0
        {
            prolog[0] = 0xd5;
        }
        prolog
    }
}

/// Maximum bytes scanned between an address field and its data prolog
/// before the sector is declared unreadable.
const DATA_REACH: usize = 96;
/// Maximum bytes scanned for the address epilog.
const EPILOG_REACH: usize = 8;

/// Result of decoding an address field.
#[derive(Copy, Clone, Debug)]
struct AddrField {
    volume: u8,
    sector: u8,
    /// Offset just past the address epilog scan.
    end: usize,
}

/// A circular view of one raw nibble track.
struct TrackView<'a> {
    buf: &'a [u8],
}

impl<'a> TrackView<'a> {
    fn at(&self, pos: usize) -> u8 {
        self.buf[pos % self.buf.len()]
    }

    fn matches(&self, pos: usize, pattern: &[u8]) -> bool {
        pattern.iter().enumerate().all(|(i, &b)| self.at(pos + i) == b)
    }

    /// Find `pattern` starting at or after `start`, scanning at most
    /// `limit` positions. The track wraps once.
    fn find(&self, start: usize, limit: usize, pattern: &[u8]) -> Option<usize> {
        (0..limit).map(|i| start + i).find(|&p| self.matches(p, pattern))
    }

    fn read_44(&self, pos: usize) -> u8 {
        gcr::decode_44([self.at(pos), self.at(pos + 1)])
    }

    fn copy_out(&self, pos: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.at(pos + i)).collect()
    }
}

/// Scan one raw track for the next verifiable address field at or after
/// `start`. A candidate prolog whose field fails checksum, track or
/// epilog verification restarts the search one byte further on. Returns
/// None when no address field exists within two revolutions.
fn next_addr_field(
    view: &TrackView,
    start: usize,
    track: usize,
    descr: &NibbleDescr,
) -> Option<AddrField> {
    let prolog = descr.addr_prolog_for_track(track);
    let limit = view.buf.len() * 2;
    let mut scan = start;

    while scan < limit {
        let pos = view.find(scan, view.buf.len(), &prolog)?;
        let mut cursor = pos + 3;

        let volume = if descr.special == NibbleSpecial::SkipFirstAddrByte {
            // The volume field is not trustworthy on RDOS disks.
            0
        } else {
            view.read_44(cursor)
        };
        let addr_track = view.read_44(cursor + 2);
        let sector = view.read_44(cursor + 4);
        let checksum = view.read_44(cursor + 6);
        cursor += 8;

        if descr.addr_verify_checksum {
            let expect = descr.addr_checksum_seed ^ volume ^ addr_track ^ sector;
            if expect != checksum {
                log::trace!(
                    "next_addr_field(): bad addr checksum t={} (got {:02x} want {:02x})",
                    track,
                    checksum,
                    expect
                );
                scan = pos + 1;
                continue;
            }
        }
        if descr.addr_verify_track && addr_track as usize != track {
            log::trace!(
                "next_addr_field(): track mismatch (addr {} phys {})",
                addr_track,
                track
            );
            scan = pos + 1;
            continue;
        }
        if descr.addr_epilog_verify_count > 0 {
            let want = &descr.addr_epilog[..descr.addr_epilog_verify_count];
            if view.find(cursor, EPILOG_REACH, want).is_none() {
                scan = pos + 1;
                continue;
            }
        }

        return Some(AddrField {
            volume,
            sector,
            end: cursor,
        });
    }
    None
}

/// Decode the data field following an address field.
fn decode_data_field(
    view: &TrackView,
    addr_end: usize,
    descr: &NibbleDescr,
) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
    let data_pos = view
        .find(addr_end, DATA_REACH, &descr.data_prolog)
        .ok_or(DiskImageError::SectorUnreadable)?;

    let enc = view.copy_out(data_pos + 3, descr.payload_len());
    let data = match descr.encoding {
        NibbleEncoding::SixAndTwo => {
            gcr::decode_62(&enc, descr.data_checksum_seed, descr.data_verify_checksum)?
        }
        NibbleEncoding::FiveAndThree => {
            gcr::decode_53(&enc, descr.data_checksum_seed, descr.data_verify_checksum)?
        }
    };

    if descr.data_epilog_verify_count > 0 {
        let epilog_at = data_pos + 3 + descr.payload_len();
        let want = &descr.data_epilog[..descr.data_epilog_verify_count];
        if view.find(epilog_at, EPILOG_REACH, want).is_none() {
            return Err(DiskImageError::SectorUnreadable);
        }
    }
    Ok(data)
}

/// Map an on-disk address-field sector number to the logical sector,
/// applying the Muse doubling rule. Returns None for addresses outside
/// the logical range.
fn logical_sector(raw: u8, descr: &NibbleDescr) -> Option<usize> {
    let sector = if descr.special == NibbleSpecial::Muse {
        if raw % 2 != 0 {
            return None;
        }
        (raw / 2) as usize
    } else {
        raw as usize
    };
    (sector < descr.num_sectors).then_some(sector)
}

/// Statistics from decoding one whole track.
pub(crate) struct TrackStats {
    pub sectors_found: usize,
    pub volume: u8,
}

/// Decode every sector on a raw track. Used by profile analysis.
pub(crate) fn analyze_track(
    raw: &[u8],
    track: usize,
    descr: &NibbleDescr,
) -> Result<TrackStats, DiskImageError> {
    let view = TrackView { buf: raw };
    let mut seen = vec![false; descr.num_sectors];
    let mut volume = 0;
    let mut found = 0;
    let mut pos = 0;
    let limit = raw.len() * 2;

    while pos < limit && found < descr.num_sectors {
        let field = match next_addr_field(&view, pos, track, descr) {
            Some(f) if f.end > pos => f,
            _ => break,
        };
        pos = field.end;

        let Some(sector) = logical_sector(field.sector, descr) else {
            continue;
        };
        if seen[sector] {
            // Wrapped around to a sector we already have.
            continue;
        }
        if decode_data_field(&view, field.end, descr).is_ok() {
            seen[sector] = true;
            found += 1;
            volume = field.volume;
        }
    }

    Ok(TrackStats {
        sectors_found: found,
        volume,
    })
}

/// Read one 256-byte sector out of a raw track.
pub(crate) fn read_sector(
    raw: &[u8],
    track: usize,
    sector: usize,
    descr: &NibbleDescr,
) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
    let view = TrackView { buf: raw };
    let mut pos = 0;
    let limit = raw.len() * 2;

    while pos < limit {
        let field = match next_addr_field(&view, pos, track, descr) {
            Some(f) if f.end > pos => f,
            _ => break,
        };
        pos = field.end;
        if logical_sector(field.sector, descr) == Some(sector) {
            return decode_data_field(&view, field.end, descr);
        }
    }
    Err(DiskImageError::SectorUnreadable)
}

/// Re-encode one sector's data field in place within a raw track.
pub(crate) fn write_sector(
    raw: &mut [u8],
    track: usize,
    sector: usize,
    descr: &NibbleDescr,
    data: &[u8; SECTOR_SIZE],
) -> Result<(), DiskImageError> {
    if !descr.data_verify_checksum {
        // Non-standard checksums; writing would corrupt the disk.
        return Err(DiskImageError::WriteProtected);
    }

    let (data_pos, payload_len) = {
        let view = TrackView { buf: raw };
        let mut pos = 0;
        let limit = raw.len() * 2;
        let mut found = None;

        while pos < limit {
            let field = match next_addr_field(&view, pos, track, descr) {
                Some(f) if f.end > pos => f,
                _ => break,
            };
            pos = field.end;
            if logical_sector(field.sector, descr) == Some(sector) {
                let dp = view
                    .find(field.end, DATA_REACH, &descr.data_prolog)
                    .ok_or(DiskImageError::SectorUnreadable)?;
                found = Some(dp + 3);
                break;
            }
        }
        (found.ok_or(DiskImageError::SectorUnreadable)?, descr.payload_len())
    };

    let enc: Vec<u8> = match descr.encoding {
        NibbleEncoding::SixAndTwo => gcr::encode_62(data, descr.data_checksum_seed).to_vec(),
        NibbleEncoding::FiveAndThree => gcr::encode_53(data, descr.data_checksum_seed).to_vec(),
    };
    debug_assert_eq!(enc.len(), payload_len);

    let len = raw.len();
    for (i, &b) in enc.iter().enumerate() {
        raw[(data_pos + i) % len] = b;
    }
    Ok(())
}

/// Low-level format one track: gap bytes, address fields and zeroed data
/// fields for every sector, laid down in physical order.
pub(crate) fn format_track(
    buf: &mut [u8],
    track: usize,
    volume: u8,
    descr: &NibbleDescr,
) -> Result<(), DiskImageError> {
    let body = 3 + 8 + 3 + 6 + 3 + descr.payload_len() + 3;
    let total = body * descr.num_sectors;
    if total >= buf.len() {
        return Err(DiskImageError::BadRawData);
    }
    let slack = buf.len() - total;
    let gap3 = (slack / (descr.num_sectors + 1)).min(40);
    let gap1 = slack - gap3 * descr.num_sectors;

    buf.fill(0xff);
    let zero = [0u8; SECTOR_SIZE];
    let mut pos = gap1;

    for sector in 0..descr.num_sectors {
        let raw_sector = if descr.special == NibbleSpecial::Muse {
            (sector * 2) as u8
        } else {
            sector as u8
        };

        let prolog = descr.addr_prolog_for_track(track);
        buf[pos..pos + 3].copy_from_slice(&prolog);
        pos += 3;
        for value in [
            volume,
            track as u8,
            raw_sector,
            descr.addr_checksum_seed ^ volume ^ track as u8 ^ raw_sector,
        ] {
            let pair = gcr::encode_44(value);
            buf[pos..pos + 2].copy_from_slice(&pair);
            pos += 2;
        }
        buf[pos..pos + 3].copy_from_slice(&descr.addr_epilog);
        pos += 3;

        pos += 6; // gap2

        buf[pos..pos + 3].copy_from_slice(&descr.data_prolog);
        pos += 3;
        match descr.encoding {
            NibbleEncoding::SixAndTwo => {
                let enc = gcr::encode_62(&zero, descr.data_checksum_seed);
                buf[pos..pos + enc.len()].copy_from_slice(&enc);
                pos += enc.len();
            }
            NibbleEncoding::FiveAndThree => {
                let enc = gcr::encode_53(&zero, descr.data_checksum_seed);
                buf[pos..pos + enc.len()].copy_from_slice(&enc);
                pos += enc.len();
            }
        }
        buf[pos..pos + 3].copy_from_slice(&descr.data_epilog);
        pos += 3;

        pos += gap3;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NIB_TRACK_LEN_6656;

    #[test]
    fn formatted_track_reads_back_zeroed() {
        let descr = NibbleDescr::standard(StdNibbleDescr::Dos33Std);
        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 17, 254, descr).unwrap();

        let stats = analyze_track(&buf, 17, descr).unwrap();
        assert_eq!(stats.sectors_found, 16);
        assert_eq!(stats.volume, 254);

        for sector in 0..16 {
            let data = read_sector(&buf, 17, sector, descr).unwrap();
            assert!(data.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn sector_write_survives_decode() {
        let descr = NibbleDescr::standard(StdNibbleDescr::Dos33Std);
        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 0, 254, descr).unwrap();

        let mut payload = [0u8; SECTOR_SIZE];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        write_sector(&mut buf, 0, 5, descr, &payload).unwrap();

        assert_eq!(read_sector(&buf, 0, 5, descr).unwrap(), payload);
        // neighbors untouched
        assert!(read_sector(&buf, 0, 4, descr).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn thirteen_sector_track_roundtrip() {
        let descr = NibbleDescr::standard(StdNibbleDescr::Dos32Std);
        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 3, 100, descr).unwrap();

        let stats = analyze_track(&buf, 3, descr).unwrap();
        assert_eq!(stats.sectors_found, 13);

        let payload = [0xa5u8; SECTOR_SIZE];
        write_sector(&mut buf, 3, 12, descr, &payload).unwrap();
        assert_eq!(read_sector(&buf, 3, 12, descr).unwrap(), payload);
    }

    #[test]
    fn muse_doubled_sectors_halve_the_count() {
        let descr = NibbleDescr::standard(StdNibbleDescr::Muse32);
        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 1, 1, descr).unwrap();
        let stats = analyze_track(&buf, 1, descr).unwrap();
        assert_eq!(stats.sectors_found, 13);
    }

    #[test]
    fn rdos33_prolog_switches_by_track() {
        let descr = NibbleDescr::standard(StdNibbleDescr::Rdos33);
        assert_eq!(descr.addr_prolog_for_track(1)[0], 0xd4);
        assert_eq!(descr.addr_prolog_for_track(2)[0], 0xd5);

        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 2, 0, descr).unwrap();
        assert_eq!(analyze_track(&buf, 2, descr).unwrap().sectors_found, 16);
        // scanning the even track with the odd-track prolog finds nothing
        let mut odd = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut odd, 3, 0, descr).unwrap();
        assert_eq!(analyze_track(&odd, 3, descr).unwrap().sectors_found, 16);
        assert_ne!(buf, odd);
    }

    #[test]
    fn wrong_profile_finds_no_sectors() {
        let dos33 = NibbleDescr::standard(StdNibbleDescr::Dos33Std);
        let dos32 = NibbleDescr::standard(StdNibbleDescr::Dos32Std);
        let mut buf = vec![0u8; NIB_TRACK_LEN_6656];
        format_track(&mut buf, 0, 254, dos33).unwrap();
        assert_eq!(analyze_track(&buf, 0, dos32).unwrap().sectors_found, 0);
    }
}
