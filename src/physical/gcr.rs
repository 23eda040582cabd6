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

    src/physical/gcr.rs

    Group-Coded Recording primitives for the Disk II: the 6-and-2 and
    5-and-3 disk byte alphabets, 4-and-4 address encoding, and the
    rolling-XOR payload codecs. Everything here operates on plain byte
    buffers; self-sync gap bytes appear as 0xFF in the decoded stream.
*/

use crate::DiskImageError;

/// Disk bytes making up a 6-and-2 encoded sector payload, including the
/// trailing checksum byte.
pub const ENC62_LEN: usize = 343;
/// Disk bytes making up a 5-and-3 encoded sector payload, including the
/// trailing checksum byte.
pub const ENC53_LEN: usize = 411;

const TWOS_LEN: usize = 86; // 0x56
const THREES_LEN: usize = 154; // 0x9A

/// The standard 6-and-2 disk byte alphabet: 64 values from 0x96 to 0xFF.
/// Valid disk bytes have the high bit set and no more than one pair of
/// consecutive zero bits.
#[rustfmt::skip]
pub const DISK_BYTES_62: [u8; 64] = [
    0x96, 0x97, 0x9a, 0x9b, 0x9d, 0x9e, 0x9f, 0xa6,
    0xa7, 0xab, 0xac, 0xad, 0xae, 0xaf, 0xb2, 0xb3,
    0xb4, 0xb5, 0xb6, 0xb7, 0xb9, 0xba, 0xbb, 0xbc,
    0xbd, 0xbe, 0xbf, 0xcb, 0xcd, 0xce, 0xcf, 0xd3,
    0xd6, 0xd7, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde,
    0xdf, 0xe5, 0xe6, 0xe7, 0xe9, 0xea, 0xeb, 0xec,
    0xed, 0xee, 0xef, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6,
    0xf7, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe, 0xff,
];

/// The 5-and-3 disk byte alphabet used by 13-sector disks: 32 values.
#[rustfmt::skip]
pub const DISK_BYTES_53: [u8; 32] = [
    0xab, 0xad, 0xae, 0xaf, 0xb5, 0xb6, 0xb7, 0xba,
    0xbb, 0xbd, 0xbe, 0xbf, 0xd6, 0xd7, 0xda, 0xdb,
    0xdd, 0xde, 0xdf, 0xea, 0xeb, 0xed, 0xee, 0xef,
    0xf5, 0xf6, 0xf7, 0xfa, 0xfb, 0xfd, 0xfe, 0xff,
];

const INVALID: u8 = 0xff;

/// Inverse tables, built once and immutable thereafter.
static DECODE_62: [u8; 256] = build_decode_table(&DISK_BYTES_62);
static DECODE_53: [u8; 256] = build_decode_table(&DISK_BYTES_53);

const fn build_decode_table<const N: usize>(enc: &[u8; N]) -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < N {
        table[enc[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Encode one byte as a 4-and-4 pair: each output byte carries four data
/// bits interleaved with ones.
#[inline]
pub fn encode_44(value: u8) -> [u8; 2] {
    [0xaa | (value >> 1), 0xaa | value]
}

/// Decode a 4-and-4 pair.
#[inline]
pub fn decode_44(pair: [u8; 2]) -> u8 {
    ((pair[0] << 1) | 0x01) & pair[1]
}

// The low two bits of each payload byte are stored with their bit order
// swapped inside the two-bit groups.
#[inline]
const fn swap2(value: u8) -> u8 {
    ((value & 0x01) << 1) | ((value & 0x02) >> 1)
}

/// Encode a 256-byte sector payload as 342 disk bytes plus a checksum
/// byte, XOR-chained from `seed`.
pub fn encode_62(data: &[u8; 256], seed: u8) -> [u8; ENC62_LEN] {
    // Only the low six bits of the seed participate in the chain.
    let seed = seed & 0x3f;
    // Pack the low two bits of each byte into the 86-entry interlock
    // buffer: entry i holds the pairs of bytes i, i+86 and i+172.
    let mut twos = [0u8; TWOS_LEN];
    for (i, two) in twos.iter_mut().enumerate() {
        let mut val = swap2(data[i] & 0x03);
        if i + TWOS_LEN < 256 {
            val |= swap2(data[i + TWOS_LEN] & 0x03) << 2;
        }
        if i + TWOS_LEN * 2 < 256 {
            val |= swap2(data[i + TWOS_LEN * 2] & 0x03) << 4;
        }
        *two = val;
    }

    let mut out = [0u8; ENC62_LEN];
    let mut chain = seed;
    let mut pos = 0;

    // Two-bit groups are written in descending order, then the six-bit
    // groups ascending; each value is XORed with its predecessor.
    for i in (0..TWOS_LEN).rev() {
        out[pos] = DISK_BYTES_62[(twos[i] ^ chain) as usize];
        chain = twos[i];
        pos += 1;
    }
    for &byte in data.iter() {
        let six = byte >> 2;
        out[pos] = DISK_BYTES_62[(six ^ chain) as usize];
        chain = six;
        pos += 1;
    }
    out[pos] = DISK_BYTES_62[chain as usize];
    out
}

/// Decode 343 disk bytes back into a 256-byte sector payload. The
/// running XOR must close against the trailing checksum byte when
/// `verify_checksum` is set.
pub fn decode_62(
    enc: &[u8],
    seed: u8,
    verify_checksum: bool,
) -> Result<[u8; 256], DiskImageError> {
    if enc.len() < ENC62_LEN {
        return Err(DiskImageError::SectorUnreadable);
    }

    let mut twos = [0u8; TWOS_LEN];
    let mut sixes = [0u8; 256];
    let mut chain = seed & 0x3f;

    for i in (0..TWOS_LEN).rev() {
        let val = DECODE_62[enc[TWOS_LEN - 1 - i] as usize];
        if val == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        chain ^= val;
        twos[i] = chain;
    }
    for (i, six) in sixes.iter_mut().enumerate() {
        let val = DECODE_62[enc[TWOS_LEN + i] as usize];
        if val == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        chain ^= val;
        *six = chain;
    }

    if verify_checksum {
        let check = DECODE_62[enc[ENC62_LEN - 1] as usize];
        if check == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        if check != chain {
            return Err(DiskImageError::BadChecksum);
        }
    }

    let mut data = [0u8; 256];
    for (i, byte) in data.iter_mut().enumerate() {
        let pair = swap2((twos[i % TWOS_LEN] >> (2 * (i / TWOS_LEN))) & 0x03);
        *byte = (sixes[i] << 2) | pair;
    }
    Ok(data)
}

/// Encode a 256-byte sector payload as 410 disk bytes plus a checksum
/// byte using the 5-and-3 alphabet. The low three bits of each payload
/// byte are packed five-to-a-nibble into the 154-entry group buffer.
pub fn encode_53(data: &[u8; 256], seed: u8) -> [u8; ENC53_LEN] {
    let seed = seed & 0x1f;
    // Pack the 768 low-order bits into 154 five-bit groups.
    let mut threes = [0u8; THREES_LEN];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut ti = 0;
    for &byte in data.iter() {
        acc = (acc << 3) | (byte & 0x07) as u32;
        bits += 3;
        while bits >= 5 {
            threes[ti] = ((acc >> (bits - 5)) & 0x1f) as u8;
            bits -= 5;
            ti += 1;
        }
    }
    if bits > 0 {
        threes[ti] = ((acc << (5 - bits)) & 0x1f) as u8;
    }

    let mut out = [0u8; ENC53_LEN];
    let mut chain = seed;
    let mut pos = 0;

    for i in (0..THREES_LEN).rev() {
        out[pos] = DISK_BYTES_53[(threes[i] ^ chain) as usize];
        chain = threes[i];
        pos += 1;
    }
    for &byte in data.iter() {
        let five = byte >> 3;
        out[pos] = DISK_BYTES_53[(five ^ chain) as usize];
        chain = five;
        pos += 1;
    }
    out[pos] = DISK_BYTES_53[chain as usize];
    out
}

/// Decode 411 disk bytes back into a 256-byte sector payload.
pub fn decode_53(
    enc: &[u8],
    seed: u8,
    verify_checksum: bool,
) -> Result<[u8; 256], DiskImageError> {
    if enc.len() < ENC53_LEN {
        return Err(DiskImageError::SectorUnreadable);
    }

    let mut threes = [0u8; THREES_LEN];
    let mut fives = [0u8; 256];
    let mut chain = seed & 0x1f;

    for i in (0..THREES_LEN).rev() {
        let val = DECODE_53[enc[THREES_LEN - 1 - i] as usize];
        if val == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        chain ^= val;
        threes[i] = chain;
    }
    for (i, five) in fives.iter_mut().enumerate() {
        let val = DECODE_53[enc[THREES_LEN + i] as usize];
        if val == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        chain ^= val;
        *five = chain;
    }

    if verify_checksum {
        let check = DECODE_53[enc[ENC53_LEN - 1] as usize];
        if check == INVALID {
            return Err(DiskImageError::InvalidDiskByte);
        }
        if check != chain {
            return Err(DiskImageError::BadChecksum);
        }
    }

    // Unpack the five-bit groups back into the 768-bit stream.
    let mut data = [0u8; 256];
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut ti = 0;
    for (i, byte) in data.iter_mut().enumerate() {
        while bits < 3 {
            acc = (acc << 5) | threes[ti] as u32;
            bits += 5;
            ti += 1;
        }
        let low = ((acc >> (bits - 3)) & 0x07) as u8;
        bits -= 3;
        *byte = (fives[i] << 3) | low;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tables_invert_alphabets() {
        for (i, &b) in DISK_BYTES_62.iter().enumerate() {
            assert_eq!(DECODE_62[b as usize] as usize, i);
        }
        for (i, &b) in DISK_BYTES_53.iter().enumerate() {
            assert_eq!(DECODE_53[b as usize] as usize, i);
        }
        // 0xD5 and 0xAA never appear as data; they are reserved for marks
        assert_eq!(DECODE_62[0xd5], INVALID);
        assert_eq!(DECODE_62[0xaa], INVALID);
        assert_eq!(DECODE_53[0xd5], INVALID);
    }

    #[test]
    fn four_and_four_roundtrip() {
        for value in 0..=255u8 {
            let pair = encode_44(value);
            assert_eq!(decode_44(pair), value);
            // both halves carry the interleaved one bits
            assert_eq!(pair[0] & 0xaa, 0xaa);
            assert_eq!(pair[1] & 0xaa, 0xaa);
        }
    }

    #[test]
    fn six_and_two_roundtrip() {
        let mut data = [0u8; 256];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(7);
        }
        let enc = encode_62(&data, 0x00);
        assert!(enc.iter().all(|b| DECODE_62[*b as usize] != INVALID));
        let dec = decode_62(&enc, 0x00, true).unwrap();
        assert_eq!(dec[..], data[..]);
    }

    #[test]
    fn six_and_two_detects_corruption() {
        let data = [0x5au8; 256];
        let mut enc = encode_62(&data, 0x00);
        enc[100] = DISK_BYTES_62[(DECODE_62[enc[100] as usize] ^ 0x01) as usize];
        assert!(matches!(
            decode_62(&enc, 0x00, true),
            Err(DiskImageError::BadChecksum)
        ));
        enc[100] = 0x00; // not a valid disk byte at all
        assert!(matches!(
            decode_62(&enc, 0x00, true),
            Err(DiskImageError::InvalidDiskByte)
        ));
    }

    #[test]
    fn six_and_two_seed_participates() {
        let data = [0u8; 256];
        let enc_a = encode_62(&data, 0x00);
        let enc_b = encode_62(&data, 0xd5 & 0x3f);
        assert_ne!(enc_a[0], enc_b[0]);
        assert!(decode_62(&enc_b, 0xd5 & 0x3f, true).is_ok());
        assert!(decode_62(&enc_b, 0x00, true).is_err());
    }

    #[test]
    fn five_and_three_roundtrip() {
        let mut data = [0u8; 256];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(13).wrapping_add(3);
        }
        let enc = encode_53(&data, 0x00);
        assert!(enc.iter().all(|b| DECODE_53[*b as usize] != INVALID));
        let dec = decode_53(&enc, 0x00, true).unwrap();
        assert_eq!(dec[..], data[..]);
    }
}
