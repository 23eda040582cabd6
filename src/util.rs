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

    src/util.rs
*/

use crate::io::{ReadSeek, SeekFrom};

/// Return the total length of a seekable stream, restoring the cursor.
pub(crate) fn get_length<RS: ReadSeek>(image: &mut RS) -> std::io::Result<u64> {
    let pos = image.stream_position()?;
    let len = image.seek(SeekFrom::End(0))?;
    image.seek(SeekFrom::Start(pos))?;
    Ok(len)
}

/// Extract the lowercase extension from a path-like string, if any.
pub(crate) fn find_extension(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// High-ASCII conversion table for Macintosh text, from Apple technote
/// PT515. Bytes 0x80-0xFF map to a plain-ASCII approximation.
#[rustfmt::skip]
pub(crate) const MAC_HIGH_ASCII: &[u8; 128] =
    b"AACENOUaaaaaaceeeeiiiinooooouuuu\
      tocL$oPBrct'.=AO%+<>YudsPpSaoOao\
      ?!-vf=d<>. AAOOo--\"\"''/oyY/o<> f\
      |*,,%AEAEEIIIIOOaOUUUi^~-,**,\"? ";

/// Render a Pascal-style or fixed-width name, converting Mac high ASCII
/// and dropping control characters.
pub(crate) fn clean_mac_name(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        let ch = if b >= 0x80 {
            MAC_HIGH_ASCII[(b - 0x80) as usize]
        } else {
            b
        };
        if ch >= 0x20 && ch < 0x7f {
            out.push(ch as char);
        }
    }
    out
}

/// Strip the high bit from a DOS 3.x catalog name byte and map control
/// characters to spaces.
pub(crate) fn low_ascii(b: u8) -> char {
    let c = b & 0x7f;
    if (0x20..0x7f).contains(&c) {
        c as char
    } else {
        ' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(find_extension("DISK.PO").as_deref(), Some("po"));
        assert_eq!(find_extension("a/b/c.woz.gz").as_deref(), Some("gz"));
        assert_eq!(find_extension("noext"), None);
    }

    #[test]
    fn high_ascii_is_flattened() {
        assert_eq!(clean_mac_name(b"Disk\x80Name"), "DiskAName");
        assert_eq!(clean_mac_name(&[0x01, b'A']), "A");
    }
}
