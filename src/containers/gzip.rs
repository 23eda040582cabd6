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

    src/containers/gzip.rs

    Gzip outer wrapper. A truncated or CRC-damaged member is still loaded
    if any data could be recovered; the wrapper reports itself damaged so
    the image opens read-only.
*/

use std::io::Read;

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{
    containers::{OuterTestResult, MAX_WRAPPED_SIZE},
    source::{read_all, HandleCursor, SourceHandle},
    DiskImageError,
};

// Only deflate-method gzip members are recognized.
const GZIP_SIGNATURE: [u8; 3] = [0x1F, 0x8B, 0x08];

pub struct OuterGzip {
    damaged: bool,
    inner_name: Option<String>,
}

impl OuterGzip {
    pub fn new() -> OuterGzip {
        OuterGzip {
            damaged: false,
            inner_name: None,
        }
    }

    pub fn test(src: &SourceHandle) -> OuterTestResult {
        let mut magic = [0u8; 3];
        if src.borrow_mut().read_at(0, &mut magic).is_err() {
            return OuterTestResult::NotRecognized;
        }
        if magic == GZIP_SIGNATURE {
            OuterTestResult::Match
        } else {
            OuterTestResult::NotRecognized
        }
    }

    pub fn load(&mut self, src: &SourceHandle) -> Result<Vec<u8>, DiskImageError> {
        let compressed = read_all(src)?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        self.inner_name = decoder
            .header()
            .and_then(|h| h.filename())
            .and_then(|name| String::from_utf8(name.to_vec()).ok());

        let mut payload = Vec::new();
        match decoder
            .take(MAX_WRAPPED_SIZE + 1)
            .read_to_end(&mut payload)
        {
            Ok(_) => {}
            Err(e) => {
                // Salvage whatever decompressed cleanly; the caller will
                // mark the image read-only.
                log::warn!("OuterGzip::load(): damaged gzip stream: {}", e);
                if payload.is_empty() {
                    return Err(DiskImageError::BadCompressedData);
                }
                self.damaged = true;
            }
        }

        if payload.len() as u64 > MAX_WRAPPED_SIZE {
            return Err(DiskImageError::TooBig);
        }

        log::debug!(
            "OuterGzip::load(): {} compressed -> {} bytes, inner name {:?}",
            compressed.len(),
            payload.len(),
            self.inner_name
        );
        Ok(payload)
    }

    pub fn save(
        &mut self,
        dst: &SourceHandle,
        payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<(), DiskImageError> {
        use std::io::Write;

        let mut buf = vec![0u8; payload_len as usize];
        payload.borrow_mut().read_at(0, &mut buf)?;

        dst.borrow_mut().set_len(0)?;
        let mut encoder = GzEncoder::new(HandleCursor::new(dst.clone()), Compression::default());
        encoder
            .write_all(&buf)
            .map_err(|_| DiskImageError::WriteFailed)?;
        encoder.finish().map_err(|_| DiskImageError::WriteFailed)?;

        log::debug!("OuterGzip::save(): recompressed {} bytes", payload_len);
        Ok(())
    }

    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    pub fn inner_name(&self) -> Option<&str> {
        self.inner_name.as_deref()
    }
}

impl Default for OuterGzip {
    fn default() -> Self {
        OuterGzip::new()
    }
}
