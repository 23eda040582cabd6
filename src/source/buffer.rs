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

    src/source/buffer.rs
*/

use crate::DiskImageError;

/// An in-memory byte source. Outer wrappers decompress into a growable
/// buffer; image creation pre-sizes one.
pub struct BufferSource {
    buf: Vec<u8>,
    growable: bool,
}

impl BufferSource {
    pub fn new(size: usize, growable: bool) -> BufferSource {
        BufferSource {
            buf: vec![0u8; size],
            growable,
        }
    }

    pub fn with_data(buf: Vec<u8>, growable: bool) -> BufferSource {
        BufferSource { buf, growable }
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DiskImageError> {
        let end = offset as usize + buf.len();
        if end > self.buf.len() {
            return Err(DiskImageError::Eof);
        }
        buf.copy_from_slice(&self.buf[offset as usize..end]);
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        let end = offset as usize + buf.len();
        if end > self.buf.len() {
            if !self.growable {
                return Err(DiskImageError::Eof);
            }
            self.buf.resize(end, 0);
        }
        self.buf[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn set_len(&mut self, len: u64) -> Result<(), DiskImageError> {
        if !self.growable && len as usize > self.buf.len() {
            return Err(DiskImageError::Eof);
        }
        self.buf.resize(len as usize, 0);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}
