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

    src/source/window.rs
*/

use crate::{
    source::{Source, SourceHandle},
    DiskImageError,
};

/// A fixed offset/length view over another source. Used to expose the
/// payload after an image header, and to expose sub-volume ranges to
/// filesystem drivers. Writes pass through to the parent; dropping a
/// window leaves the parent open.
pub struct WindowSource {
    parent: SourceHandle,
    base: u64,
    len: u64,
}

impl WindowSource {
    pub fn new(parent: SourceHandle, base: u64, len: u64) -> Result<WindowSource, DiskImageError> {
        let parent_len = parent.borrow().len();
        if base + len > parent_len {
            return Err(DiskImageError::InvalidArg);
        }
        Ok(WindowSource { parent, base, len })
    }

    pub fn into_handle(self) -> SourceHandle {
        Source::Window(self).into_handle()
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DiskImageError> {
        if offset + buf.len() as u64 > self.len {
            return Err(DiskImageError::Eof);
        }
        self.parent.borrow_mut().read_at(self.base + offset, buf)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        if offset + buf.len() as u64 > self.len {
            return Err(DiskImageError::Eof);
        }
        self.parent.borrow_mut().write_at(self.base + offset, buf)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn flush(&mut self) -> Result<(), DiskImageError> {
        self.parent.borrow_mut().flush()
    }
}
