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

    src/source/mod.rs

    The ByteSource layer: uniform random access over a file, an in-memory
    buffer, a window into another source, or a raw device. Sources are
    held through shared handles so that an image wrapper's payload window
    and a sub-volume's window can both address the same backing store.
*/

mod buffer;
mod device;
mod file;
mod window;

pub use buffer::BufferSource;
pub use device::{set_allow_write_boot_volume, DeviceSource};
pub use file::FileSource;
pub use window::WindowSource;

use std::{cell::RefCell, rc::Rc};

use crate::DiskImageError;

/// A shared, interior-mutable handle to a [Source]. Cloning the handle
/// aliases the same backing store.
pub type SourceHandle = Rc<RefCell<Source>>;

/// One byte source. A tagged enum with static dispatch; no trait objects
/// and no per-source heap indirection beyond the shared handle itself.
pub enum Source {
    File(FileSource),
    Buffer(BufferSource),
    Window(WindowSource),
    Device(DeviceSource),
}

impl Source {
    pub fn into_handle(self) -> SourceHandle {
        Rc::new(RefCell::new(self))
    }

    /// Read exactly `buf.len()` bytes at `offset`. Reads past the end of
    /// the source fail with [DiskImageError::Eof].
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DiskImageError> {
        match self {
            Source::File(src) => src.read_at(offset, buf),
            Source::Buffer(src) => src.read_at(offset, buf),
            Source::Window(src) => src.read_at(offset, buf),
            Source::Device(src) => src.read_at(offset, buf),
        }
    }

    /// Write all of `buf` at `offset`. Only a growable buffer may extend
    /// past the current end.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        match self {
            Source::File(src) => src.write_at(offset, buf),
            Source::Buffer(src) => src.write_at(offset, buf),
            Source::Window(src) => src.write_at(offset, buf),
            Source::Device(src) => src.write_at(offset, buf),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Source::File(src) => src.len(),
            Source::Buffer(src) => src.len(),
            Source::Window(src) => src.len(),
            Source::Device(src) => src.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncate or extend the source. Supported for files and growable
    /// buffers; a window's extent is fixed.
    pub fn set_len(&mut self, len: u64) -> Result<(), DiskImageError> {
        match self {
            Source::File(src) => src.set_len(len),
            Source::Buffer(src) => src.set_len(len),
            Source::Window(_) => Err(DiskImageError::UnsupportedAccess),
            Source::Device(_) => Err(DiskImageError::UnsupportedAccess),
        }
    }

    pub fn flush(&mut self) -> Result<(), DiskImageError> {
        match self {
            Source::File(src) => src.flush(),
            Source::Buffer(_) => Ok(()),
            Source::Window(src) => src.flush(),
            Source::Device(src) => src.flush(),
        }
    }
}

/// Read the entire contents of a handle into a vector.
pub fn read_all(handle: &SourceHandle) -> Result<Vec<u8>, DiskImageError> {
    let mut src = handle.borrow_mut();
    let len = src.len() as usize;
    let mut buf = vec![0u8; len];
    src.read_at(0, &mut buf)?;
    Ok(buf)
}

/// A positional cursor adapter so that `std::io` consumers (binrw, the
/// compressors) can stream over a [SourceHandle].
pub struct HandleCursor {
    handle: SourceHandle,
    pos: u64,
}

impl HandleCursor {
    pub fn new(handle: SourceHandle) -> HandleCursor {
        HandleCursor { handle, pos: 0 }
    }
}

impl std::io::Read for HandleCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = self.handle.borrow().len();
        if self.pos >= len {
            return Ok(0);
        }
        let avail = (len - self.pos) as usize;
        let n = avail.min(buf.len());
        self.handle
            .borrow_mut()
            .read_at(self.pos, &mut buf[..n])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl std::io::Write for HandleCursor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.handle
            .borrow_mut()
            .write_at(self.pos, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.handle
            .borrow_mut()
            .flush()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl std::io::Seek for HandleCursor {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        use std::io::SeekFrom;
        let len = self.handle.borrow().len();
        let new = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = new as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_roundtrip_through_handle() {
        let handle = Source::Buffer(BufferSource::with_data(vec![0u8; 64], false)).into_handle();
        handle.borrow_mut().write_at(10, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        handle.borrow_mut().read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn window_is_bounded_and_offset() {
        let parent = Source::Buffer(BufferSource::with_data((0..=255).collect(), false)).into_handle();
        let window = WindowSource::new(parent.clone(), 16, 32).unwrap();
        let handle = Source::Window(window).into_handle();

        let mut buf = [0u8; 4];
        handle.borrow_mut().read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [16, 17, 18, 19]);

        // reads past the window extent fail even though the parent has data
        let mut big = [0u8; 4];
        assert!(matches!(
            handle.borrow_mut().read_at(30, &mut big),
            Err(DiskImageError::Eof)
        ));

        // writes land in the parent
        handle.borrow_mut().write_at(0, &[0xAA]).unwrap();
        let mut check = [0u8; 1];
        parent.borrow_mut().read_at(16, &mut check).unwrap();
        assert_eq!(check[0], 0xAA);
    }

    #[test]
    fn cursor_adapter_tracks_position() {
        use std::io::{Read, Seek, SeekFrom};
        let handle = Source::Buffer(BufferSource::with_data(vec![9u8; 8], false)).into_handle();
        let mut cursor = HandleCursor::new(handle);
        cursor.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 8];
        let n = cursor.read(&mut buf).unwrap();
        assert_eq!(n, 4);
    }
}
