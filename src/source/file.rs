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

    src/source/file.rs
*/

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::DiskImageError;

/// A byte source backed by an OS file handle.
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
    read_only: bool,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<FileSource, DiskImageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(FileSource {
            file,
            path: path.as_ref().to_path_buf(),
            len,
            read_only,
        })
    }

    /// Create a new file exclusively; fails with [DiskImageError::FileExists]
    /// if the path already exists.
    pub fn create_new<P: AsRef<Path>>(path: P) -> Result<FileSource, DiskImageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        Ok(FileSource {
            file,
            path: path.as_ref().to_path_buf(),
            len: 0,
            read_only: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DiskImageError> {
        if offset + buf.len() as u64 > self.len {
            return Err(DiskImageError::Eof);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(buf)
            .map_err(|_| DiskImageError::ReadFailed)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .write_all(buf)
            .map_err(|_| DiskImageError::WriteFailed)?;
        self.len = self.len.max(offset + buf.len() as u64);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn set_len(&mut self, len: u64) -> Result<(), DiskImageError> {
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), DiskImageError> {
        self.file.flush().map_err(|_| DiskImageError::WriteFailed)
    }
}
