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

    src/source/device.rs

    Raw volume access. Write access to block devices is forbidden by
    default and must be enabled process-wide by the application; there is
    no per-call override. This is the one piece of mutable global state
    in the library.
*/

use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{source::FileSource, DiskImageError};

static ALLOW_WRITE_BOOT_VOLUME: AtomicBool = AtomicBool::new(false);

/// Allow (or re-forbid) write access to raw devices, including the host
/// boot volume. Defaults to forbidden.
pub fn set_allow_write_boot_volume(allow: bool) {
    ALLOW_WRITE_BOOT_VOLUME.store(allow, Ordering::Relaxed);
}

/// A byte source over a raw OS volume or physical device node.
pub struct DeviceSource {
    inner: FileSource,
}

impl DeviceSource {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<DeviceSource, DiskImageError> {
        if !read_only && !ALLOW_WRITE_BOOT_VOLUME.load(Ordering::Relaxed) {
            log::warn!(
                "DeviceSource::open(): write access to {} forbidden by policy",
                path.as_ref().display()
            );
            return Err(DiskImageError::AccessDenied);
        }

        let inner = FileSource::open(path, read_only).map_err(|e| match e {
            DiskImageError::FileNotFound => DiskImageError::DeviceNotReady,
            other => other,
        })?;

        Ok(DeviceSource { inner })
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DiskImageError> {
        self.inner.read_at(offset, buf)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        if !ALLOW_WRITE_BOOT_VOLUME.load(Ordering::Relaxed) {
            return Err(DiskImageError::AccessDenied);
        }
        self.inner.write_at(offset, buf)
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn flush(&mut self) -> Result<(), DiskImageError> {
        self.inner.flush()
    }
}
