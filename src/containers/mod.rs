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

    src/containers/mod.rs

    Outer wrappers: the optional, outermost compression layer around an
    image file. Web archives tend to gzip everything in sight whether it
    needs it or not, so gzip is treated as a wrapper that may hold any
    other format. Both variants load the whole payload into a growable
    memory buffer and recompress it on save; neither supports fast flush.
*/

pub mod gzip;
pub mod zip;

use crate::{
    source::{BufferSource, Source, SourceHandle},
    types::enums::OuterFormat,
    DiskImageError,
};

/// Decompressed payloads larger than this are rejected rather than
/// expanded. Covers every plausible Apple II image with margin.
pub const MAX_WRAPPED_SIZE: u64 = 32 * 1024 * 1024;

/// Result of probing a source for an outer wrapper signature.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OuterTestResult {
    NotRecognized,
    Match,
    /// Signature matched but the compressed stream is damaged.
    Damaged,
}

/// An instantiated outer wrapper. Static enum dispatch; one lives on a
/// DiskImage for the life of the open.
pub enum OuterWrapper {
    Gzip(gzip::OuterGzip),
    Zip(zip::OuterZip),
}

impl OuterWrapper {
    pub fn format(&self) -> OuterFormat {
        match self {
            OuterWrapper::Gzip(_) => OuterFormat::Gzip,
            OuterWrapper::Zip(_) => OuterFormat::Zip,
        }
    }

    /// Decompress the wrapped payload out of `src` into a growable
    /// buffer source. Returns the payload handle and its length.
    pub fn load(&mut self, src: &SourceHandle) -> Result<(SourceHandle, u64), DiskImageError> {
        let payload = match self {
            OuterWrapper::Gzip(wrapper) => wrapper.load(src)?,
            OuterWrapper::Zip(wrapper) => wrapper.load(src)?,
        };
        let len = payload.len() as u64;
        let handle = Source::Buffer(BufferSource::with_data(payload, true)).into_handle();
        Ok((handle, len))
    }

    /// Recompress `payload_len` bytes of `payload` over `dst`.
    pub fn save(
        &mut self,
        dst: &SourceHandle,
        payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<(), DiskImageError> {
        match self {
            OuterWrapper::Gzip(wrapper) => wrapper.save(dst, payload, payload_len),
            OuterWrapper::Zip(wrapper) => wrapper.save(dst, payload, payload_len),
        }
    }

    /// True if the wrapper detected recoverable damage while loading
    /// (e.g. a trailing CRC mismatch). The image should be opened
    /// read-only with a note.
    pub fn is_damaged(&self) -> bool {
        match self {
            OuterWrapper::Gzip(wrapper) => wrapper.is_damaged(),
            OuterWrapper::Zip(_) => false,
        }
    }

    /// Neither compressed wrapper can flush cheaply.
    pub fn has_fast_flush(&self) -> bool {
        false
    }

    /// The filename recorded inside the wrapper, if any. Used to recover
    /// an extension hint for the inner format.
    pub fn inner_name(&self) -> Option<&str> {
        match self {
            OuterWrapper::Gzip(wrapper) => wrapper.inner_name(),
            OuterWrapper::Zip(wrapper) => wrapper.inner_name(),
        }
    }
}
