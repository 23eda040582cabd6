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

    src/containers/zip.rs

    Zip outer wrapper. Only archives holding exactly one file are disk
    image candidates; anything else is a file archive and is routed to
    the caller as such.
*/

use std::io::{Cursor, Read, Write};

use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

use crate::{
    containers::{OuterTestResult, MAX_WRAPPED_SIZE},
    source::{read_all, SourceHandle},
    DiskImageError,
};

pub struct OuterZip {
    inner_name: Option<String>,
}

impl OuterZip {
    pub fn new() -> OuterZip {
        OuterZip { inner_name: None }
    }

    pub fn test(src: &SourceHandle) -> OuterTestResult {
        let mut magic = [0u8; 4];
        if src.borrow_mut().read_at(0, &mut magic).is_err() {
            return OuterTestResult::NotRecognized;
        }
        if &magic != b"PK\x03\x04" {
            return OuterTestResult::NotRecognized;
        }
        // Signature present; make sure the central directory parses.
        match read_all(src).map(Cursor::new).map(ZipArchive::new) {
            Ok(Ok(_)) => OuterTestResult::Match,
            _ => OuterTestResult::Damaged,
        }
    }

    pub fn load(&mut self, src: &SourceHandle) -> Result<Vec<u8>, DiskImageError> {
        let raw = read_all(src)?;
        let mut archive =
            ZipArchive::new(Cursor::new(raw)).map_err(|_| DiskImageError::BadArchiveStruct)?;

        if archive.is_empty() {
            return Err(DiskImageError::BadArchiveStruct);
        }
        if archive.len() > 1 {
            log::debug!(
                "OuterZip::load(): archive holds {} files; not a disk image wrapper",
                archive.len()
            );
            return Err(DiskImageError::FileArchive);
        }

        let mut entry = archive
            .by_index(0)
            .map_err(|_| DiskImageError::BadArchiveStruct)?;

        // Don't zip-bomb ourselves.
        if entry.size() > MAX_WRAPPED_SIZE {
            return Err(DiskImageError::TooBig);
        }

        self.inner_name = entry.enclosed_name().map(|p| p.to_string_lossy().to_string());

        let mut payload = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut payload)
            .map_err(|_| DiskImageError::BadCompressedData)?;

        log::debug!(
            "OuterZip::load(): extracted {:?}, {} bytes",
            self.inner_name,
            payload.len()
        );
        Ok(payload)
    }

    pub fn save(
        &mut self,
        dst: &SourceHandle,
        payload: &SourceHandle,
        payload_len: u64,
    ) -> Result<(), DiskImageError> {
        let mut buf = vec![0u8; payload_len as usize];
        payload.borrow_mut().read_at(0, &mut buf)?;

        let name = self.inner_name.as_deref().unwrap_or("disk.img");

        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut out);
            writer
                .start_file(name, SimpleFileOptions::default())
                .map_err(|_| DiskImageError::WriteFailed)?;
            writer.write_all(&buf).map_err(|_| DiskImageError::WriteFailed)?;
            writer.finish().map_err(|_| DiskImageError::WriteFailed)?;
        }

        let bytes = out.into_inner();
        dst.borrow_mut().set_len(0)?;
        dst.borrow_mut().write_at(0, &bytes)?;
        dst.borrow_mut().set_len(bytes.len() as u64)?;

        log::debug!(
            "OuterZip::save(): rewrapped {} bytes as '{}' ({} compressed)",
            payload_len,
            name,
            bytes.len()
        );
        Ok(())
    }

    pub fn inner_name(&self) -> Option<&str> {
        self.inner_name.as_deref()
    }
}

impl Default for OuterZip {
    fn default() -> Self {
        OuterZip::new()
    }
}
