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

    src/wrappers/nufx.rs

    NuFX (ShrinkIt) archives holding a single disk image thread. An
    archive of ordinary files is reported as such so the caller can
    route it to an archive extractor instead. Uncompressed threads are
    read and written; LZW-compressed disk threads are refused rather
    than half-supported. Flush serializes the whole archive to a sibling
    temp file and renames it over the original.
*/

use std::collections::BTreeSet;

use crate::{
    source::{read_all, BufferSource, FileSource, Source, SourceHandle},
    types::enums::{PhysicalFormat, SectorOrder},
    wrappers::{PrepResult, WrapperTestResult},
    DiskImageError, BLOCK_SIZE,
};

const MASTER_ID: [u8; 6] = [0x4e, 0xf5, 0x46, 0xe9, 0x6c, 0xe5];
const RECORD_ID: [u8; 4] = [0x4e, 0xf5, 0x46, 0xd8];
const MASTER_HEADER_LEN: usize = 48;
const THREAD_HEADER_LEN: usize = 16;

const THREAD_CLASS_DATA: u16 = 2;
const THREAD_KIND_DATA_FORK: u16 = 0;
const THREAD_KIND_DISK_IMAGE: u16 = 1;
const THREAD_FORMAT_UNCOMPRESSED: u16 = 0;

/// CRC-16/XMODEM as used throughout the ShrinkIt format.
fn nufx_crc(data: &[u8], input_crc: u16) -> u16 {
    let mut crc = input_crc;
    for byte in data.iter() {
        crc ^= (*byte as u16) << 8;
        for _j in 0..8 {
            crc = (crc << 1) ^ if crc & 0x8000 != 0 { 0x1021 } else { 0 };
        }
    }
    crc
}

#[derive(Clone, Debug)]
struct ThreadHeader {
    class: u16,
    format: u16,
    kind: u16,
    crc: u16,
    thread_eof: u32,
    comp_thread_eof: u32,
}

impl ThreadHeader {
    fn parse(raw: &[u8]) -> ThreadHeader {
        ThreadHeader {
            class: u16::from_le_bytes([raw[0], raw[1]]),
            format: u16::from_le_bytes([raw[2], raw[3]]),
            kind: u16::from_le_bytes([raw[4], raw[5]]),
            crc: u16::from_le_bytes([raw[6], raw[7]]),
            thread_eof: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            comp_thread_eof: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    fn emit(&self) -> [u8; THREAD_HEADER_LEN] {
        let mut out = [0u8; THREAD_HEADER_LEN];
        out[0..2].copy_from_slice(&self.class.to_le_bytes());
        out[2..4].copy_from_slice(&self.format.to_le_bytes());
        out[4..6].copy_from_slice(&self.kind.to_le_bytes());
        out[6..8].copy_from_slice(&self.crc.to_le_bytes());
        out[8..12].copy_from_slice(&self.thread_eof.to_le_bytes());
        out[12..16].copy_from_slice(&self.comp_thread_eof.to_le_bytes());
        out
    }

    fn is_disk_image(&self) -> bool {
        self.class == THREAD_CLASS_DATA && self.kind == THREAD_KIND_DISK_IMAGE
    }

    fn is_file_data(&self) -> bool {
        self.class == THREAD_CLASS_DATA && self.kind == THREAD_KIND_DATA_FORK
    }
}

/// One parsed record: the attribute section is kept verbatim so that
/// metadata we don't interpret round-trips exactly.
struct Record {
    /// Bytes from attrib_count through the filename, exclusive of the
    /// record ID and header CRC.
    attrib_raw: Vec<u8>,
    threads: Vec<ThreadHeader>,
    /// Raw data for every thread except the disk image thread.
    thread_data: Vec<Vec<u8>>,
    disk_thread_idx: usize,
}

pub struct NuFx {
    master_raw: Vec<u8>,
    record: Option<Record>,
}

struct ParsedArchive {
    master_raw: Vec<u8>,
    total_records: u32,
    record: Option<Record>,
    disk_data: Vec<u8>,
    saw_file_data: bool,
}

fn parse_archive(raw: &[u8], verify_crc: bool) -> Result<ParsedArchive, DiskImageError> {
    if raw.len() < MASTER_HEADER_LEN || raw[0..6] != MASTER_ID {
        return Err(DiskImageError::UnrecognizedFileFmt);
    }

    let master_crc = u16::from_le_bytes([raw[6], raw[7]]);
    if verify_crc {
        let calc = nufx_crc(&raw[8..MASTER_HEADER_LEN], 0);
        if calc != master_crc {
            log::warn!(
                "NuFx::parse_archive(): master CRC mismatch (got {:04x} want {:04x})",
                calc,
                master_crc
            );
            return Err(DiskImageError::BadChecksum);
        }
    }
    let total_records = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);

    let mut parsed = ParsedArchive {
        master_raw: raw[0..MASTER_HEADER_LEN].to_vec(),
        total_records,
        record: None,
        disk_data: Vec::new(),
        saw_file_data: false,
    };
    if total_records != 1 {
        return Ok(parsed);
    }

    let rec_start = MASTER_HEADER_LEN;
    if raw.len() < rec_start + 6 || raw[rec_start..rec_start + 4] != RECORD_ID {
        return Err(DiskImageError::BadArchiveStruct);
    }
    let header_crc = u16::from_le_bytes([raw[rec_start + 4], raw[rec_start + 5]]);
    let attrib_count =
        u16::from_le_bytes([raw[rec_start + 6], raw[rec_start + 7]]) as usize;
    if attrib_count < 56 || rec_start + attrib_count + 2 > raw.len() {
        return Err(DiskImageError::BadArchiveStruct);
    }

    let total_threads = u32::from_le_bytes([
        raw[rec_start + 10],
        raw[rec_start + 11],
        raw[rec_start + 12],
        raw[rec_start + 13],
    ]) as usize;
    if total_threads == 0 || total_threads > 16 {
        return Err(DiskImageError::BadArchiveStruct);
    }

    // Attribute section runs from attrib_count through the filename.
    let filename_len = u16::from_le_bytes([
        raw[rec_start + attrib_count - 2],
        raw[rec_start + attrib_count - 1],
    ]) as usize;
    let attrib_end = rec_start + attrib_count + filename_len;
    let threads_end = attrib_end + total_threads * THREAD_HEADER_LEN;
    if threads_end > raw.len() {
        return Err(DiskImageError::BadArchiveStruct);
    }

    if verify_crc {
        let calc = nufx_crc(&raw[rec_start + 6..threads_end], 0);
        if calc != header_crc {
            log::warn!(
                "NuFx::parse_archive(): record CRC mismatch (got {:04x} want {:04x})",
                calc,
                header_crc
            );
            return Err(DiskImageError::BadChecksum);
        }
    }

    let mut threads = Vec::with_capacity(total_threads);
    for i in 0..total_threads {
        let at = attrib_end + i * THREAD_HEADER_LEN;
        threads.push(ThreadHeader::parse(&raw[at..at + THREAD_HEADER_LEN]));
    }

    // Thread data follows the headers, in thread order.
    let mut data_pos = threads_end;
    let mut thread_data = Vec::with_capacity(total_threads);
    let mut disk_thread_idx = None;
    for (i, thread) in threads.iter().enumerate() {
        let data_len = thread.comp_thread_eof as usize;
        if data_pos + data_len > raw.len() {
            return Err(DiskImageError::BadArchiveStruct);
        }
        let data = raw[data_pos..data_pos + data_len].to_vec();
        data_pos += data_len;

        if thread.is_disk_image() {
            if thread.format != THREAD_FORMAT_UNCOMPRESSED {
                log::debug!(
                    "NuFx::parse_archive(): disk thread uses compression {}",
                    thread.format
                );
                return Err(DiskImageError::UnsupportedCompression);
            }
            disk_thread_idx = Some(i);
            parsed.disk_data = data;
            thread_data.push(Vec::new());
        } else {
            if thread.is_file_data() {
                parsed.saw_file_data = true;
            }
            thread_data.push(data);
        }
    }

    if let Some(disk_thread_idx) = disk_thread_idx {
        parsed.record = Some(Record {
            attrib_raw: raw[rec_start + 6..attrib_end].to_vec(),
            threads,
            thread_data,
            disk_thread_idx,
        });
    }
    Ok(parsed)
}

pub fn test(src: &SourceHandle, len: u64) -> WrapperTestResult {
    if len < (MASTER_HEADER_LEN + 6) as u64 {
        return WrapperTestResult::None;
    }
    let raw = match read_all(src) {
        Ok(raw) => raw,
        Err(_) => return WrapperTestResult::None,
    };
    if raw[0..6] != MASTER_ID {
        return WrapperTestResult::None;
    }
    match parse_archive(&raw, true) {
        Ok(parsed) => {
            if parsed.total_records != 1 || parsed.record.is_none() {
                // NuFX for sure, but a file archive rather than a
                // wrapped disk image.
                WrapperTestResult::IsFileArchive
            } else {
                WrapperTestResult::Match
            }
        }
        Err(DiskImageError::BadChecksum) => WrapperTestResult::Corrupt,
        Err(DiskImageError::UnsupportedCompression) => WrapperTestResult::Corrupt,
        Err(_) => WrapperTestResult::None,
    }
}

impl NuFx {
    pub fn new() -> NuFx {
        NuFx {
            master_raw: Vec::new(),
            record: None,
        }
    }

    pub fn prep(
        &mut self,
        src: &SourceHandle,
        _len: u64,
        _read_only: bool,
    ) -> Result<PrepResult, DiskImageError> {
        let raw = read_all(src)?;
        let parsed = parse_archive(&raw, true)?;

        if parsed.total_records != 1 {
            return Err(DiskImageError::FileArchive);
        }
        let record = parsed.record.ok_or(DiskImageError::FileArchive)?;

        let thread = &record.threads[record.disk_thread_idx];
        let expected = thread.thread_eof as u64;
        let mut disk_data = parsed.disk_data;
        if (disk_data.len() as u64) < expected {
            return Err(DiskImageError::BadArchiveStruct);
        }
        disk_data.truncate(expected as usize);

        log::debug!(
            "NuFx::prep(): disk thread of {} bytes ({} blocks)",
            disk_data.len(),
            disk_data.len() / BLOCK_SIZE,
        );

        self.master_raw = parsed.master_raw;
        self.record = Some(record);

        let length = disk_data.len() as u64;
        Ok(PrepResult {
            payload: Source::Buffer(BufferSource::with_data(disk_data, false)).into_handle(),
            length,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::ProDos,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }

    /// Serialize the archive with the current payload, preserving the
    /// record's attribute section and non-disk threads.
    fn serialize(&mut self, payload: &[u8]) -> Result<Vec<u8>, DiskImageError> {
        let record = self.record.as_mut().ok_or(DiskImageError::NotReady)?;

        {
            let disk = &mut record.threads[record.disk_thread_idx];
            disk.format = THREAD_FORMAT_UNCOMPRESSED;
            disk.thread_eof = payload.len() as u32;
            disk.comp_thread_eof = payload.len() as u32;
            disk.crc = nufx_crc(payload, 0xffff);
        }

        // Record body: attributes, thread headers, thread data.
        let mut body = record.attrib_raw.clone();
        for thread in &record.threads {
            body.extend_from_slice(&thread.emit());
        }
        let header_crc = nufx_crc(&body, 0);

        let mut out = Vec::with_capacity(MASTER_HEADER_LEN + 6 + body.len() + payload.len());
        out.extend_from_slice(&self.master_raw);
        out.extend_from_slice(&RECORD_ID);
        out.extend_from_slice(&header_crc.to_le_bytes());
        out.extend_from_slice(&body);
        for (i, thread) in record.threads.iter().enumerate() {
            if i == record.disk_thread_idx {
                out.extend_from_slice(payload);
            } else {
                debug_assert_eq!(record.thread_data[i].len(), thread.comp_thread_eof as usize);
                out.extend_from_slice(&record.thread_data[i]);
            }
        }

        // Patch the master header: one record, fresh EOF and CRC.
        out[8..12].copy_from_slice(&1u32.to_le_bytes());
        let eof = out.len() as u32;
        out[44..48].copy_from_slice(&eof.to_le_bytes());
        let master_crc = nufx_crc(&out[8..MASTER_HEADER_LEN], 0);
        out[6..8].copy_from_slice(&master_crc.to_le_bytes());

        Ok(out)
    }

    pub fn flush(
        &mut self,
        src: &SourceHandle,
        payload: &SourceHandle,
        _payload_len: u64,
    ) -> Result<u64, DiskImageError> {
        let data = read_all(payload)?;
        let bytes = self.serialize(&data)?;

        // Rebuild through a sibling temp file when file-backed, so a
        // failed rewrite can't destroy the original archive.
        let path = match &*src.borrow() {
            Source::File(f) => Some(f.path().to_path_buf()),
            _ => None,
        };
        if let Some(path) = path {
            let mut tmp = path.clone();
            tmp.set_extension("nfxtmp");
            std::fs::write(&tmp, &bytes).map_err(|_| DiskImageError::WriteFailed)?;
            std::fs::rename(&tmp, &path).map_err(|_| DiskImageError::WriteFailed)?;
            *src.borrow_mut() = Source::File(FileSource::open(&path, false)?);
        } else {
            src.borrow_mut().set_len(0)?;
            src.borrow_mut().write_at(0, &bytes)?;
            src.borrow_mut().set_len(bytes.len() as u64)?;
        }

        log::debug!("NuFx::flush(): archive rebuilt, {} bytes", bytes.len());
        Ok(bytes.len() as u64)
    }

    /// Build a fresh single-record archive around a zeroed disk image.
    pub fn create(
        &mut self,
        src: &SourceHandle,
        payload_len: u64,
        storage_name: Option<&str>,
    ) -> Result<PrepResult, DiskImageError> {
        if payload_len % BLOCK_SIZE as u64 != 0 {
            return Err(DiskImageError::InvalidCreateReq);
        }
        let num_blocks = (payload_len / BLOCK_SIZE as u64) as u32;
        let filename = storage_name.unwrap_or("DISK").as_bytes().to_vec();

        // Attribute section: fixed attributes through filename_length,
        // then the filename. attrib_count spans the record ID through
        // the filename_length word.
        let attrib_count: u16 = 58;
        let mut attrib = Vec::new();
        attrib.extend_from_slice(&attrib_count.to_le_bytes());
        attrib.extend_from_slice(&3u16.to_le_bytes()); // version
        attrib.extend_from_slice(&1u32.to_le_bytes()); // total_threads
        attrib.extend_from_slice(&1u16.to_le_bytes()); // file_sys_id (ProDOS)
        attrib.extend_from_slice(&0x2fu16.to_le_bytes()); // fssep '/'
        attrib.extend_from_slice(&0xe3u32.to_le_bytes()); // access
        attrib.extend_from_slice(&0u32.to_le_bytes()); // file_type
        attrib.extend_from_slice(&num_blocks.to_le_bytes()); // extra_type
        attrib.extend_from_slice(&(BLOCK_SIZE as u16).to_le_bytes()); // storage_type
        attrib.extend_from_slice(&[0u8; 24]); // create/mod/archive when
        attrib.extend_from_slice(&(filename.len() as u16).to_le_bytes());
        debug_assert_eq!(attrib.len(), attrib_count as usize - 6);
        attrib.extend_from_slice(&filename);

        let mut master = vec![0u8; MASTER_HEADER_LEN];
        master[0..6].copy_from_slice(&MASTER_ID);
        master[40..42].copy_from_slice(&2u16.to_le_bytes()); // master_version

        self.master_raw = master;
        self.record = Some(Record {
            attrib_raw: attrib,
            threads: vec![ThreadHeader {
                class: THREAD_CLASS_DATA,
                format: THREAD_FORMAT_UNCOMPRESSED,
                kind: THREAD_KIND_DISK_IMAGE,
                crc: 0,
                thread_eof: 0,
                comp_thread_eof: 0,
            }],
            thread_data: vec![Vec::new()],
            disk_thread_idx: 0,
        });

        let zero = vec![0u8; payload_len as usize];
        let bytes = self.serialize(&zero)?;
        src.borrow_mut().set_len(0)?;
        src.borrow_mut().write_at(0, &bytes)?;

        Ok(PrepResult {
            payload: Source::Buffer(BufferSource::with_data(zero, false)).into_handle(),
            length: payload_len,
            physical: PhysicalFormat::Sectors,
            order: SectorOrder::ProDos,
            dos_volume: None,
            bad_blocks: BTreeSet::new(),
            damaged: false,
        })
    }
}

impl Default for NuFx {
    fn default() -> Self {
        NuFx::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BufferSource, Source};

    fn fresh_sdk(blocks: u32) -> (NuFx, SourceHandle) {
        let src = Source::Buffer(BufferSource::new(0, true)).into_handle();
        let mut wrapper = NuFx::new();
        wrapper
            .create(&src, blocks as u64 * BLOCK_SIZE as u64, Some("TESTDISK"))
            .unwrap();
        (wrapper, src)
    }

    #[test]
    fn crc16_known_value() {
        // CRC-16/XMODEM of "123456789" is 0x31C3.
        assert_eq!(nufx_crc(b"123456789", 0), 0x31c3);
    }

    #[test]
    fn created_archive_reopens() {
        let (_, src) = fresh_sdk(1600);
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Match);

        let mut wrapper = NuFx::new();
        let prep = wrapper.prep(&src, len, false).unwrap();
        assert_eq!(prep.length, 819_200);
        assert_eq!(prep.order, SectorOrder::ProDos);
    }

    #[test]
    fn flush_roundtrips_payload_change() {
        let (mut wrapper, src) = fresh_sdk(8);
        let len = src.borrow().len();
        let prep = wrapper.prep(&src, len, false).unwrap();

        prep.payload.borrow_mut().write_at(100, &[0x5a; 16]).unwrap();
        wrapper.flush(&src, &prep.payload, prep.length).unwrap();

        let mut wrapper2 = NuFx::new();
        let len2 = src.borrow().len();
        let prep2 = wrapper2.prep(&src, len2, false).unwrap();
        let mut buf = [0u8; 16];
        prep2.payload.borrow_mut().read_at(100, &mut buf).unwrap();
        assert_eq!(buf, [0x5a; 16]);
    }

    #[test]
    fn corrupted_master_crc_reports_corrupt() {
        let (_, src) = fresh_sdk(8);
        let mut byte = [0u8; 1];
        src.borrow_mut().read_at(9, &mut byte).unwrap();
        src.borrow_mut().write_at(9, &[byte[0] ^ 0xff]).unwrap();
        // total_records is covered by the master CRC
        let len = src.borrow().len();
        assert_eq!(test(&src, len), WrapperTestResult::Corrupt);
    }
}
