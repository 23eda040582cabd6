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

    src/fs/mod.rs

    Filesystem detection and drivers. The probe chain runs in a fixed
    order chosen to resolve overlap: partition schemes come before the
    filesystems that can appear inside them, FAT before ProDOS to catch
    re-formatted CFFA cards, DOS before ProDOS because an 800K ProDOS
    disk can carry embedded DOS volumes.
*/

pub mod cffa;
pub mod cpm;
pub mod dos33;
pub mod fat;
pub mod focusdrive;
pub mod hfs;
pub mod macpart;
pub mod microdrive;
pub mod pascal;
pub mod prodos;
pub mod rdos;
pub mod unidos;

use crate::{
    diskimage::DiskImage,
    types::enums::{FsFormat, SectorOrder},
    DiskImageError,
};

/// How strict a probe should be. `Very` is only used when re-running a
/// probe for an explicit format override.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Leniency {
    Not,
    Very,
}

/// One file found by a filesystem driver.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub name: String,
    pub kind: String,
    pub size: u64,
    pub locked: bool,
    pub(crate) locator: FileLocator,
}

/// Where a file's content lives, in driver-specific terms.
#[derive(Clone, Debug)]
pub(crate) enum FileLocator {
    /// DOS 3.x track/sector list chain.
    TsList { track: usize, sector: usize },
    /// ProDOS key pointer with storage type and EOF.
    ProDos { key_block: u64, storage_type: u8, eof: u64 },
    /// Contiguous block run (Pascal).
    BlockRun { first: u64, past_last: u64, last_bytes: u64 },
    /// CP/M allocation blocks, 1K each.
    CpmBlocks { blocks: Vec<u16>, records: u64 },
    /// RDOS contiguous 256-byte sector run.
    SectorRun { start: u64, count: u64 },
    None,
}

/// A sub-volume exposed by a partition scheme.
#[derive(Clone, Debug)]
pub struct Partition {
    pub name: String,
    pub start_block: u64,
    pub num_blocks: u64,
}

/// Candidate image orderings for a probe pass, best guess first. CP/M
/// ordering is never probed for; it only arises by explicit override.
pub(crate) fn order_candidates(hint: SectorOrder) -> Vec<SectorOrder> {
    let mut candidates = vec![SectorOrder::Dos, SectorOrder::ProDos, SectorOrder::Physical];
    if let Some(at) = candidates.iter().position(|&o| o == hint) {
        candidates.remove(at);
        candidates.insert(0, hint);
    }
    candidates
}

/// Run the full probe chain. On a hit, the image's ordering and any
/// geometry adjustment are applied by the caller from the result.
pub(crate) fn probe_chain(
    img: &mut DiskImage,
) -> Option<(FsFormat, SectorOrder)> {
    type Probe = fn(&mut DiskImage, SectorOrder, Leniency) -> Result<(SectorOrder, FsFormat), DiskImageError>;
    // (probe fn, name) in canonical order.
    let chain: &[(Probe, &str)] = &[
        (macpart::test_fs, "MacPart"),
        (microdrive::test_fs, "MicroDrive"),
        (focusdrive::test_fs, "FocusDrive"),
        (cffa::test_fs, "CFFA"),
        (fat::test_fs, "MSDOS"),
        (dos33::test_fs, "DOS3.x"),
        (unidos::test_wide_fs, "wide DOS3.3"),
        (unidos::test_fs, "UNIDOS"),
        (unidos::test_oz_fs, "OzDOS"),
        (prodos::test_fs, "ProDOS"),
        (pascal::test_fs, "Pascal"),
        (cpm::test_fs, "CP/M"),
        (rdos::test_fs, "RDOS"),
        (hfs::test_fs, "HFS"),
    ];

    let hint = img.order();
    for (probe, name) in chain {
        match probe(img, hint, Leniency::Not) {
            Ok((order, format)) => {
                log::debug!("probe_chain(): found {}, order {:?}", name, order);
                return Some((format, order));
            }
            Err(DiskImageError::FilesystemNotFound) => {}
            Err(e) => {
                log::trace!("probe_chain(): {} probe errored: {}", name, e);
            }
        }
    }
    None
}

/// Re-run the probe matching `format` with leniency, for an explicit
/// override request.
pub(crate) fn probe_for_override(
    img: &mut DiskImage,
    format: FsFormat,
    order: SectorOrder,
) -> Result<(SectorOrder, FsFormat), DiskImageError> {
    match format {
        FsFormat::Dos33 | FsFormat::Dos32 => dos33::test_fs(img, order, Leniency::Very),
        FsFormat::ProDos => prodos::test_fs(img, order, Leniency::Very),
        FsFormat::Pascal => pascal::test_fs(img, order, Leniency::Very),
        FsFormat::MacHFS => hfs::test_fs(img, order, Leniency::Very),
        FsFormat::UniDos => unidos::test_fs(img, order, Leniency::Very),
        FsFormat::OzDos => unidos::test_oz_fs(img, order, Leniency::Very),
        FsFormat::Cffa4 | FsFormat::Cffa8 => cffa::test_fs(img, order, Leniency::Very),
        FsFormat::MacPart => macpart::test_fs(img, order, Leniency::Very),
        FsFormat::MicroDrive => microdrive::test_fs(img, order, Leniency::Very),
        FsFormat::FocusDrive => focusdrive::test_fs(img, order, Leniency::Very),
        FsFormat::Cpm => cpm::test_fs(img, order, Leniency::Very),
        FsFormat::MsDos => fat::test_fs(img, order, Leniency::Very),
        FsFormat::Rdos33 | FsFormat::Rdos32 | FsFormat::Rdos3 => {
            let (new_order, new_format) = rdos::test_fs(img, order, Leniency::Very)?;
            if new_format != format {
                // Found RDOS, but the wrong flavor.
                return Err(DiskImageError::FilesystemNotFound);
            }
            Ok((new_order, new_format))
        }
        // Nothing to validate for the generic formats.
        FsFormat::GenericPhysicalOrd
        | FsFormat::GenericProDosOrd
        | FsFormat::GenericDosOrd
        | FsFormat::GenericCpmOrd
        | FsFormat::Unknown => Ok((order, format)),
    }
}

/// An open filesystem driver over a DiskImage.
pub enum DiskFs {
    Dos33(dos33::DosFs),
    ProDos(prodos::ProDosFs),
    Pascal(pascal::PascalFs),
    Cpm(cpm::CpmFs),
    Rdos(rdos::RdosFs),
    Partitioned(PartitionedFs),
}

/// Shared driver for every partition scheme: the scheme only differs in
/// how its table was probed.
pub struct PartitionedFs {
    pub format: FsFormat,
    pub partitions: Vec<Partition>,
}

impl DiskFs {
    /// Open the driver appropriate to the image's detected filesystem.
    pub fn open(img: &mut DiskImage) -> Result<DiskFs, DiskImageError> {
        let fs = match img.fs_format() {
            FsFormat::Dos33 | FsFormat::Dos32 => DiskFs::Dos33(dos33::DosFs::open(img)?),
            FsFormat::ProDos => DiskFs::ProDos(prodos::ProDosFs::open(img)?),
            FsFormat::Pascal => DiskFs::Pascal(pascal::PascalFs::open(img)?),
            FsFormat::Cpm => DiskFs::Cpm(cpm::CpmFs::open(img)?),
            FsFormat::Rdos33 | FsFormat::Rdos32 | FsFormat::Rdos3 => {
                DiskFs::Rdos(rdos::RdosFs::open(img)?)
            }
            FsFormat::UniDos | FsFormat::OzDos => DiskFs::Partitioned(unidos::open_partitions(img)?),
            FsFormat::Cffa4 | FsFormat::Cffa8 => DiskFs::Partitioned(cffa::open_partitions(img)?),
            FsFormat::MacPart => DiskFs::Partitioned(macpart::open_partitions(img)?),
            FsFormat::MicroDrive => DiskFs::Partitioned(microdrive::open_partitions(img)?),
            FsFormat::FocusDrive => DiskFs::Partitioned(focusdrive::open_partitions(img)?),
            other => {
                log::debug!("DiskFs::open(): no driver for {:?}", other);
                return Err(DiskImageError::UnsupportedFsFmt);
            }
        };
        img.add_fs_ref();
        Ok(fs)
    }

    /// Enumerate files (or partitions, for partition schemes).
    pub fn list(&self, img: &mut DiskImage) -> Result<Vec<FileEntry>, DiskImageError> {
        match self {
            DiskFs::Dos33(fs) => fs.list(img),
            DiskFs::ProDos(fs) => fs.list(img),
            DiskFs::Pascal(fs) => fs.list(img),
            DiskFs::Cpm(fs) => fs.list(img),
            DiskFs::Rdos(fs) => fs.list(img),
            DiskFs::Partitioned(fs) => Ok(fs
                .partitions
                .iter()
                .map(|p| FileEntry {
                    name: p.name.clone(),
                    kind: "VOL".to_string(),
                    size: p.num_blocks * crate::BLOCK_SIZE as u64,
                    locked: false,
                    locator: FileLocator::None,
                })
                .collect()),
        }
    }

    /// Read one file's content.
    pub fn read_file(
        &self,
        img: &mut DiskImage,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, DiskImageError> {
        match self {
            DiskFs::Dos33(fs) => fs.read_file(img, entry),
            DiskFs::ProDos(fs) => fs.read_file(img, entry),
            DiskFs::Pascal(fs) => fs.read_file(img, entry),
            DiskFs::Cpm(fs) => fs.read_file(img, entry),
            DiskFs::Rdos(fs) => fs.read_file(img, entry),
            DiskFs::Partitioned(_) => Err(DiskImageError::UnsupportedAccess),
        }
    }

    pub fn volume_name(&self) -> Option<String> {
        match self {
            DiskFs::Dos33(fs) => Some(fs.volume_name()),
            DiskFs::ProDos(fs) => Some(fs.volume_name()),
            DiskFs::Pascal(fs) => Some(fs.volume_name()),
            DiskFs::Cpm(_) => Some("CP/M".to_string()),
            DiskFs::Rdos(fs) => Some(fs.volume_name()),
            DiskFs::Partitioned(_) => None,
        }
    }

    pub fn partitions(&self) -> &[Partition] {
        match self {
            DiskFs::Partitioned(fs) => &fs.partitions,
            _ => &[],
        }
    }

    /// Release the driver's claim on the image.
    pub fn close(self, img: &mut DiskImage) {
        img.release_fs_ref();
    }
}

/// High-level format: write empty filesystem structures onto a zeroed
/// image. Only filesystems with format support accept this.
pub fn format_image(
    img: &mut DiskImage,
    format: FsFormat,
    volume_name: &str,
) -> Result<(), DiskImageError> {
    match format {
        FsFormat::Dos33 => dos33::format(img, volume_name),
        FsFormat::ProDos => prodos::format(img, volume_name),
        _ => Err(DiskImageError::UnsupportedFsFmt),
    }
}
