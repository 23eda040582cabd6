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

    src/diskimage.rs

    The DiskImage: the uniform view over one disk image, however it is
    wrapped and encoded. Open peels the layers (outer wrapper, image
    wrapper, physical decode, filesystem probe); afterwards the image
    serves track/sector and block reads and writes, spawns sub-images
    over embedded volumes, and flushes its layers back down on request.
*/

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    path::Path,
    rc::Rc,
};

use crate::{
    containers::{gzip::OuterGzip, zip::OuterZip, OuterTestResult, OuterWrapper},
    fs,
    physical::{
        calc_sector_offset, is_linear_blocks,
        nibble::{self, NibbleDescr, STD_NIBBLE_DESCRS},
        SectorPairing,
    },
    source::{BufferSource, DeviceSource, FileSource, Source, SourceHandle, WindowSource},
    types::{
        enums::{FileFormat, FsFormat, OuterFormat, PhysicalFormat, SectorOrder},
        geometry::DiskGeometry,
    },
    util,
    wrappers::{self, ImageWrapper, WrapperTestResult},
    DiskImageError, BLOCK_SIZE, DEFAULT_NIBBLE_VOLUME_NUM, SECTOR_SIZE, TRACK_COUNT_525,
};

/// Severity of a note accumulated during analysis.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NoteKind {
    Info,
    Warning,
}

#[derive(Clone, Debug)]
pub struct Note {
    pub kind: NoteKind,
    pub text: String,
}

/// Scan progress callback: message and unit count; returning false
/// cancels the operation.
pub type ProgressFn = Rc<dyn Fn(&str, u64) -> bool>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlushMode {
    All,
    /// Skip wrappers without fast flush, so periodic autosaves don't
    /// pay for recompression.
    FastOnly,
}

/// Parameters for creating a new image. Geometry is either
/// tracks/sectors or blocks, not both.
pub struct CreateParams {
    pub outer_format: OuterFormat,
    pub file_format: FileFormat,
    pub physical_format: PhysicalFormat,
    pub order: SectorOrder,
    pub fs_format: FsFormat,
    pub num_tracks: usize,
    pub sectors_per_track: usize,
    pub num_blocks: u64,
    pub dos_volume: Option<u8>,
    pub storage_name: Option<String>,
    pub nibble_descr: Option<NibbleDescr>,
}

impl Default for CreateParams {
    fn default() -> Self {
        CreateParams {
            outer_format: OuterFormat::None,
            file_format: FileFormat::Unadorned,
            physical_format: PhysicalFormat::Sectors,
            order: SectorOrder::ProDos,
            fs_format: FsFormat::GenericProDosOrd,
            num_tracks: 0,
            sectors_per_track: 0,
            num_blocks: 0,
            dos_volume: None,
            storage_name: None,
            nibble_descr: None,
        }
    }
}

struct NibbleCache {
    track: usize,
    data: Vec<u8>,
}

pub struct DiskImage {
    outer_format: OuterFormat,
    file_format: FileFormat,
    physical_format: PhysicalFormat,
    order: SectorOrder,
    fs_order: SectorOrder,
    fs_format: FsFormat,

    outer: Option<OuterWrapper>,
    wrapper: Option<ImageWrapper>,

    /// Outermost source (the file itself) when an outer wrapper exists.
    outer_src: Option<SourceHandle>,
    /// The adorned file (or decompressed copy of it).
    wrapper_src: Option<SourceHandle>,
    /// The unadorned payload.
    data: Option<SourceHandle>,

    length: u64,
    wrapped_length: u64,

    num_tracks: usize,
    sectors_per_track: usize,
    num_blocks: u64,
    has_sectors: bool,
    has_blocks: bool,
    has_nibbles: bool,

    read_only: bool,
    expandable: bool,
    dos_volume: Option<u8>,
    pairing: Option<SectorPairing>,
    bad_blocks: BTreeSet<u64>,
    notes: Vec<Note>,
    noted_13sector_order: bool,

    /// Working copy of the standard profile table plus a slot for a
    /// custom profile; `nibble_descr` indexes into it.
    nibble_table: Vec<NibbleDescr>,
    nibble_descr: Option<usize>,
    nibble_cache: Option<NibbleCache>,

    dirty: Rc<Cell<bool>>,
    /// Dirty cells of every ancestor, nearest last; set on write.
    ancestor_dirty: Vec<Rc<Cell<bool>>>,
    /// Dirty cells of every image in this open family; the root clears
    /// them all on a successful full flush.
    family_dirty: Rc<RefCell<Vec<Rc<Cell<bool>>>>>,

    fs_refs: Cell<u32>,
    progress: Option<ProgressFn>,
    scan_msg: RefCell<String>,
    scan_count: Cell<u64>,
}

impl std::fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImage")
            .field("outer_format", &self.outer_format)
            .field("file_format", &self.file_format)
            .field("physical_format", &self.physical_format)
            .field("order", &self.order)
            .field("fs_order", &self.fs_order)
            .field("fs_format", &self.fs_format)
            .field("length", &self.length)
            .field("wrapped_length", &self.wrapped_length)
            .field("num_tracks", &self.num_tracks)
            .field("sectors_per_track", &self.sectors_per_track)
            .field("num_blocks", &self.num_blocks)
            .field("has_sectors", &self.has_sectors)
            .field("has_blocks", &self.has_blocks)
            .field("has_nibbles", &self.has_nibbles)
            .field("read_only", &self.read_only)
            .field("expandable", &self.expandable)
            .field("dos_volume", &self.dos_volume)
            .field("pairing", &self.pairing)
            .field("bad_blocks", &self.bad_blocks)
            .field("notes", &self.notes)
            .field("noted_13sector_order", &self.noted_13sector_order)
            .field("nibble_descr", &self.nibble_descr)
            .finish_non_exhaustive()
    }
}

impl DiskImage {
    fn empty() -> DiskImage {
        let dirty = Rc::new(Cell::new(false));
        DiskImage {
            outer_format: OuterFormat::None,
            file_format: FileFormat::Unadorned,
            physical_format: PhysicalFormat::Sectors,
            order: SectorOrder::Unknown,
            fs_order: SectorOrder::Unknown,
            fs_format: FsFormat::Unknown,
            outer: None,
            wrapper: None,
            outer_src: None,
            wrapper_src: None,
            data: None,
            length: 0,
            wrapped_length: 0,
            num_tracks: 0,
            sectors_per_track: 0,
            num_blocks: 0,
            has_sectors: false,
            has_blocks: false,
            has_nibbles: false,
            read_only: false,
            expandable: false,
            dos_volume: None,
            pairing: None,
            bad_blocks: BTreeSet::new(),
            notes: Vec::new(),
            noted_13sector_order: false,
            nibble_table: STD_NIBBLE_DESCRS.to_vec(),
            nibble_descr: None,
            nibble_cache: None,
            dirty: dirty.clone(),
            ancestor_dirty: Vec::new(),
            family_dirty: Rc::new(RefCell::new(vec![dirty])),
            fs_refs: Cell::new(0),
            progress: None,
            scan_msg: RefCell::new(String::new()),
            scan_count: Cell::new(0),
        }
    }

    // ----- open -----

    /// Open an image file. Analysis runs to completion; an unknown
    /// filesystem is not an error, only an unknown file format is.
    pub fn open_file<P: AsRef<Path>>(
        path: P,
        read_only: bool,
    ) -> Result<DiskImage, DiskImageError> {
        let path = path.as_ref();
        log::debug!("DiskImage::open_file(): '{}' ro={}", path.display(), read_only);

        let mut img = DiskImage::empty();
        img.read_only = read_only;
        img.wrapper_src =
            Some(Source::File(FileSource::open(path, read_only)?).into_handle());

        img.analyze_image_file(path.file_name().and_then(|n| n.to_str()))?;
        img.analyze_image()?;
        Ok(img)
    }

    /// Open from a memory buffer holding an image file.
    pub fn open_buffer(buf: Vec<u8>, read_only: bool) -> Result<DiskImage, DiskImageError> {
        let mut img = DiskImage::empty();
        img.read_only = read_only;
        img.wrapper_src =
            Some(Source::Buffer(BufferSource::with_data(buf, true)).into_handle());
        img.analyze_image_file(None)?;
        img.analyze_image()?;
        Ok(img)
    }

    /// Open a raw OS volume. Always unadorned ProDOS-order blocks.
    pub fn open_volume<P: AsRef<Path>>(
        path: P,
        read_only: bool,
    ) -> Result<DiskImage, DiskImageError> {
        let mut img = DiskImage::empty();
        img.read_only = read_only;
        img.wrapper_src =
            Some(Source::Device(DeviceSource::open(path, read_only)?).into_handle());
        img.analyze_image_file(Some("cp-win-vol"))?;
        img.analyze_image()?;
        Ok(img)
    }

    /// Figure out the wrapper layering from the filename extension,
    /// falling back to content probing.
    fn analyze_image_file(&mut self, name_hint: Option<&str>) -> Result<(), DiskImageError> {
        let wrapper_src = self.wrapper_src.clone().ok_or(DiskImageError::NotReady)?;
        self.wrapped_length = wrapper_src.borrow().len();

        let name_hint = name_hint.unwrap_or_default();
        let mut ext = util::find_extension(name_hint).unwrap_or_default();
        if name_hint == "cp-win-vol" {
            ext = name_hint.to_string();
        }

        // Strip a zip/gzip wrapper before anything else. Web servers
        // gzip everything in sight, so anything could be inside.
        let mut outer = None;
        if ext == "gz" && OuterGzip::test(&wrapper_src) == OuterTestResult::Match {
            log::debug!("analyze_image_file(): found gz outer wrapper");
            outer = Some(OuterWrapper::Gzip(OuterGzip::new()));
            self.outer_format = OuterFormat::Gzip;
        } else if ext == "zip" {
            match OuterZip::test(&wrapper_src) {
                OuterTestResult::Match => {
                    log::debug!("analyze_image_file(): found zip outer wrapper");
                    outer = Some(OuterWrapper::Zip(OuterZip::new()));
                    self.outer_format = OuterFormat::Zip;
                }
                OuterTestResult::Damaged => return Err(DiskImageError::BadArchiveStruct),
                OuterTestResult::NotRecognized => return Err(DiskImageError::BadFileFormat),
            }
        }

        if let Some(mut wrapper) = outer {
            let (payload, wrapped_len) = wrapper.load(&wrapper_src)?;
            if wrapper.is_damaged() {
                self.add_note(NoteKind::Warning, "The zip/gzip wrapper appears to be damaged.");
                self.read_only = true;
            }
            // Recover an extension hint: the name stored inside the
            // wrapper, or for gzip the next extension down on the
            // original filename ("disk.do.gz" -> "do").
            ext = wrapper
                .inner_name()
                .and_then(util::find_extension)
                .or_else(|| {
                    (self.outer_format == OuterFormat::Gzip)
                        .then(|| {
                            util::find_extension(name_hint.trim_end_matches(".gz"))
                        })
                        .flatten()
                })
                .unwrap_or_default();
            self.outer_src = Some(wrapper_src);
            self.wrapper_src = Some(payload);
            self.wrapped_length = wrapped_len;
            self.outer = Some(wrapper);
        }
        let wrapper_src = self.wrapper_src.clone().ok_or(DiskImageError::NotReady)?;
        let len = self.wrapped_length;

        if len == 0 {
            return Err(DiskImageError::UnrecognizedFileFmt);
        }

        // First pass: trust the filename. If two formats look alike this
        // gets it right.
        let mut reliable_ext = false;
        let mut probable: Option<(FileFormat, PhysicalFormat, SectorOrder)> = None;

        match ext.as_str() {
            "2mg" | "2img" => {
                reliable_ext = true;
                if wrappers::test_wrapper(FileFormat::TwoMG, &wrapper_src, len)
                    == WrapperTestResult::Match
                {
                    probable = Some((FileFormat::TwoMG, PhysicalFormat::Sectors, SectorOrder::Unknown));
                }
            }
            "shk" | "sdk" | "bxy" => {
                reliable_ext = true;
                match wrappers::test_wrapper(FileFormat::NuFX, &wrapper_src, len) {
                    WrapperTestResult::Match => {
                        probable =
                            Some((FileFormat::NuFX, PhysicalFormat::Sectors, SectorOrder::ProDos));
                    }
                    WrapperTestResult::IsFileArchive => {
                        log::debug!("analyze_image_file(): NuFX file archive, not a disk image");
                        return Err(DiskImageError::FileArchive);
                    }
                    WrapperTestResult::Corrupt => return Err(DiskImageError::BadChecksum),
                    WrapperTestResult::None => {}
                }
            }
            "hdv" => {
                // Usually a raw volume, but check for Sim //e.
                if wrappers::test_wrapper(FileFormat::Sim2eHDV, &wrapper_src, len)
                    == WrapperTestResult::Match
                {
                    probable =
                        Some((FileFormat::Sim2eHDV, PhysicalFormat::Sectors, SectorOrder::ProDos));
                } else {
                    probable = Some((
                        FileFormat::Unadorned,
                        PhysicalFormat::Sectors,
                        SectorOrder::ProDos,
                    ));
                }
                // ProDOS virtual drives can grow.
                self.expandable = true;
            }
            "dsk" | "dc" => {
                // A checksum mismatch on an extension match is
                // recoverable; prep marks the image damaged.
                match wrappers::test_wrapper(FileFormat::DiskCopy42, &wrapper_src, len) {
                    WrapperTestResult::Match | WrapperTestResult::Corrupt => {
                        probable = Some((
                            FileFormat::DiskCopy42,
                            PhysicalFormat::Sectors,
                            SectorOrder::ProDos,
                        ));
                    }
                    _ => {}
                }
            }
            "ddd" => {
                reliable_ext = true;
                if wrappers::test_wrapper(FileFormat::DDD, &wrapper_src, len)
                    == WrapperTestResult::Match
                {
                    probable = Some((FileFormat::DDD, PhysicalFormat::Sectors, SectorOrder::Dos));
                }
            }
            "app" => {
                reliable_ext = true;
                if wrappers::test_wrapper(FileFormat::TrackStar, &wrapper_src, len)
                    == WrapperTestResult::Match
                {
                    probable = Some((
                        FileFormat::TrackStar,
                        PhysicalFormat::Nib525Var,
                        SectorOrder::Physical,
                    ));
                }
            }
            "fdi" => {
                reliable_ext = true;
                if wrappers::test_wrapper(FileFormat::FDI, &wrapper_src, len)
                    == WrapperTestResult::Match
                {
                    probable = Some((
                        FileFormat::FDI,
                        PhysicalFormat::Nib525Var,
                        SectorOrder::Physical,
                    ));
                }
            }
            "img" => {
                if wrappers::unadorned::test_sector(len) == WrapperTestResult::Match {
                    probable = Some((
                        FileFormat::Unadorned,
                        PhysicalFormat::Sectors,
                        SectorOrder::Physical,
                    ));
                }
            }
            "nib" | "raw" => {
                if wrappers::unadorned::test_nibble(len) == WrapperTestResult::Match {
                    probable = Some((
                        FileFormat::Unadorned,
                        PhysicalFormat::Nib525_6656,
                        SectorOrder::Physical,
                    ));
                }
            }
            "do" | "d13" => {
                if wrappers::unadorned::test_sector(len) == WrapperTestResult::Match {
                    probable = Some((
                        FileFormat::Unadorned,
                        PhysicalFormat::Sectors,
                        SectorOrder::Dos,
                    ));
                }
            }
            "po" | "dc6" | "iso" => {
                if wrappers::unadorned::test_sector(len) == WrapperTestResult::Match {
                    probable = Some((
                        FileFormat::Unadorned,
                        PhysicalFormat::Sectors,
                        SectorOrder::ProDos,
                    ));
                }
            }
            "cp-win-vol" => {
                reliable_ext = true;
                probable = Some((
                    FileFormat::Unadorned,
                    PhysicalFormat::Sectors,
                    SectorOrder::ProDos,
                ));
            }
            _ => {}
        }

        if probable.is_some() {
            log::debug!("analyze_image_file(): scored hit on extension '{}'", ext);
        } else {
            if reliable_ext {
                // Wrong extension on the file or damaged contents.
                log::debug!(
                    "analyze_image_file(): extension '{}' did not match contents",
                    ext
                );
                return Err(DiskImageError::BadFileFormat);
            }
            probable = self.probe_by_content(&wrapper_src, len)?;
        }

        let Some((file_format, mut physical, mut order)) = probable else {
            log::debug!("analyze_image_file(): couldn't figure out the file format");
            return Err(DiskImageError::UnrecognizedFileFmt);
        };

        // Instantiate and prep the wrapper.
        let mut wrapper = match file_format {
            FileFormat::Unadorned => {
                ImageWrapper::Unadorned(wrappers::unadorned::Unadorned::with_order(physical, order))
            }
            other => wrappers::new_wrapper(other, physical),
        };
        if file_format == FileFormat::FDI {
            // Writing to FDI is not supported.
            self.read_only = true;
        }

        let prep = wrapper.prep(&wrapper_src, len, self.read_only)?;
        if prep.damaged {
            self.add_note(NoteKind::Warning, "File checksum didn't match.");
            self.read_only = true;
        }
        if let ImageWrapper::TwoMg(two_mg) = &wrapper {
            if two_mg.locked() {
                self.add_note(NoteKind::Info, "Image is marked locked.");
                self.read_only = true;
            }
        }

        physical = prep.physical;
        if prep.order != SectorOrder::Unknown {
            order = prep.order;
        }

        self.file_format = file_format;
        self.physical_format = physical;
        self.order = order;
        self.length = prep.length;
        self.dos_volume = prep.dos_volume.or(self.dos_volume);
        self.bad_blocks = prep.bad_blocks;
        self.data = Some(prep.payload);
        self.wrapper = Some(wrapper);

        Ok(())
    }

    /// Content-order probing when the extension was no help.
    fn probe_by_content(
        &mut self,
        src: &SourceHandle,
        len: u64,
    ) -> Result<Option<(FileFormat, PhysicalFormat, SectorOrder)>, DiskImageError> {
        log::debug!("probe_by_content(): probing {} bytes", len);

        match wrappers::test_wrapper(FileFormat::NuFX, src, len) {
            WrapperTestResult::Match => {
                return Ok(Some((FileFormat::NuFX, PhysicalFormat::Sectors, SectorOrder::ProDos)))
            }
            // We know it's NuFX; we also know we can't use it.
            WrapperTestResult::IsFileArchive => return Err(DiskImageError::FileArchive),
            WrapperTestResult::Corrupt => return Err(DiskImageError::BadChecksum),
            WrapperTestResult::None => {}
        }
        match wrappers::test_wrapper(FileFormat::DiskCopy42, src, len) {
            WrapperTestResult::Match => {
                return Ok(Some((
                    FileFormat::DiskCopy42,
                    PhysicalFormat::Sectors,
                    SectorOrder::ProDos,
                )))
            }
            // Right file type, bad data.
            WrapperTestResult::Corrupt => return Err(DiskImageError::BadChecksum),
            _ => {}
        }
        if wrappers::test_wrapper(FileFormat::TwoMG, src, len) == WrapperTestResult::Match {
            return Ok(Some((FileFormat::TwoMG, PhysicalFormat::Sectors, SectorOrder::Unknown)));
        }
        if wrappers::test_wrapper(FileFormat::DDD, src, len) == WrapperTestResult::Match {
            return Ok(Some((FileFormat::DDD, PhysicalFormat::Sectors, SectorOrder::Dos)));
        }
        if wrappers::test_wrapper(FileFormat::Sim2eHDV, src, len) == WrapperTestResult::Match {
            return Ok(Some((
                FileFormat::Sim2eHDV,
                PhysicalFormat::Sectors,
                SectorOrder::ProDos,
            )));
        }
        if wrappers::test_wrapper(FileFormat::TrackStar, src, len) == WrapperTestResult::Match {
            return Ok(Some((
                FileFormat::TrackStar,
                PhysicalFormat::Nib525Var,
                SectorOrder::Physical,
            )));
        }
        if wrappers::test_wrapper(FileFormat::FDI, src, len) == WrapperTestResult::Match {
            return Ok(Some((
                FileFormat::FDI,
                PhysicalFormat::Nib525Var,
                SectorOrder::Physical,
            )));
        }
        if wrappers::unadorned::test_nibble(len) == WrapperTestResult::Match {
            return Ok(Some((
                FileFormat::Unadorned,
                PhysicalFormat::Nib525_6656,
                SectorOrder::Unknown,
            )));
        }
        if wrappers::unadorned::test_sector(len) == WrapperTestResult::Match {
            return Ok(Some((
                FileFormat::Unadorned,
                PhysicalFormat::Sectors,
                SectorOrder::Unknown,
            )));
        }
        Ok(None)
    }

    /// Work out tracks, sectors and blocks, decode nibble geometry, and
    /// run the filesystem probe.
    fn analyze_image(&mut self) -> Result<(), DiskImageError> {
        if self.physical_format.is_sectors() {
            if self.length == 0 {
                log::debug!("analyze_image(): zero-length disk images not allowed");
                return Err(DiskImageError::OddLength);
            }
            if self.length == crate::D13_LENGTH {
                self.has_sectors = true;
                self.sectors_per_track = 13;
                self.num_tracks = TRACK_COUNT_525;
            } else if self.length % (16 * SECTOR_SIZE as u64) == 0 {
                self.has_sectors = true;
                if self.pairing.is_some() {
                    // Paired disks address wide tracks; two logical
                    // tracks interleave through each pair of slots.
                    let wide_slots = (self.length / (32 * SECTOR_SIZE as u64)) as usize;
                    if wide_slots == 0 || wide_slots % 2 != 0 {
                        log::debug!("analyze_image(): bad attempt at sector pairing");
                        return Err(DiskImageError::OddLength);
                    }
                    self.sectors_per_track = 32;
                    self.num_tracks = wide_slots / 2;
                } else {
                    self.sectors_per_track = 16;
                    self.num_tracks = (self.length / (16 * SECTOR_SIZE as u64)) as usize;
                }
            } else if self.length % BLOCK_SIZE as u64 == 0 {
                if self.pairing.is_some() {
                    return Err(DiskImageError::OddLength);
                }
                self.has_blocks = true;
                self.num_blocks = self.length / BLOCK_SIZE as u64;
            } else {
                return Err(DiskImageError::OddLength);
            }
        } else {
            // Nibbles: assess the whole disk to pick a profile, which
            // also tells us whether this is 13- or 16-sector.
            self.has_nibbles = true;
            self.analyze_nibble_data()?;
        }

        // Compute the block count. A 13-sector disk has no block access.
        if self.has_sectors {
            if self.sectors_per_track % 2 == 0 {
                self.has_blocks = true;
                self.num_blocks =
                    (self.num_tracks * self.sectors_per_track) as u64 / 2;
            }
        }

        if !self.has_sectors && !self.has_blocks && !self.has_nibbles {
            log::debug!("analyze_image(): no usable access mode");
            return Err(DiskImageError::Internal);
        }

        self.analyze_image_fs();

        log::debug!(
            "analyze_image(): tracks={} sectors={} blocks={} order={:?} fsOrder={:?} fs={:?}",
            self.num_tracks,
            self.sectors_per_track,
            self.num_blocks,
            self.order,
            self.fs_order,
            self.fs_format,
        );
        Ok(())
    }

    /// Try the standard nibble profiles in table order; keep the first
    /// that yields a full set of sectors on every track.
    fn analyze_nibble_data(&mut self) -> Result<(), DiskImageError> {
        self.num_tracks = match self.physical_format {
            PhysicalFormat::Nib525_6656 => self.length as usize / crate::NIB_TRACK_LEN_6656,
            PhysicalFormat::Nib525_6384 => self.length as usize / crate::NIB_TRACK_LEN_6384,
            PhysicalFormat::Nib525Var => match self.wrapper.as_ref() {
                Some(ImageWrapper::TrackStar(w)) => w.num_tracks(),
                Some(ImageWrapper::Fdi(w)) => w.num_tracks(),
                _ => TRACK_COUNT_525,
            },
            PhysicalFormat::Sectors => unreachable!(),
        };
        self.order = SectorOrder::Physical;

        'profiles: for idx in 0..self.nibble_table.len() {
            let descr = self.nibble_table[idx];
            if descr.num_sectors == 0 {
                continue;
            }
            let mut volume = 0;
            for track in 0..self.num_tracks {
                let Ok(raw) = self.read_nibble_track(track) else {
                    continue 'profiles;
                };
                if raw.is_empty() {
                    // A bad or absent track (FDI); tolerate it.
                    continue;
                }
                match nibble::analyze_track(&raw, track, &descr) {
                    Ok(stats) if stats.sectors_found == descr.num_sectors => {
                        if track == 0 {
                            volume = stats.volume;
                        }
                    }
                    _ => continue 'profiles,
                }
            }

            log::debug!(
                "analyze_nibble_data(): profile '{}' matched, volume {}",
                descr.description,
                volume
            );
            self.nibble_descr = Some(idx);
            self.has_sectors = true;
            self.sectors_per_track = descr.num_sectors;
            if self.dos_volume.is_none() {
                self.dos_volume = Some(volume);
            }
            if !self.read_only && !descr.data_verify_checksum {
                log::debug!("analyze_nibble_data(): profile ignores data checksums; disabling writes");
                self.add_note(
                    NoteKind::Info,
                    "Sectors use non-standard data checksums; writing disabled.",
                );
                self.read_only = true;
            }
            return Ok(());
        }

        // No profile matched; raw track access only.
        log::debug!("analyze_nibble_data(): no profile matched; raw track access only");
        self.nibble_descr = None;
        self.has_sectors = false;
        self.sectors_per_track = 0;
        Ok(())
    }

    /// Probe for a filesystem and settle the filesystem ordering.
    fn analyze_image_fs(&mut self) {
        if let Some((format, order)) = fs::probe_chain(self) {
            self.fs_format = format;
            self.order = order;

            // The two-volumes-in-one formats address the disk as wide
            // tracks; a standalone 400K half does too.
            let is_wide = matches!(format, FsFormat::UniDos | FsFormat::OzDos)
                || (format == FsFormat::Dos33
                    && self.sectors_per_track == 16
                    && self.length == 409_600
                    && fs::unidos::test_wide_fs(self, order, fs::Leniency::Not).is_ok());
            if is_wide {
                self.sectors_per_track = 32;
                self.num_tracks /= 2;
            }
        } else {
            self.fs_format = FsFormat::Unknown;
            log::debug!(
                "analyze_image_fs(): no recognizable filesystem (order {:?})",
                self.order
            );
        }
        self.fs_order = self.calc_fs_sector_order();
    }

    /// The ordering the filesystem's reads should be translated from.
    fn calc_fs_sector_order(&self) -> SectorOrder {
        if self.fs_format == FsFormat::Unknown || self.order == SectorOrder::Unknown {
            // In the absence of information, leave it alone.
            return self.order;
        }
        self.fs_format.required_order().unwrap_or(self.order)
    }

    // ----- create -----

    /// Create a new image file. Fails if the path exists. The payload is
    /// sector-zeroed or low-level nibble formatted; high-level
    /// filesystem formatting is a separate step.
    pub fn create<P: AsRef<Path>>(
        path: P,
        params: CreateParams,
    ) -> Result<DiskImage, DiskImageError> {
        let mut img = DiskImage::empty();
        img.prepare_create(&params)?;

        let file = Source::File(FileSource::create_new(path.as_ref())?).into_handle();
        if params.outer_format == OuterFormat::None {
            img.wrapper_src = Some(file);
        } else {
            img.outer_src = Some(file);
            img.wrapper_src =
                Some(Source::Buffer(BufferSource::new(0, true)).into_handle());
            img.outer = Some(match params.outer_format {
                OuterFormat::Gzip => OuterWrapper::Gzip(OuterGzip::new()),
                OuterFormat::Zip => OuterWrapper::Zip(OuterZip::new()),
                OuterFormat::None => unreachable!(),
            });
        }

        img.create_common(params)?;
        Ok(img)
    }

    /// Create a new image over a fresh memory buffer.
    pub fn create_buffer(params: CreateParams) -> Result<DiskImage, DiskImageError> {
        if params.outer_format != OuterFormat::None {
            return Err(DiskImageError::InvalidCreateReq);
        }
        let mut img = DiskImage::empty();
        img.prepare_create(&params)?;
        img.wrapper_src = Some(Source::Buffer(BufferSource::new(0, true)).into_handle());
        img.create_common(params)?;
        Ok(img)
    }

    /// Fill in geometry fields and validate the combination.
    fn prepare_create(&mut self, params: &CreateParams) -> Result<(), DiskImageError> {
        self.outer_format = params.outer_format;
        self.file_format = params.file_format;
        self.physical_format = params.physical_format;
        self.order = params.order;
        self.fs_format = params.fs_format;
        self.dos_volume = params.dos_volume;
        if let Some(descr) = params.nibble_descr {
            self.set_custom_nibble_descr(descr);
        }

        if params.num_blocks > 0 {
            self.num_blocks = params.num_blocks;
            self.has_blocks = true;
            if self.num_blocks % 8 == 0 {
                self.has_sectors = true;
                self.sectors_per_track = 16;
                self.num_tracks = (self.num_blocks / 8) as usize;
            }
        } else if params.num_tracks > 0 && params.sectors_per_track > 0 {
            self.num_tracks = params.num_tracks;
            self.sectors_per_track = params.sectors_per_track;
            self.has_sectors = true;
            if self.sectors_per_track % 2 == 0 {
                self.has_blocks = true;
                self.num_blocks = (self.num_tracks * self.sectors_per_track) as u64 / 2;
            }
        } else {
            return Err(DiskImageError::InvalidCreateReq);
        }
        if self.has_sectors && self.physical_format.is_nibbles() {
            self.has_nibbles = true;
        }

        self.length = if self.physical_format.is_sectors() {
            if self.has_blocks {
                self.num_blocks * BLOCK_SIZE as u64
            } else {
                (self.num_tracks * self.sectors_per_track * SECTOR_SIZE) as u64
            }
        } else {
            let track_len = match self.physical_format {
                PhysicalFormat::Nib525_6656 => crate::NIB_TRACK_LEN_6656,
                PhysicalFormat::Nib525_6384 => crate::NIB_TRACK_LEN_6384,
                // Variable-length formats get the standard allocation.
                _ => crate::NIB_TRACK_LEN_6656,
            };
            (self.num_tracks * track_len) as u64
        };

        self.fs_order = self.calc_fs_sector_order();
        self.validate_create_format()
    }

    /// Reject invalid create combinations up front.
    fn validate_create_format(&self) -> Result<(), DiskImageError> {
        if self.has_blocks && self.num_blocks >= 4_194_304 {
            // 2GB or larger must be unadorned
            if self.file_format != FileFormat::Unadorned {
                log::debug!("create: images >= 2GB can only be unadorned");
                return Err(DiskImageError::InvalidCreateReq);
            }
        }
        if self.physical_format == PhysicalFormat::Sectors && self.order == SectorOrder::Unknown {
            return Err(DiskImageError::InvalidCreateReq);
        }
        if !self.fs_format.is_generic() {
            log::debug!("create: may only use 'generic' filesystem formats");
            return Err(DiskImageError::InvalidCreateReq);
        }

        if self.physical_format.is_nibbles() {
            if self.order != SectorOrder::Physical {
                log::debug!("create: nibble images are always 'physical' order");
                return Err(DiskImageError::InvalidCreateReq);
            }
            if self.physical_format == PhysicalFormat::Nib525Var
                && !matches!(self.file_format, FileFormat::TrackStar | FileFormat::FDI)
            {
                log::debug!("create: variable nibbles need a per-track container");
                return Err(DiskImageError::InvalidCreateReq);
            }
            if self.has_sectors {
                let descr = self
                    .active_nibble_descr()
                    .ok_or(DiskImageError::InvalidCreateReq)?;
                if descr.num_sectors != self.sectors_per_track {
                    return Err(DiskImageError::InvalidCreateReq);
                }
                let want_53 = self.sectors_per_track == 13;
                let is_53 = descr.encoding == nibble::NibbleEncoding::FiveAndThree;
                if want_53 != is_53 {
                    log::debug!("create: sector count/encoding mismatch");
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            let track_ok = self.num_tracks == TRACK_COUNT_525
                || (self.num_tracks == 40 && self.file_format == FileFormat::TrackStar);
            if !track_ok {
                log::debug!("create: unexpected track count {}", self.num_tracks);
                return Err(DiskImageError::InvalidCreateReq);
            }
        }

        match self.file_format {
            FileFormat::TwoMG => {
                let ok = matches!(
                    (self.physical_format, self.order),
                    (PhysicalFormat::Sectors, SectorOrder::Dos)
                        | (PhysicalFormat::Sectors, SectorOrder::ProDos)
                        | (PhysicalFormat::Nib525_6656, SectorOrder::Physical)
                );
                if !ok {
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::NuFX => {
                if self.outer_format != OuterFormat::None
                    || self.physical_format != PhysicalFormat::Sectors
                    || self.order != SectorOrder::ProDos
                {
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::DiskCopy42 => {
                if self.physical_format != PhysicalFormat::Sectors
                    || self.num_blocks != 1600
                    || !(self.order == SectorOrder::ProDos || self.order == SectorOrder::Dos)
                {
                    log::debug!("create: DC42 only for 800K ProDOS/DOS disks");
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::Sim2eHDV => {
                if self.physical_format != PhysicalFormat::Sectors
                    || self.order != SectorOrder::ProDos
                {
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::TrackStar | FileFormat::FDI => {
                if self.physical_format != PhysicalFormat::Nib525Var {
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::DDD => {
                if self.physical_format != PhysicalFormat::Sectors
                    || self.order != SectorOrder::Dos
                    || !self.has_sectors
                    || self.num_tracks != TRACK_COUNT_525
                    || self.sectors_per_track != 16
                {
                    log::debug!("create: DDD is only for 16-sector 35-track DOS disks");
                    return Err(DiskImageError::InvalidCreateReq);
                }
            }
            FileFormat::Unadorned => {}
        }
        Ok(())
    }

    fn create_common(&mut self, params: CreateParams) -> Result<(), DiskImageError> {
        let wrapper_src = self.wrapper_src.clone().ok_or(DiskImageError::NotReady)?;
        let storage_name = params.storage_name.as_deref();

        let mut wrapper = wrappers::new_wrapper(self.file_format, self.physical_format);
        let prep = match &mut wrapper {
            ImageWrapper::Unadorned(w) => w.create(&wrapper_src, self.length)?,
            ImageWrapper::TwoMg(w) => w.create(
                &wrapper_src,
                self.length,
                self.physical_format,
                self.order,
                self.dos_volume,
            )?,
            ImageWrapper::DiskCopy42(w) => w.create(&wrapper_src, self.length, storage_name)?,
            ImageWrapper::Sim2e(w) => w.create(&wrapper_src, self.length)?,
            ImageWrapper::NuFx(w) => w.create(&wrapper_src, self.length, storage_name)?,
            ImageWrapper::Ddd(w) => w.create(&wrapper_src, self.length, self.dos_volume)?,
            ImageWrapper::TrackStar(w) => {
                let volume = self.dos_volume.unwrap_or(DEFAULT_NIBBLE_VOLUME_NUM);
                let descr = *self
                    .active_nibble_descr()
                    .unwrap_or(NibbleDescr::standard(nibble::StdNibbleDescr::Dos33Std));
                let tracks = self.num_tracks;
                w.create(&wrapper_src, tracks, &move |track| {
                    let mut buf = vec![0u8; wrappers::trackstar::MAX_TRACK_DATA];
                    // A track that fails to format stays empty.
                    let _ = nibble::format_track(&mut buf, track, volume, &descr);
                    buf
                })?
            }
            ImageWrapper::Fdi(_) => return Err(DiskImageError::NotSupported),
        };

        self.length = prep.length;
        self.data = Some(prep.payload);
        self.wrapper = Some(wrapper);
        self.wrapped_length = wrapper_src.borrow().len();

        // Low-level format the payload: zero sectors, or lay down empty
        // nibble tracks.
        if self.physical_format.is_nibbles() {
            if self.dos_volume.is_none() {
                log::debug!("create_common(): using default nibble volume number");
                self.dos_volume = Some(DEFAULT_NIBBLE_VOLUME_NUM);
            }
            if self.file_format == FileFormat::TrackStar {
                // Tracks were laid down by the wrapper; just select the
                // matching profile for sector access.
                if self.nibble_descr.is_none() {
                    self.nibble_descr = self
                        .nibble_table
                        .iter()
                        .position(|d| d.num_sectors == self.sectors_per_track);
                }
            } else {
                self.format_nibbles()?;
            }
        }

        self.mark_dirty();
        self.flush(FlushMode::All)?;
        Ok(())
    }

    /// Write freshly formatted nibble tracks across the payload.
    fn format_nibbles(&mut self) -> Result<(), DiskImageError> {
        let descr = *self
            .active_nibble_descr()
            .or_else(|| {
                (self.sectors_per_track == 16)
                    .then(|| NibbleDescr::standard(nibble::StdNibbleDescr::Dos33Std))
            })
            .ok_or(DiskImageError::InvalidCreateReq)?;
        let volume = self.dos_volume.unwrap_or(DEFAULT_NIBBLE_VOLUME_NUM);
        let data = self.data.clone().ok_or(DiskImageError::NotReady)?;

        for track in 0..self.num_tracks {
            let track_len = self.nibble_track_len(track);
            let offset = self.nibble_track_offset(track);
            let mut buf = vec![0u8; track_len];
            nibble::format_track(&mut buf, track, volume, &descr)?;
            data.borrow_mut().write_at(offset, &buf)?;
            self.check_cancel()?;
        }
        if self.nibble_descr.is_none() {
            self.nibble_descr = self
                .nibble_table
                .iter()
                .position(|d| d.num_sectors == descr.num_sectors && d.encoding == descr.encoding);
        }
        Ok(())
    }

    // ----- accessors -----

    pub fn outer_format(&self) -> OuterFormat {
        self.outer_format
    }

    pub fn file_format(&self) -> FileFormat {
        self.file_format
    }

    pub fn physical_format(&self) -> PhysicalFormat {
        self.physical_format
    }

    pub fn order(&self) -> SectorOrder {
        self.order
    }

    pub fn fs_order(&self) -> SectorOrder {
        self.fs_order
    }

    pub fn fs_format(&self) -> FsFormat {
        self.fs_format
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    pub fn sectors_per_track(&self) -> usize {
        self.sectors_per_track
    }

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    pub fn has_sectors(&self) -> bool {
        self.has_sectors
    }

    pub fn has_blocks(&self) -> bool {
        self.has_blocks
    }

    pub fn has_nibbles(&self) -> bool {
        self.has_nibbles
    }

    pub fn geometry(&self) -> DiskGeometry {
        DiskGeometry {
            num_tracks: self.num_tracks,
            sectors_per_track: self.sectors_per_track,
            num_blocks: self.num_blocks,
            has_sectors: self.has_sectors,
            has_blocks: self.has_blocks,
            has_nibbles: self.has_nibbles,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn is_expandable(&self) -> bool {
        self.expandable
    }

    pub fn dos_volume_number(&self) -> Option<u8> {
        self.dos_volume
    }

    pub fn bad_block_map(&self) -> &BTreeSet<u64> {
        &self.bad_blocks
    }

    /// Whether contents are best shown as blocks rather than sectors.
    pub fn shows_as_blocks(&self) -> bool {
        if !self.has_blocks {
            return false;
        }
        if self.fs_format == FsFormat::Unknown {
            return self.order == SectorOrder::ProDos;
        }
        self.fs_format.shows_as_blocks()
    }

    /// The wrapper's embedded volume/disk name, if the format has one.
    pub fn storage_name(&self) -> Option<String> {
        match self.wrapper.as_ref()? {
            ImageWrapper::DiskCopy42(w) => w.storage_name(),
            _ => None,
        }
    }

    /// The description of the active nibble profile.
    pub fn nibble_descr_name(&self) -> Option<&'static str> {
        self.active_nibble_descr().map(|d| d.description)
    }

    fn active_nibble_descr(&self) -> Option<&NibbleDescr> {
        self.nibble_descr.map(|idx| &self.nibble_table[idx])
    }

    /// Install a custom nibble profile, overwriting the reserved table
    /// slot, and select it.
    pub fn set_custom_nibble_descr(&mut self, descr: NibbleDescr) {
        if self.nibble_table.len() == STD_NIBBLE_DESCRS.len() {
            self.nibble_table.push(descr);
        } else {
            let last = self.nibble_table.len() - 1;
            self.nibble_table[last] = descr;
        }
        self.nibble_descr = Some(self.nibble_table.len() - 1);
        self.nibble_cache = None;
    }

    pub(crate) fn is_paired(&self) -> bool {
        self.pairing.is_some()
    }

    /// Enable sector pairing (OzDOS) before analysis.
    pub fn set_sector_pairing(&mut self, enable: bool, offset: usize) {
        if enable {
            debug_assert!(offset == 0 || offset == 1);
            self.pairing = Some(SectorPairing { offset });
        } else {
            self.pairing = None;
        }
    }

    // ----- notes -----

    pub fn add_note(&mut self, kind: NoteKind, text: &str) {
        log::debug!("add_note(): {:?}: {}", kind, text);
        self.notes.push(Note {
            kind,
            text: text.to_string(),
        });
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Render the notes the way the UI shows them.
    pub fn notes_text(&self) -> String {
        let mut out = String::new();
        for note in &self.notes {
            match note.kind {
                NoteKind::Warning => out.push_str("- WARNING: "),
                NoteKind::Info => out.push_str("- "),
            }
            out.push_str(&note.text);
            out.push('\n');
        }
        out
    }

    // ----- progress / cancellation -----

    /// Install a scan progress callback; sub-images inherit it.
    pub fn set_scan_progress(&mut self, callback: Option<ProgressFn>) {
        self.progress = callback;
        self.scan_count.set(0);
        self.scan_msg.borrow_mut().clear();
    }

    /// Report progress: a message at the start of a volume, None per
    /// item. Returns Cancelled when the callback declines to continue.
    pub fn update_scan_progress(&self, new_msg: Option<&str>) -> Result<(), DiskImageError> {
        let Some(callback) = self.progress.as_ref() else {
            return Ok(());
        };
        match new_msg {
            Some(msg) => {
                self.scan_count.set(0);
                *self.scan_msg.borrow_mut() = msg.to_string();
            }
            None => {
                self.scan_count.set(self.scan_count.get() + 1);
            }
        }
        if !callback(&self.scan_msg.borrow(), self.scan_count.get()) {
            return Err(DiskImageError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn check_cancel(&self) -> Result<(), DiskImageError> {
        self.update_scan_progress(None)
    }

    pub(crate) fn add_fs_ref(&self) {
        self.fs_refs.set(self.fs_refs.get() + 1);
    }

    pub(crate) fn release_fs_ref(&self) {
        self.fs_refs.set(self.fs_refs.get().saturating_sub(1));
    }

    // ----- sector/block I/O -----

    fn mark_dirty(&self) {
        self.dirty.set(true);
        for ancestor in &self.ancestor_dirty {
            ancestor.set(true);
        }
    }

    fn nibble_track_len(&self, track: usize) -> usize {
        self.wrapper
            .as_ref()
            .map(|w| w.nibble_track_len(self.physical_format, track))
            .unwrap_or(0)
    }

    fn nibble_track_offset(&self, track: usize) -> u64 {
        self.wrapper
            .as_ref()
            .map(|w| w.nibble_track_offset(self.physical_format, track))
            .unwrap_or(0)
    }

    /// Raw nibble track access; cached one track at a time.
    pub fn read_nibble_track(&mut self, track: usize) -> Result<Vec<u8>, DiskImageError> {
        if !self.physical_format.is_nibbles() {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if track >= self.num_tracks {
            return Err(DiskImageError::InvalidTrack);
        }
        if let Some(cache) = &self.nibble_cache {
            if cache.track == track {
                return Ok(cache.data.clone());
            }
        }

        let len = self.nibble_track_len(track);
        let offset = self.nibble_track_offset(track);
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .read_at(offset, &mut buf)?;
        }
        self.nibble_cache = Some(NibbleCache {
            track,
            data: buf.clone(),
        });
        Ok(buf)
    }

    /// Replace a whole raw nibble track.
    pub fn write_nibble_track(&mut self, track: usize, buf: &[u8]) -> Result<(), DiskImageError> {
        if !self.physical_format.is_nibbles() {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }
        if track >= self.num_tracks {
            return Err(DiskImageError::InvalidTrack);
        }
        if buf.len() != self.nibble_track_len(track) {
            return Err(DiskImageError::BadRawData);
        }
        let offset = self.nibble_track_offset(track);
        self.data
            .as_ref()
            .ok_or(DiskImageError::NotReady)?
            .borrow_mut()
            .write_at(offset, buf)?;
        self.nibble_cache = None;
        self.mark_dirty();
        Ok(())
    }

    /// Read a 256-byte sector, translating the filesystem ordering.
    pub fn read_track_sector(
        &mut self,
        track: usize,
        sector: usize,
    ) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
        self.read_track_sector_swapped(track, sector, self.order, self.fs_order)
    }

    pub fn read_track_sector_swapped(
        &mut self,
        track: usize,
        sector: usize,
        image_order: SectorOrder,
        fs_order: SectorOrder,
    ) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
        if !self.has_sectors {
            return Err(DiskImageError::UnsupportedAccess);
        }
        self.note_13sector_order(image_order, fs_order);
        self.read_sector_inner(
            track,
            sector,
            image_order,
            fs_order,
            self.num_tracks,
            self.sectors_per_track,
            self.pairing,
        )
    }

    /// Write a 256-byte sector.
    pub fn write_track_sector(
        &mut self,
        track: usize,
        sector: usize,
        buf: &[u8],
    ) -> Result<(), DiskImageError> {
        if !self.has_sectors {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }
        if buf.len() != SECTOR_SIZE {
            return Err(DiskImageError::InvalidArg);
        }

        let target = calc_sector_offset(
            track,
            sector,
            self.order,
            self.fs_order,
            self.num_tracks,
            self.sectors_per_track,
            self.pairing,
        )?;

        if self.physical_format.is_sectors() {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .write_at(target.offset, buf)?;
        } else {
            let descr = *self
                .active_nibble_descr()
                .ok_or(DiskImageError::BadNibbleSectors)?;
            let mut raw = self.read_nibble_track(track)?;
            let mut sector_buf = [0u8; SECTOR_SIZE];
            sector_buf.copy_from_slice(buf);
            nibble::write_sector(&mut raw, track, target.image_sector, &descr, &sector_buf)?;
            let offset = self.nibble_track_offset(track);
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .write_at(offset, &raw)?;
            // Cache is invalidated by any write to the track.
            self.nibble_cache = None;
        }
        self.mark_dirty();
        Ok(())
    }

    fn note_13sector_order(&mut self, image_order: SectorOrder, fs_order: SectorOrder) {
        if self.sectors_per_track == 13
            && image_order != fs_order
            && !self.noted_13sector_order
        {
            self.noted_13sector_order = true;
            self.notes.push(Note {
                kind: NoteKind::Info,
                text: "13-sector ordering conversion is not performed.".to_string(),
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read_sector_inner(
        &mut self,
        track: usize,
        sector: usize,
        image_order: SectorOrder,
        fs_order: SectorOrder,
        num_tracks: usize,
        sectors_per_track: usize,
        pairing: Option<SectorPairing>,
    ) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
        let target = calc_sector_offset(
            track,
            sector,
            image_order,
            fs_order,
            num_tracks,
            sectors_per_track,
            pairing,
        )?;

        let mut buf = [0u8; SECTOR_SIZE];
        if self.physical_format.is_sectors() {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .read_at(target.offset, &mut buf)?;
        } else {
            if image_order != SectorOrder::Physical {
                log::debug!(
                    "read_sector_inner(): nibble image order is {:?} (expected Physical)",
                    image_order
                );
            }
            let descr = *self
                .active_nibble_descr()
                .ok_or(DiskImageError::BadNibbleSectors)?;
            let raw = self.read_nibble_track(track)?;
            buf = nibble::read_sector(&raw, track, target.image_sector, &descr)?;
        }
        Ok(buf)
    }

    /// Probe-time sector read with explicit orderings.
    pub(crate) fn probe_read_sector(
        &mut self,
        track: usize,
        sector: usize,
        image_order: SectorOrder,
        fs_order: SectorOrder,
    ) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
        self.read_sector_inner(
            track,
            sector,
            image_order,
            fs_order,
            self.num_tracks,
            self.sectors_per_track,
            self.pairing,
        )
    }

    /// Probe-time sector read against a hypothetical geometry (used by
    /// the UNIDOS/OzDOS tests, which see the disk as wide tracks).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn probe_read_sector_geometry(
        &mut self,
        track: usize,
        sector: usize,
        image_order: SectorOrder,
        fs_order: SectorOrder,
        num_tracks: usize,
        sectors_per_track: usize,
        pairing: Option<SectorPairing>,
    ) -> Result<[u8; SECTOR_SIZE], DiskImageError> {
        self.read_sector_inner(
            track,
            sector,
            image_order,
            fs_order,
            num_tracks,
            sectors_per_track,
            pairing,
        )
    }

    fn check_bad_blocks(&self, start: u64, count: u64) -> bool {
        if self.bad_blocks.is_empty() {
            return false;
        }
        (start..start + count).any(|b| self.bad_blocks.contains(&b))
    }

    /// Read a 512-byte block.
    pub fn read_block(&mut self, block: u64) -> Result<[u8; BLOCK_SIZE], DiskImageError> {
        self.read_block_swapped(block, self.order, self.fs_order)
    }

    pub fn read_block_swapped(
        &mut self,
        block: u64,
        image_order: SectorOrder,
        fs_order: SectorOrder,
    ) -> Result<[u8; BLOCK_SIZE], DiskImageError> {
        if !self.has_blocks {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if block >= self.num_blocks {
            return Err(DiskImageError::InvalidBlock);
        }
        if self.check_bad_blocks(block, 1) {
            return Err(DiskImageError::ReadFailed);
        }

        let linear = self.physical_format.is_sectors()
            && self.pairing.is_none()
            && is_linear_blocks(image_order, fs_order);
        let mut buf = [0u8; BLOCK_SIZE];
        if self.has_sectors && !linear {
            // Run it through the t/s path so DOS ordering is handled.
            let spb = (self.sectors_per_track / 2) as u64;
            let track = (block / spb) as usize;
            let blk_in_track = (block % spb) as usize;
            let lo = self.read_sector_inner(
                track,
                blk_in_track * 2,
                image_order,
                fs_order,
                self.num_tracks,
                self.sectors_per_track,
                self.pairing,
            )?;
            let hi = self.read_sector_inner(
                track,
                blk_in_track * 2 + 1,
                image_order,
                fs_order,
                self.num_tracks,
                self.sectors_per_track,
                self.pairing,
            )?;
            buf[..SECTOR_SIZE].copy_from_slice(&lo);
            buf[SECTOR_SIZE..].copy_from_slice(&hi);
        } else {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .read_at(block * BLOCK_SIZE as u64, &mut buf)?;
        }
        Ok(buf)
    }

    pub(crate) fn probe_read_block(
        &mut self,
        block: u64,
        image_order: SectorOrder,
        fs_order: SectorOrder,
    ) -> Result<[u8; BLOCK_SIZE], DiskImageError> {
        if !self.has_blocks || block >= self.num_blocks {
            return Err(DiskImageError::InvalidBlock);
        }
        let saved = (self.order, self.fs_order);
        let result = self.read_block_swapped(block, image_order, fs_order);
        debug_assert_eq!(saved, (self.order, self.fs_order));
        result
    }

    /// Read a run of blocks. Uses one large linear read when the image
    /// ordering already matches the filesystem ordering.
    pub fn read_blocks(&mut self, start: u64, count: u64) -> Result<Vec<u8>, DiskImageError> {
        if !self.has_blocks {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if count == 0 || start + count > self.num_blocks {
            return Err(DiskImageError::InvalidArg);
        }
        if self.check_bad_blocks(start, count) {
            return Err(DiskImageError::ReadFailed);
        }

        if self.physical_format.is_sectors()
            && self.pairing.is_none()
            && is_linear_blocks(self.order, self.fs_order)
        {
            let mut buf = vec![0u8; (count as usize) * BLOCK_SIZE];
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .read_at(start * BLOCK_SIZE as u64, &mut buf)?;
            Ok(buf)
        } else {
            let mut buf = Vec::with_capacity((count as usize) * BLOCK_SIZE);
            for block in start..start + count {
                buf.extend_from_slice(&self.read_block(block)?);
            }
            Ok(buf)
        }
    }

    /// Write a 512-byte block. Atomicity is per block.
    pub fn write_block(&mut self, block: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        if !self.has_blocks {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if block >= self.num_blocks {
            return Err(DiskImageError::InvalidBlock);
        }
        if buf.len() != BLOCK_SIZE {
            return Err(DiskImageError::InvalidArg);
        }
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }

        let linear = self.physical_format.is_sectors()
            && self.pairing.is_none()
            && is_linear_blocks(self.order, self.fs_order);
        if self.has_sectors && !linear {
            let spb = (self.sectors_per_track / 2) as u64;
            let track = (block / spb) as usize;
            let blk_in_track = (block % spb) as usize;
            self.write_track_sector(track, blk_in_track * 2, &buf[..SECTOR_SIZE])?;
            self.write_track_sector(track, blk_in_track * 2 + 1, &buf[SECTOR_SIZE..])?;
        } else {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .write_at(block * BLOCK_SIZE as u64, buf)?;
            self.mark_dirty();
        }
        Ok(())
    }

    /// Write a run of blocks, linearly when possible.
    pub fn write_blocks(&mut self, start: u64, buf: &[u8]) -> Result<(), DiskImageError> {
        if !self.has_blocks {
            return Err(DiskImageError::UnsupportedAccess);
        }
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(DiskImageError::InvalidArg);
        }
        let count = (buf.len() / BLOCK_SIZE) as u64;
        if start + count > self.num_blocks {
            return Err(DiskImageError::InvalidArg);
        }
        if self.read_only {
            return Err(DiskImageError::AccessDenied);
        }

        if self.physical_format.is_sectors()
            && self.pairing.is_none()
            && is_linear_blocks(self.order, self.fs_order)
        {
            self.data
                .as_ref()
                .ok_or(DiskImageError::NotReady)?
                .borrow_mut()
                .write_at(start * BLOCK_SIZE as u64, buf)?;
            self.mark_dirty();
        } else {
            for (i, chunk) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
                self.write_block(start + i as u64, chunk)?;
            }
        }
        Ok(())
    }

    /// Zero every block, usually as a prelude to a high-level format.
    pub fn zero_image(&mut self) -> Result<(), DiskImageError> {
        let zero = [0u8; BLOCK_SIZE];
        if self.has_blocks {
            for block in 0..self.num_blocks {
                self.write_block(block, &zero)?;
                self.check_cancel()?;
            }
        } else if self.has_sectors {
            let zero_sector = [0u8; SECTOR_SIZE];
            for track in 0..self.num_tracks {
                for sector in 0..self.sectors_per_track {
                    self.write_track_sector(track, sector, &zero_sector)?;
                }
                self.check_cancel()?;
            }
        }
        Ok(())
    }

    // ----- sub-images -----

    fn new_child(&mut self, data: SourceHandle, length: u64) -> DiskImage {
        let mut child = DiskImage::empty();
        child.read_only = self.read_only; // very important
        child.file_format = FileFormat::Unadorned;
        child.physical_format = self.physical_format;
        child.order = self.order;
        child.fs_order = self.order;
        child.length = length;
        child.wrapped_length = length;
        child.data = Some(data);
        child.wrapper = Some(ImageWrapper::Unadorned(
            wrappers::unadorned::Unadorned::with_order(self.physical_format, self.order),
        ));
        child.progress = self.progress.clone();
        child.nibble_table = self.nibble_table.clone();
        child.nibble_descr = self.nibble_descr;

        // Dirty propagation: the child sets every ancestor's cell on
        // write; the family root clears the whole set on flush.
        child.ancestor_dirty = self.ancestor_dirty.clone();
        child.ancestor_dirty.push(self.dirty.clone());
        child.family_dirty = self.family_dirty.clone();
        self.family_dirty.borrow_mut().push(child.dirty.clone());
        child
    }

    /// Open a block range of this image as a child image, e.g. one
    /// partition of a partitioned device.
    pub fn open_sub_image(
        &mut self,
        first_block: u64,
        num_blocks: u64,
    ) -> Result<DiskImage, DiskImageError> {
        if num_blocks == 0 || first_block + num_blocks > self.num_blocks {
            return Err(DiskImageError::InvalidArg);
        }
        let data = self.data.clone().ok_or(DiskImageError::NotReady)?;
        let window = WindowSource::new(
            data,
            first_block * BLOCK_SIZE as u64,
            num_blocks * BLOCK_SIZE as u64,
        )?
        .into_handle();

        let mut child = self.new_child(window, num_blocks * BLOCK_SIZE as u64);
        child.analyze_image()?;
        Ok(child)
    }

    /// Open a track/sector range as a child image. The first sector of
    /// the range must start a track.
    pub fn open_sub_image_sectors(
        &mut self,
        first_track: usize,
        first_sector: usize,
        num_sectors: u64,
    ) -> Result<DiskImage, DiskImageError> {
        if first_sector != 0 {
            return Err(DiskImageError::InvalidArg);
        }
        let spt = self.sectors_per_track as u64;
        if spt == 0 || num_sectors == 0 {
            return Err(DiskImageError::InvalidArg);
        }
        let last_track = first_track as u64 + num_sectors.div_ceil(spt);
        if last_track > self.num_tracks as u64 {
            return Err(DiskImageError::InvalidArg);
        }

        let data = self.data.clone().ok_or(DiskImageError::NotReady)?;
        let window = WindowSource::new(
            data,
            (first_track as u64) * spt * SECTOR_SIZE as u64,
            num_sectors * SECTOR_SIZE as u64,
        )?
        .into_handle();

        let mut child = self.new_child(window, num_sectors * SECTOR_SIZE as u64);
        child.analyze_image()?;
        Ok(child)
    }

    /// Open one OzDOS half: the whole payload with sector pairing.
    pub fn open_sub_image_paired(&mut self, pair_offset: usize) -> Result<DiskImage, DiskImageError> {
        if pair_offset > 1 {
            return Err(DiskImageError::InvalidArg);
        }
        let data = self.data.clone().ok_or(DiskImageError::NotReady)?;
        let window = WindowSource::new(data, 0, self.length)?.into_handle();

        let mut child = self.new_child(window, self.length);
        child.set_sector_pairing(true, pair_offset);
        child.analyze_image()?;
        Ok(child)
    }

    // ----- override -----

    /// Override the format determined by the analyzer. The physical
    /// format cannot be changed, and the filesystem must actually be
    /// present (with leniency) for non-generic formats.
    pub fn override_format(
        &mut self,
        physical: PhysicalFormat,
        format: FsFormat,
        order: SectorOrder,
    ) -> Result<(), DiskImageError> {
        log::debug!(
            "override_format(): physical={:?} format={:?} order={:?}",
            physical,
            format,
            order
        );

        // Forcing a physical format change is not allowed.
        if physical != self.physical_format {
            return Err(DiskImageError::InvalidArg);
        }
        if physical == self.physical_format && format == self.fs_format && order == self.order {
            log::debug!("override_format(): matches existing, ignoring");
            return Ok(());
        }

        let (new_order, _new_format) = fs::probe_for_override(self, format, order)?;

        // If the probe came back with a different order, it didn't like
        // the requested one even with leniency granted.
        if new_order != order {
            return Err(DiskImageError::BadOrdering);
        }

        self.fs_format = format;
        self.order = new_order;
        self.fs_order = self.calc_fs_sector_order();
        log::debug!("override_format(): accepted");
        Ok(())
    }

    // ----- flush / close -----

    /// Flush payload changes down through the wrapper chain.
    pub fn flush(&mut self, mode: FlushMode) -> Result<(), DiskImageError> {
        log::debug!("flush(): dirty={} mode={:?}", self.dirty.get(), mode);
        if !self.dirty.get() {
            return Ok(());
        }
        let Some(data) = self.data.clone() else {
            // Creation failed before any data existed; nothing to flush.
            self.dirty.set(false);
            return Ok(());
        };

        if mode == FlushMode::FastOnly {
            let wrapper_slow = self
                .wrapper
                .as_ref()
                .is_some_and(|w| !w.has_fast_flush());
            let outer_slow = self.outer.as_ref().is_some_and(|o| !o.has_fast_flush());
            if wrapper_slow || outer_slow {
                log::debug!("flush(): fast flush requested but wrappers are slow");
                return Ok(());
            }
        }

        // Step 1: push payload changes into the image wrapper, which may
        // rebuild its header or recompress.
        if let Some(wrapper_src) = self.wrapper_src.clone() {
            if let Some(wrapper) = self.wrapper.as_mut() {
                self.wrapped_length = wrapper.flush(&wrapper_src, &data, self.length)?;
            }
            wrapper_src.borrow_mut().flush()?;
        }

        // Step 2: recompress into the outer wrapper. This is the slow
        // part, so it honors cancellation.
        if self.outer.is_some() {
            self.check_cancel()?;
        }
        if let (Some(outer), Some(outer_src), Some(wrapper_src)) = (
            self.outer.as_mut(),
            self.outer_src.clone(),
            self.wrapper_src.clone(),
        ) {
            outer.save(&outer_src, &wrapper_src, self.wrapped_length)?;
            outer_src.borrow_mut().flush()?;
        }

        self.dirty.set(false);
        if self.ancestor_dirty.is_empty() {
            // Root flush: everything under it went through this payload.
            for cell in self.family_dirty.borrow().iter() {
                cell.set(false);
            }
        }
        Ok(())
    }

    /// Flush and tear down. Filesystem drivers must be closed first.
    pub fn close(mut self) -> Result<(), DiskImageError> {
        if self.fs_refs.get() != 0 {
            log::error!("close(): {} filesystem refs still outstanding", self.fs_refs.get());
            return Err(DiskImageError::InvalidArg);
        }
        self.flush(FlushMode::All)?;

        // Tear down in reverse order of construction.
        self.nibble_cache = None;
        self.data = None;
        self.wrapper = None;
        self.wrapper_src = None;
        self.outer = None;
        self.outer_src = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_is_rejected() {
        let err = DiskImage::open_buffer(Vec::new(), false).unwrap_err();
        assert!(matches!(err, DiskImageError::UnrecognizedFileFmt));
    }

    #[test]
    fn create_validation_rejects_bad_combinations() {
        // NuFX under an outer wrapper
        let err = DiskImage::create_buffer(CreateParams {
            outer_format: OuterFormat::Gzip,
            file_format: FileFormat::NuFX,
            order: SectorOrder::ProDos,
            num_blocks: 1600,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, DiskImageError::InvalidCreateReq));

        // DiskCopy 4.2 that isn't 800K
        let err = DiskImage::create_buffer(CreateParams {
            file_format: FileFormat::DiskCopy42,
            order: SectorOrder::ProDos,
            num_blocks: 280,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, DiskImageError::InvalidCreateReq));

        // nibble images must be physical order
        let err = DiskImage::create_buffer(CreateParams {
            physical_format: PhysicalFormat::Nib525_6656,
            order: SectorOrder::Dos,
            fs_format: FsFormat::GenericDosOrd,
            num_tracks: 35,
            sectors_per_track: 16,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, DiskImageError::InvalidCreateReq));

        // non-generic filesystem at create time
        let err = DiskImage::create_buffer(CreateParams {
            fs_format: FsFormat::ProDos,
            num_blocks: 280,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, DiskImageError::InvalidCreateReq));
    }

    #[test]
    fn create_buffer_produces_blank_prodos_order_image() {
        let mut img = DiskImage::create_buffer(CreateParams {
            num_blocks: 280,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(img.num_blocks(), 280);
        assert!(img.has_blocks());
        assert!(img.has_sectors());
        let block = img.read_block(0).unwrap();
        assert!(block.iter().all(|&b| b == 0));
        // freshly created images start clean after the create flush
        assert!(!img.is_dirty());
        img.write_block(3, &[1u8; BLOCK_SIZE]).unwrap();
        assert!(img.is_dirty());
    }
}
