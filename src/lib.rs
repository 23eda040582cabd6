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
*/

//! NibFox is a library for reading and writing Apple II (and ///) disk
//! images. An image may be wrapped in outer compression (gzip, zip),
//! adorned with a format header (2MG, DiskCopy 4.2, Sim//e HDV, TrackStar,
//! FDI, NuFX, DDD), and its payload may be cooked 256-byte sectors in one
//! of several orderings or a raw GCR nibble stream. NibFox peels these
//! layers back and presents a uniform track/sector and 512-byte block view,
//! on top of which the filesystem drivers in [fs] enumerate files.

pub mod containers;
pub mod diskimage;
pub mod fs;
pub mod io;
pub mod physical;
pub mod source;
pub mod types;
pub(crate) mod util;
pub mod wrappers;

use thiserror::Error;

/// 256 bytes; the DOS 3.x allocation unit.
pub const SECTOR_SIZE: usize = 256;
/// 512 bytes; the ProDOS/HFS allocation unit.
pub const BLOCK_SIZE: usize = 512;

/// Track count of a standard 5.25" disk.
pub const TRACK_COUNT_525: usize = 35;

/// Length of one track in a standard 6656-byte nibble image.
pub const NIB_TRACK_LEN_6656: usize = 6656;
/// Length of one track in the older 6384-byte nibble variant.
pub const NIB_TRACK_LEN_6384: usize = 6384;

/// Exact length of a 13-sector (DOS 3.2) ".d13" image.
pub const D13_LENGTH: u64 = (TRACK_COUNT_525 * 13 * SECTOR_SIZE) as u64;

/// Default DOS volume number applied when low-level formatting a nibble
/// image without an explicit volume number.
pub const DEFAULT_NIBBLE_VOLUME_NUM: u8 = 254;

/// The set of errors returned by every NibFox operation. The taxonomy is
/// flat; errors bubble unchanged to the API boundary.
#[derive(Debug, Error)]
pub enum DiskImageError {
    // Access
    #[error("access denied")]
    AccessDenied,
    #[error("write protected")]
    WriteProtected,
    #[error("file already exists")]
    FileExists,
    #[error("file not found")]
    FileNotFound,
    #[error("file is already open and cannot be shared")]
    SharingViolation,
    #[error("device not ready")]
    DeviceNotReady,

    // Shape
    #[error("image size is wrong")]
    OddLength,
    #[error("not a recognized disk image format")]
    UnrecognizedFileFmt,
    #[error("image file contents aren't in expected format")]
    BadFileFormat,
    #[error("file format not supported")]
    UnsupportedFileFmt,
    #[error("physical format not supported")]
    UnsupportedPhysicalFmt,
    #[error("filesystem type not supported")]
    UnsupportedFsFmt,
    #[error("bad sector ordering")]
    BadOrdering,
    #[error("specified filesystem not found")]
    FilesystemNotFound,
    #[error("the method of access used isn't supported for this image")]
    UnsupportedAccess,
    #[error("image file uses features that NibFox doesn't support")]
    UnsupportedImageFeature,
    #[error("invalid disk image create request")]
    InvalidCreateReq,
    #[error("size is larger than we can handle")]
    TooBig,

    // I/O
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
    #[error("end of file reached")]
    Eof,
    #[error("generic disk image error")]
    Generic,

    // Addressing
    #[error("invalid track number")]
    InvalidTrack,
    #[error("invalid sector number")]
    InvalidSector,
    #[error("invalid block number")]
    InvalidBlock,
    #[error("invalid index number")]
    InvalidIndex,

    // Filesystem integrity
    #[error("disk directory structure has an infinite loop")]
    DirectoryLoop,
    #[error("file structure has an infinite loop")]
    FileLoop,
    #[error("the filesystem on this image appears damaged")]
    BadDiskImage,
    #[error("file structure appears damaged")]
    BadFile,
    #[error("a directory appears damaged")]
    BadDirectory,
    #[error("bad partition")]
    BadPartition,

    // Archive / compression
    #[error("this looks like a file archive, not a disk archive")]
    FileArchive,
    #[error("compression method not supported")]
    UnsupportedCompression,
    #[error("checksum doesn't match, data may be corrupted")]
    BadChecksum,
    #[error("the compressed data is corrupted")]
    BadCompressedData,
    #[error("archive may be damaged")]
    BadArchiveStruct,

    // Nibble
    #[error("couldn't read sectors from this image")]
    BadNibbleSectors,
    #[error("sector not readable")]
    SectorUnreadable,
    #[error("found invalid nibble image disk byte")]
    InvalidDiskByte,
    #[error("couldn't convert raw data to nibble data")]
    BadRawData,

    // Control
    #[error("cancelled by user")]
    Cancelled,
    #[error("an image is already open")]
    AlreadyOpen,
    #[error("object not ready")]
    NotReady,
    #[error("invalid argument")]
    InvalidArg,
    #[error("feature not supported")]
    NotSupported,
    #[error("memory allocation failure")]
    Malloc,
    #[error("internal error")]
    Internal,
}

impl From<std::io::Error> for DiskImageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => DiskImageError::FileNotFound,
            ErrorKind::PermissionDenied => DiskImageError::AccessDenied,
            ErrorKind::AlreadyExists => DiskImageError::FileExists,
            ErrorKind::UnexpectedEof => DiskImageError::Eof,
            ErrorKind::WriteZero => DiskImageError::WriteFailed,
            _ => DiskImageError::Generic,
        }
    }
}

pub use crate::{
    diskimage::{CreateParams, DiskImage, FlushMode, Note, NoteKind},
    physical::nibble::{NibbleDescr, NibbleEncoding, NibbleSpecial, StdNibbleDescr},
    types::{
        enums::{FileFormat, FsFormat, OuterFormat, PhysicalFormat, SectorOrder},
        geometry::DiskGeometry,
    },
};

pub mod prelude {
    pub use crate::{
        diskimage::{CreateParams, DiskImage, FlushMode, NoteKind},
        types::{
            enums::{FileFormat, FsFormat, OuterFormat, PhysicalFormat, SectorOrder},
            geometry::DiskGeometry,
        },
        DiskImageError, BLOCK_SIZE, SECTOR_SIZE,
    };
}
