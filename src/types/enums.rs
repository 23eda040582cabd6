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

    src/types/enums.rs

    The classification enums for the wrapper/physical/logical layers of a
    disk image. The filesystem-format tables (required ordering, block
    preference) live here so that adding a filesystem is a one-line change.
*/

use std::fmt::{Display, Formatter};

use strum::EnumIter;

/// Optional outermost compression around the whole image file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OuterFormat {
    #[default]
    None,
    Gzip,
    Zip,
}

impl Display for OuterFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            OuterFormat::None => "(none)",
            OuterFormat::Gzip => "gzip",
            OuterFormat::Zip => "Zip archive",
        };
        write!(f, "{}", str)
    }
}

/// The adorned container format around the unadorned payload.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FileFormat {
    /// No header; the payload is the whole file.
    #[default]
    Unadorned,
    /// 64-byte "2IMG" header.
    TwoMG,
    /// DiskCopy 4.2, big-endian 84-byte header with checksums.
    DiskCopy42,
    /// Sim //e virtual hard drive.
    Sim2eHDV,
    /// TrackStar per-track nibble container (.app).
    TrackStar,
    /// Formatted Disk Image; raw bit recordings, read-only.
    FDI,
    /// NuFX (ShrinkIt) archive holding a single disk image thread.
    NuFX,
    /// Dalton's Disk Disintegrator compressed image.
    DDD,
}

impl FileFormat {
    /// File extensions conventionally associated with this format, used
    /// for the extension-first pass of open.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileFormat::Unadorned => &["do", "po", "d13", "dc6", "hdv", "img", "nib", "raw", "iso"],
            FileFormat::TwoMG => &["2mg", "2img"],
            FileFormat::DiskCopy42 => &["dsk", "dc"],
            FileFormat::Sim2eHDV => &["hdv"],
            FileFormat::TrackStar => &["app"],
            FileFormat::FDI => &["fdi"],
            FileFormat::NuFX => &["shk", "sdk", "bxy"],
            FileFormat::DDD => &["ddd"],
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            FileFormat::Unadorned => "Unadorned raw data",
            FileFormat::TwoMG => "2MG",
            FileFormat::DiskCopy42 => "DiskCopy 4.2",
            FileFormat::Sim2eHDV => "Sim //e HDV",
            FileFormat::TrackStar => "TrackStar image",
            FileFormat::FDI => "FDI image",
            FileFormat::NuFX => "NuFX (ShrinkIt)",
            FileFormat::DDD => "DDD",
        };
        write!(f, "{}", str)
    }
}

/// How the unadorned payload encodes the disk surface.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PhysicalFormat {
    /// Cooked 256-byte sectors in some ordering.
    #[default]
    Sectors,
    /// 5.25" GCR nibbles, 6656 bytes per track.
    Nib525_6656,
    /// 5.25" GCR nibbles, 6384 bytes per track.
    Nib525_6384,
    /// 5.25" GCR nibbles with per-track variable length.
    Nib525Var,
}

impl PhysicalFormat {
    pub fn is_sectors(&self) -> bool {
        matches!(self, PhysicalFormat::Sectors)
    }

    pub fn is_nibbles(&self) -> bool {
        !self.is_sectors()
    }
}

impl Display for PhysicalFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            PhysicalFormat::Sectors => "Sectors",
            PhysicalFormat::Nib525_6656 => "Raw nibbles (6656-byte)",
            PhysicalFormat::Nib525_6384 => "Raw nibbles (6384-byte)",
            PhysicalFormat::Nib525Var => "Raw nibbles (variable len)",
        };
        write!(f, "{}", str)
    }
}

/// The permutation between a filesystem's logical sector numbers and the
/// index at which each sector sits within a 16-sector track of the
/// payload.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, EnumIter)]
pub enum SectorOrder {
    #[default]
    Unknown,
    /// Copy ][+ "physical" order; the identity permutation.
    Physical,
    /// DOS 3.3 skewed order (.do).
    Dos,
    /// ProDOS block order (.po).
    ProDos,
    /// CP/M order.
    Cpm,
}

impl Display for SectorOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            SectorOrder::Unknown => "Unknown ordering",
            SectorOrder::Physical => "Physical sector ordering",
            SectorOrder::Dos => "DOS sector ordering",
            SectorOrder::ProDos => "ProDOS block ordering",
            SectorOrder::Cpm => "CP/M block ordering",
        };
        write!(f, "{}", str)
    }
}

/// The filesystem (or partition scheme) found on the image.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FsFormat {
    #[default]
    Unknown,
    Dos33,
    Dos32,
    ProDos,
    Pascal,
    MacHFS,
    Cpm,
    MsDos,
    Rdos33,
    Rdos32,
    Rdos3,
    UniDos,
    OzDos,
    Cffa4,
    Cffa8,
    MacPart,
    MicroDrive,
    FocusDrive,
    GenericPhysicalOrd,
    GenericDosOrd,
    GenericProDosOrd,
    GenericCpmOrd,
}

impl FsFormat {
    /// The canonical sector ordering each filesystem expects its logical
    /// sectors to be addressed in. `None` for Unknown.
    pub fn required_order(&self) -> Option<SectorOrder> {
        match self {
            FsFormat::Unknown => None,

            FsFormat::GenericPhysicalOrd | FsFormat::Rdos32 | FsFormat::Rdos3 => {
                Some(SectorOrder::Physical)
            }

            FsFormat::GenericDosOrd
            | FsFormat::Dos33
            | FsFormat::Dos32
            | FsFormat::UniDos
            | FsFormat::OzDos => Some(SectorOrder::Dos),

            FsFormat::GenericCpmOrd | FsFormat::Cpm => Some(SectorOrder::Cpm),

            FsFormat::GenericProDosOrd
            | FsFormat::ProDos
            | FsFormat::Rdos33
            | FsFormat::Pascal
            | FsFormat::MacHFS
            | FsFormat::MsDos
            | FsFormat::Cffa4
            | FsFormat::Cffa8
            | FsFormat::MacPart
            | FsFormat::MicroDrive
            | FsFormat::FocusDrive => Some(SectorOrder::ProDos),
        }
    }

    /// Whether image contents for this filesystem are best presented as
    /// 512-byte blocks rather than 256-byte sectors.
    pub fn shows_as_blocks(&self) -> bool {
        match self {
            FsFormat::Unknown
            | FsFormat::GenericPhysicalOrd
            | FsFormat::GenericDosOrd
            | FsFormat::Dos33
            | FsFormat::Dos32
            | FsFormat::Rdos3
            | FsFormat::Rdos33
            | FsFormat::Rdos32
            | FsFormat::UniDos
            | FsFormat::OzDos => false,

            FsFormat::GenericProDosOrd
            | FsFormat::GenericCpmOrd
            | FsFormat::ProDos
            | FsFormat::Pascal
            | FsFormat::MacHFS
            | FsFormat::Cpm
            | FsFormat::MsDos
            | FsFormat::Cffa4
            | FsFormat::Cffa8
            | FsFormat::MacPart
            | FsFormat::MicroDrive
            | FsFormat::FocusDrive => true,
        }
    }

    /// True for the "generic" placeholder formats that carry an ordering
    /// but no filesystem structure. Only these may be requested at image
    /// create time.
    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            FsFormat::GenericPhysicalOrd
                | FsFormat::GenericDosOrd
                | FsFormat::GenericProDosOrd
                | FsFormat::GenericCpmOrd
        )
    }

    /// True for partition schemes that expose sub-volumes rather than
    /// files.
    pub fn is_partitioned(&self) -> bool {
        matches!(
            self,
            FsFormat::UniDos
                | FsFormat::OzDos
                | FsFormat::Cffa4
                | FsFormat::Cffa8
                | FsFormat::MacPart
                | FsFormat::MicroDrive
                | FsFormat::FocusDrive
        )
    }
}

impl Display for FsFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            FsFormat::Unknown => "Unknown",
            FsFormat::Dos33 => "DOS 3.3",
            FsFormat::Dos32 => "DOS 3.2",
            FsFormat::ProDos => "ProDOS",
            FsFormat::Pascal => "Pascal",
            FsFormat::MacHFS => "HFS",
            FsFormat::Cpm => "CP/M",
            FsFormat::MsDos => "MS-DOS FAT",
            FsFormat::Rdos33 => "RDOS 3.3 (16-sector)",
            FsFormat::Rdos32 => "RDOS 3.2 (13-sector)",
            FsFormat::Rdos3 => "RDOS 3 (cracked 13-sector)",
            FsFormat::UniDos => "UNIDOS (400K DOS x2)",
            FsFormat::OzDos => "OzDOS (400K DOS x2)",
            FsFormat::Cffa4 => "CFFA (4 or 6 partitions)",
            FsFormat::Cffa8 => "CFFA (8 partitions)",
            FsFormat::MacPart => "Macintosh partitioned disk",
            FsFormat::MicroDrive => "MicroDrive partitioned disk",
            FsFormat::FocusDrive => "FocusDrive partitioned disk",
            FsFormat::GenericPhysicalOrd => "Generic raw sectors",
            FsFormat::GenericDosOrd => "Generic DOS sectors",
            FsFormat::GenericProDosOrd => "Generic ProDOS blocks",
            FsFormat::GenericCpmOrd => "Generic CP/M blocks",
        };
        write!(f, "{}", str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_order_matches_family() {
        assert_eq!(FsFormat::Dos33.required_order(), Some(SectorOrder::Dos));
        assert_eq!(FsFormat::ProDos.required_order(), Some(SectorOrder::ProDos));
        assert_eq!(FsFormat::Rdos33.required_order(), Some(SectorOrder::ProDos));
        assert_eq!(FsFormat::Rdos32.required_order(), Some(SectorOrder::Physical));
        assert_eq!(FsFormat::Cpm.required_order(), Some(SectorOrder::Cpm));
        assert_eq!(FsFormat::Unknown.required_order(), None);
    }

    #[test]
    fn block_preference() {
        assert!(FsFormat::ProDos.shows_as_blocks());
        assert!(FsFormat::MacHFS.shows_as_blocks());
        assert!(!FsFormat::Dos33.shows_as_blocks());
        assert!(!FsFormat::UniDos.shows_as_blocks());
    }
}
