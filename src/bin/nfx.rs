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

    src/bin/nfx.rs

    Command-line front end for the NibFox engine.

    Exit codes: 0 success, 1 usage error, 2 cannot open, 3 filesystem
    unrecognized, 4 I/O error, 5 cancelled.
*/

use std::{path::PathBuf, process::ExitCode, str::FromStr};

use bpaf::*;

use nibfox::{
    fs::{format_image, DiskFs},
    prelude::*,
    DiskImageError,
};

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_CANT_OPEN: u8 = 2;
const EXIT_NO_FILESYSTEM: u8 = 3;
const EXIT_IO: u8 = 4;
const EXIT_CANCELLED: u8 = 5;

#[derive(Clone, Debug)]
enum Command {
    Info {
        path: PathBuf,
        volume: bool,
    },
    List {
        path: PathBuf,
    },
    Extract {
        path: PathBuf,
        pattern: String,
        dest: PathBuf,
    },
    DumpSector {
        path: PathBuf,
        track: usize,
        sector: usize,
    },
    Format {
        path: PathBuf,
        fs: FsArg,
        volname: String,
    },
    Create {
        path: PathBuf,
        size: String,
    },
}

#[derive(Copy, Clone, Debug)]
struct FsArg(FsFormat);

impl FromStr for FsArg {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "dos" | "dos33" => Ok(FsArg(FsFormat::Dos33)),
            "prodos" => Ok(FsArg(FsFormat::ProDos)),
            _ => Err("expected 'dos33' or 'prodos'"),
        }
    }
}

fn path_parser() -> impl Parser<PathBuf> {
    positional::<PathBuf>("IMAGE").help("Path to a disk image")
}

fn command_parser() -> OptionParser<Command> {
    let volume = long("volume")
        .help("Treat IMAGE as a raw volume/device rather than a file")
        .switch();
    let info = construct!(Command::Info {
        path(path_parser()),
        volume,
    })
    .to_options()
    .descr("Describe an image's layers, geometry and filesystem")
    .command("info");

    let list = construct!(Command::List {
        path(path_parser()),
    })
    .to_options()
    .descr("List the files or partitions on an image")
    .command("list");

    let extract = {
        let pattern = positional::<String>("PATTERN").help("File name or * for everything");
        let dest = positional::<PathBuf>("DEST").help("Destination directory");
        construct!(Command::Extract {
            path(path_parser()),
            pattern,
            dest,
        })
        .to_options()
        .descr("Extract matching files into a directory")
        .command("extract")
    };

    let dump_sector = {
        let track = positional::<usize>("TRACK");
        let sector = positional::<usize>("SECTOR");
        construct!(Command::DumpSector {
            path(path_parser()),
            track,
            sector,
        })
        .to_options()
        .descr("Hex dump one 256-byte sector")
        .command("dump-sector")
    };

    let format = {
        let fs = positional::<FsArg>("FS").help("Filesystem: dos33 or prodos");
        let volname = positional::<String>("VOLNAME").help("Volume name");
        construct!(Command::Format {
            path(path_parser()),
            fs,
            volname,
        })
        .to_options()
        .descr("Zero an image and write an empty filesystem")
        .command("format")
    };

    let create = {
        let size = positional::<String>("SIZE").help("140k, 800k, or a block count like 1600b");
        construct!(Command::Create {
            path(path_parser()),
            size,
        })
        .to_options()
        .descr("Create a blank ProDOS-order image file")
        .command("create")
    };

    construct!([info, list, extract, dump_sector, format, create])
        .to_options()
        .descr("NibFox: inspect and modify Apple II disk images")
}

fn error_exit(err: &DiskImageError) -> u8 {
    match err {
        DiskImageError::Cancelled => EXIT_CANCELLED,
        DiskImageError::FilesystemNotFound | DiskImageError::UnsupportedFsFmt => {
            EXIT_NO_FILESYSTEM
        }
        DiskImageError::ReadFailed
        | DiskImageError::WriteFailed
        | DiskImageError::Eof
        | DiskImageError::AccessDenied => EXIT_IO,
        _ => EXIT_CANT_OPEN,
    }
}

fn open(path: &PathBuf, volume: bool, read_only: bool) -> Result<DiskImage, DiskImageError> {
    if volume {
        DiskImage::open_volume(path, read_only)
    } else {
        DiskImage::open_file(path, read_only)
    }
}

fn cmd_info(path: &PathBuf, volume: bool) -> Result<(), DiskImageError> {
    let mut img = open(path, volume, true)?;

    println!("File:             {}", path.display());
    println!("Outer format:     {}", img.outer_format());
    println!("File format:      {}", img.file_format());
    println!("Physical format:  {}", img.physical_format());
    if let Some(name) = img.nibble_descr_name() {
        println!("Nibble profile:   {}", name);
    }
    println!("Sector order:     {}", img.order());
    println!("Filesystem:       {}", img.fs_format());
    println!("Geometry:         {}", img.geometry());
    if let Some(vol) = img.dos_volume_number() {
        println!("DOS volume:       {}", vol);
    }
    if let Some(name) = img.storage_name() {
        println!("Storage name:     {}", name);
    }
    if img.fs_format() == FsFormat::MacHFS {
        if let Ok(info) = nibfox::fs::hfs::volume_info(&mut img) {
            println!(
                "HFS volume:       {} ({} files, {} dirs)",
                info.volume_name, info.num_files, info.num_dirs
            );
        }
    }
    println!("Read only:        {}", img.is_read_only());
    let notes = img.notes_text();
    if !notes.is_empty() {
        print!("{}", notes);
    }
    img.close()
}

fn cmd_list(path: &PathBuf) -> Result<(), DiskImageError> {
    let mut img = open(path, false, true)?;
    let fs = DiskFs::open(&mut img)?;

    if let Some(name) = fs.volume_name() {
        println!("{}", name);
    }
    for entry in fs.list(&mut img)? {
        println!(
            "{} {:4} {:>8}  {}",
            if entry.locked { "*" } else { " " },
            entry.kind,
            entry.size,
            entry.name
        );
    }
    fs.close(&mut img);
    img.close()
}

fn cmd_extract(path: &PathBuf, pattern: &str, dest: &PathBuf) -> Result<(), DiskImageError> {
    let mut img = open(path, false, true)?;
    let fs = DiskFs::open(&mut img)?;

    std::fs::create_dir_all(dest).map_err(|_| DiskImageError::WriteFailed)?;

    let mut matched = 0;
    for entry in fs.list(&mut img)? {
        if pattern != "*" && entry.name != pattern {
            continue;
        }
        let data = fs.read_file(&mut img, &entry)?;
        let safe_name: String = entry
            .name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        std::fs::write(dest.join(&safe_name), &data).map_err(|_| DiskImageError::WriteFailed)?;
        println!("extracted {} ({} bytes)", entry.name, data.len());
        matched += 1;
    }
    if matched == 0 {
        eprintln!("no files matched '{}'", pattern);
    }
    fs.close(&mut img);
    img.close()
}

fn cmd_dump_sector(path: &PathBuf, track: usize, sector: usize) -> Result<(), DiskImageError> {
    let mut img = open(path, false, true)?;
    let data = img.read_track_sector(track, sector)?;

    for (row, chunk) in data.chunks(16).enumerate() {
        print!("{:04x}:", row * 16);
        for byte in chunk {
            print!(" {:02x}", byte);
        }
        print!("  ");
        for byte in chunk {
            let c = byte & 0x7f;
            print!(
                "{}",
                if (0x20..0x7f).contains(&c) {
                    c as char
                } else {
                    '.'
                }
            );
        }
        println!();
    }
    img.close()
}

fn cmd_format(path: &PathBuf, fs: FsFormat, volname: &str) -> Result<(), DiskImageError> {
    let mut img = open(path, false, false)?;

    // Re-skew to the target filesystem's ordering before writing its
    // structures, whatever was on the disk before.
    let generic = match fs {
        FsFormat::Dos33 => FsFormat::GenericDosOrd,
        _ => FsFormat::GenericProDosOrd,
    };
    img.override_format(img.physical_format(), generic, img.order())?;
    img.zero_image()?;
    format_image(&mut img, fs, volname)?;
    img.override_format(img.physical_format(), fs, img.order())?;
    println!("formatted {} as {}", path.display(), fs);
    img.close()
}

fn cmd_create(path: &PathBuf, size: &str) -> Result<(), DiskImageError> {
    let lower = size.to_lowercase();
    let (num_blocks, order, fs_format) = match lower.as_str() {
        "140k" => (280, SectorOrder::Dos, FsFormat::GenericDosOrd),
        "800k" => (1600, SectorOrder::ProDos, FsFormat::GenericProDosOrd),
        other => {
            let blocks = other
                .strip_suffix('b')
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or(DiskImageError::InvalidArg)?;
            (blocks, SectorOrder::ProDos, FsFormat::GenericProDosOrd)
        }
    };

    let img = DiskImage::create(
        path,
        CreateParams {
            order,
            fs_format,
            num_blocks,
            ..Default::default()
        },
    )?;
    println!("created {} ({} blocks)", path.display(), num_blocks);
    img.close()
}

fn main() -> ExitCode {
    env_logger::init();

    let command = command_parser().run();

    let result = match &command {
        Command::Info { path, volume } => cmd_info(path, *volume),
        Command::List { path } => cmd_list(path),
        Command::Extract {
            path,
            pattern,
            dest,
        } => cmd_extract(path, pattern, dest),
        Command::DumpSector {
            path,
            track,
            sector,
        } => cmd_dump_sector(path, *track, *sector),
        Command::Format { path, fs, volname } => cmd_format(path, fs.0, volname),
        Command::Create { path, size } => cmd_create(path, size),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(DiskImageError::InvalidArg) => {
            eprintln!("error: invalid argument");
            ExitCode::from(EXIT_USAGE)
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(error_exit(&err))
        }
    }
}
