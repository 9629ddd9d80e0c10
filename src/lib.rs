/*!
# a2disk

A Rust library for reading and writing Apple II disk images, with ProDOS,
DOS 3.3 and UCSD Pascal filesystems and a NuFX (ShrinkIt) archive reader.

## Features

- Read and write `.do`, `.po`, `.dsk`, `.2mg` and `.hdv` images
- DOS / ProDOS sector order translation in a single block store
- ProDOS: create, write, delete, rename, move, retype and lock files and directories
- DOS 3.3: full catalog and VTOC management
- UCSD Pascal: read-only volumes
- NuFX: read `.shk`, `.sdk`, `.bxy` and `.bny` archives, including LZW/1, LZW/2 and squeeze
- Every mutation is staged and committed at once, so a failed operation leaves the volume untouched

## Quick Start

```rust,no_run
use a2disk::{DiskImage, FileSystem, ImageSpec, Volume};

// Open an existing image and detect its filesystem
let mut volume = Volume::open_path("games.po")?;
let root = volume.root();
for entry in volume.list(&root)? {
    println!("{:<16} {:>4} {:>6}", entry.name, entry.type_name(), entry.size_bytes);
}

// Read a file
let hello = volume.lookup("HELLO")?;
let contents = volume.read_file(&hello)?;

// Write a new file and save
volume.create_file(&root, "COPY", 0x06, 0x2000, &contents)?;
volume.save("games.po")?;

// Create a new blank DOS 3.3 disk
let blank = DiskImage::create(ImageSpec::dos33_140k())?;
let dos = Volume::open(blank)?;
println!("{}", dos.info()?.volume_name);
# Ok::<(), a2disk::DiskError>(())
```

## Modules

- `format`: container detection, 2IMG header and image presets
- `image`: disk images, the block store and sector interleave
- `filesystem`: ProDOS, DOS 3.3 and UCSD Pascal engines
- `nufx`: NuFX archive reader and decompressors
- `volume`: filesystem detection and the shared volume handle
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Error types and Result alias
pub mod error;
/// Filesystem implementations (ProDOS, DOS 3.3, UCSD Pascal)
pub mod filesystem;
/// File type names and cross-filesystem type mapping
pub mod filetypes;
/// Container formats, detection and image presets
pub mod format;
/// Disk images and the block store
pub mod image;
/// I/O operations for reading and writing image and archive files
pub mod io;
/// Block usage map visualization
pub mod map;
/// NuFX (ShrinkIt) archive reader
pub mod nufx;
/// Filesystem detection and the volume facade
pub mod volume;

// Re-export common types
pub use error::{DiskError, Result};
pub use filesystem::{
    DirectoryEntry, Dos33FileSystem, DosFileType, EntryLocation, FileSystem, FileSystemInfo,
    FileSystemType, PascalFileSystem, ProDosFileSystem, StorageType,
};
pub use format::{ArchiveKind, ContainerKind, ImageSpec, SectorOrder, TwoImgHeader};
pub use image::{BlockSize, BlockStore, DiskImage, DiskImageBuilder};
pub use nufx::{NufxArchive, Record, Thread, ThreadFormat};
pub use volume::{SharedVolume, Volume};
