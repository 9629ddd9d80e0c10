/// Filesystem implementations

pub mod dos33;
pub mod pascal;
pub mod prodos;

pub use dos33::Dos33FileSystem;
pub use pascal::PascalFileSystem;
pub use prodos::ProDosFileSystem;

use crate::error::{DiskError, Result};
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

/// Filesystem families understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSystemType {
    /// ProDOS / SOS hierarchical filesystem
    ProDos,
    /// DOS 3.3 sector-chain filesystem
    Dos33,
    /// UCSD Pascal contiguous filesystem
    Pascal,
    /// NuFX (ShrinkIt) archive
    Nufx,
}

impl fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileSystemType::ProDos => "ProDOS",
            FileSystemType::Dos33 => "DOS 3.3",
            FileSystemType::Pascal => "UCSD Pascal",
            FileSystemType::Nufx => "NuFX",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FileSystemType {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prodos" => Ok(FileSystemType::ProDos),
            "dos" | "dos33" | "dos3.3" => Ok(FileSystemType::Dos33),
            "pascal" | "ucsd" => Ok(FileSystemType::Pascal),
            "nufx" | "shk" | "shrinkit" => Ok(FileSystemType::Nufx),
            _ => Err(DiskError::unsupported(format!("filesystem '{}'", s))),
        }
    }
}

/// How a file's blocks are chained together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// ProDOS single data block
    Seedling,
    /// ProDOS index block of data blocks
    Sapling,
    /// ProDOS master index of index blocks
    Tree,
    /// ProDOS file with data and resource forks
    Extended,
    /// Directory
    Directory,
    /// DOS 3.3 track/sector list chain
    TrackSectorList,
    /// UCSD Pascal contiguous extent
    Contiguous,
    /// Record inside an archive
    Archived,
}

impl StorageType {
    /// Short display name
    pub fn name(&self) -> &'static str {
        match self {
            StorageType::Seedling => "seedling",
            StorageType::Sapling => "sapling",
            StorageType::Tree => "tree",
            StorageType::Extended => "extended",
            StorageType::Directory => "directory",
            StorageType::TrackSectorList => "ts-list",
            StorageType::Contiguous => "contiguous",
            StorageType::Archived => "archived",
        }
    }
}

/// DOS 3.3 native file type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosFileType {
    /// T: text
    Text,
    /// I: Integer BASIC
    Integer,
    /// A: Applesoft BASIC
    Applesoft,
    /// B: binary
    Binary,
    /// S: special
    S,
    /// R: relocatable
    Relocatable,
    /// new A
    A,
    /// new B
    B,
}

impl DosFileType {
    /// Decode a catalog type byte (lock bit ignored)
    pub fn from_code(code: u8) -> Self {
        match code & 0x7F {
            0x00 => DosFileType::Text,
            c if c & 0x40 != 0 => DosFileType::B,
            c if c & 0x20 != 0 => DosFileType::A,
            c if c & 0x10 != 0 => DosFileType::Relocatable,
            c if c & 0x08 != 0 => DosFileType::S,
            c if c & 0x04 != 0 => DosFileType::Binary,
            c if c & 0x02 != 0 => DosFileType::Applesoft,
            _ => DosFileType::Integer,
        }
    }

    /// Catalog type byte (without lock bit)
    pub fn code(&self) -> u8 {
        match self {
            DosFileType::Text => 0x00,
            DosFileType::Integer => 0x01,
            DosFileType::Applesoft => 0x02,
            DosFileType::Binary => 0x04,
            DosFileType::S => 0x08,
            DosFileType::Relocatable => 0x10,
            DosFileType::A => 0x20,
            DosFileType::B => 0x40,
        }
    }

    /// Catalog letter
    pub fn letter(&self) -> char {
        match self {
            DosFileType::Text => 'T',
            DosFileType::Integer => 'I',
            DosFileType::Applesoft | DosFileType::A => 'A',
            DosFileType::Binary | DosFileType::B => 'B',
            DosFileType::S => 'S',
            DosFileType::Relocatable => 'R',
        }
    }
}

/// Where a directory entry lives, used to find it again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    /// Key block (or catalog head sector) of the containing directory
    pub dir_key: u32,
    /// Block (or sector) holding the entry
    pub block: u32,
    /// Entry index within that block
    pub slot: u16,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// Filename as stored (DOS names are trimmed of padding)
    pub name: String,
    /// Entry is a directory
    pub is_directory: bool,
    /// ProDOS file type code (DOS types are mapped to their ProDOS equivalent)
    pub file_type: u8,
    /// ProDOS auxiliary type (DOS binary files report their load address)
    pub aux_type: u16,
    /// Length in bytes
    pub size_bytes: u64,
    /// Blocks or sectors used, including index blocks
    pub blocks_used: u32,
    /// Storage organisation
    pub storage: StorageType,
    /// Native DOS 3.3 type
    pub dos_type: Option<DosFileType>,
    /// Creation timestamp
    pub created_at: Option<NaiveDateTime>,
    /// Modification timestamp
    pub modified_at: Option<NaiveDateTime>,
    /// Key block, TS-list sector, start block or archive record index
    pub first_block: u32,
    /// Entry is locked against modification
    pub locked: bool,
    /// Position of the entry in its directory
    pub location: Option<EntryLocation>,
}

impl DirectoryEntry {
    /// Display name of the file type
    pub fn type_name(&self) -> String {
        match self.dos_type {
            Some(dos) => dos.letter().to_string(),
            None => crate::filetypes::type_name(self.file_type),
        }
    }
}

/// Filesystem information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Filesystem type
    pub fs_type: FileSystemType,
    /// Volume name or label
    pub volume_name: String,
    /// Total allocation units on the volume
    pub total_blocks: u32,
    /// Free allocation units
    pub free_blocks: u32,
    /// Allocation unit size in bytes
    pub block_size: usize,
}

impl FileSystemInfo {
    /// Free space in bytes
    pub fn free_bytes(&self) -> usize {
        self.free_blocks as usize * self.block_size
    }

    /// Used space in bytes
    pub fn used_bytes(&self) -> usize {
        (self.total_blocks - self.free_blocks.min(self.total_blocks)) as usize * self.block_size
    }
}

/// Shared capability set of the filesystem engines
///
/// Mutators default to [`DiskError::UnsupportedOperation`] so read-only
/// engines only implement the read side.
pub trait FileSystem {
    /// Filesystem type
    fn fs_type(&self) -> FileSystemType;

    /// Entry describing the root directory
    fn root(&self) -> DirectoryEntry;

    /// List a directory
    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>>;

    /// Read a file's data
    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>>;

    /// Read a file's resource fork (empty when there is none)
    fn read_resource_fork(&self, _entry: &DirectoryEntry) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Get filesystem information
    fn info(&self) -> Result<FileSystemInfo>;

    /// Per-unit used map, indexed by block or sector
    fn usage(&self) -> Result<Vec<bool>>;

    /// Find an entry by slash-separated path from the root
    fn lookup(&self, path: &str) -> Result<DirectoryEntry> {
        let mut current = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_directory {
                return Err(DiskError::NotADirectory(current.name));
            }
            current = self
                .list(&current)?
                .into_iter()
                .find(|e| e.name.eq_ignore_ascii_case(part))
                .ok_or_else(|| DiskError::FileNotFound(part.to_string()))?;
        }
        Ok(current)
    }

    /// Create a file holding `data`
    fn create_file(
        &mut self,
        _dir: &DirectoryEntry,
        _name: &str,
        _file_type: u8,
        _aux_type: u16,
        _data: &[u8],
    ) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("create_file on {}", self.fs_type())))
    }

    /// Create an empty directory
    fn create_directory(&mut self, _dir: &DirectoryEntry, _name: &str) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("create_directory on {}", self.fs_type())))
    }

    /// Replace a file's contents
    fn write_file(&mut self, _entry: &DirectoryEntry, _data: &[u8]) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("write_file on {}", self.fs_type())))
    }

    /// Delete an entry; directories need `recursive` unless empty
    fn delete(&mut self, _entry: &DirectoryEntry, _recursive: bool) -> Result<()> {
        Err(DiskError::unsupported(format!("delete on {}", self.fs_type())))
    }

    /// Rename an entry in place
    fn rename(&mut self, _entry: &DirectoryEntry, _new_name: &str) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("rename on {}", self.fs_type())))
    }

    /// Move an entry into another directory
    fn move_entry(
        &mut self,
        _entry: &DirectoryEntry,
        _new_dir: &DirectoryEntry,
    ) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("move on {}", self.fs_type())))
    }

    /// Rewrite file type and aux type
    fn change_type(
        &mut self,
        _entry: &DirectoryEntry,
        _file_type: u8,
        _aux_type: u16,
    ) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("change_type on {}", self.fs_type())))
    }

    /// Lock or unlock an entry
    fn set_locked(&mut self, _entry: &DirectoryEntry, _locked: bool) -> Result<DirectoryEntry> {
        Err(DiskError::unsupported(format!("set_locked on {}", self.fs_type())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_type_parse() {
        assert_eq!("ProDOS".parse::<FileSystemType>().unwrap(), FileSystemType::ProDos);
        assert_eq!("dos33".parse::<FileSystemType>().unwrap(), FileSystemType::Dos33);
        assert!("cpm".parse::<FileSystemType>().is_err());
        assert_eq!(FileSystemType::Pascal.to_string(), "UCSD Pascal");
    }

    #[test]
    fn test_dos_type_codes() {
        for code in [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40] {
            assert_eq!(DosFileType::from_code(code).code(), code);
            assert_eq!(DosFileType::from_code(code | 0x80).code(), code);
        }
        assert_eq!(DosFileType::Applesoft.letter(), 'A');
    }

    #[test]
    fn test_info_bytes() {
        let info = FileSystemInfo {
            fs_type: FileSystemType::ProDos,
            volume_name: "TEST".to_string(),
            total_blocks: 280,
            free_blocks: 273,
            block_size: 512,
        };
        assert_eq!(info.free_bytes(), 273 * 512);
        assert_eq!(info.used_bytes(), 7 * 512);
    }
}
