/// UCSD Pascal filesystem implementation
///
/// Read-only. The directory fills blocks 2-5: a 26-byte volume header
/// followed by up to 77 26-byte file entries. Every file is one contiguous
/// extent of blocks.

use crate::error::{DiskError, Result};
use crate::filesystem::{
    DirectoryEntry, EntryLocation, FileSystem, FileSystemInfo, FileSystemType, StorageType,
};
use crate::filetypes;
use crate::format::constants::{read_u16, BLOCK_SIZE};
use crate::image::{BlockSize, BlockStore, DiskImage};
use chrono::NaiveDate;

/// First directory block
pub const DIRECTORY_BLOCK: u32 = 2;
/// First block after the directory
pub const DIRECTORY_END: u32 = 6;
/// Most entries the directory holds
pub const MAX_FILES: usize = 77;

const ENTRY_LEN: usize = 26;
const MAX_VOLUME_NAME: usize = 7;
const MAX_FILE_NAME: usize = 15;

/// Check whether a block looks like a Pascal volume header
pub fn is_volume_header(block: &[u8]) -> bool {
    if block.len() < ENTRY_LEN {
        return false;
    }
    let name_len = block[6] as usize;
    read_u16(block, 0) == 0
        && read_u16(block, 2) as u32 == DIRECTORY_END
        && read_u16(block, 4) & 0x0F == 0
        && (1..=MAX_VOLUME_NAME).contains(&name_len)
        && block[7..7 + name_len].iter().all(|b| b.is_ascii_graphic())
        && read_u16(block, 14) as u32 > DIRECTORY_END
        && read_u16(block, 16) as usize <= MAX_FILES
}

/// Decode a packed Pascal date: month bits 0-3, day 4-8, year 9-15
fn decode_date(raw: u16) -> Option<chrono::NaiveDateTime> {
    let month = (raw & 0x0F) as u32;
    let day = ((raw >> 4) & 0x1F) as u32;
    let year = (raw >> 9) as i32;
    NaiveDate::from_ymd_opt(1900 + year, month, day).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// One file entry of the directory
#[derive(Debug, Clone, PartialEq, Eq)]
struct PascalEntry {
    start: u16,
    end: u16,
    kind: u8,
    name: String,
    last_bytes: u16,
    date: u16,
}

impl PascalEntry {
    fn parse(raw: &[u8]) -> Self {
        let len = (raw[6] as usize).min(MAX_FILE_NAME);
        Self {
            start: read_u16(raw, 0),
            end: read_u16(raw, 2),
            kind: (read_u16(raw, 4) & 0x0F) as u8,
            name: raw[7..7 + len].iter().map(|&b| b as char).collect(),
            last_bytes: read_u16(raw, 22),
            date: read_u16(raw, 24),
        }
    }

    fn blocks(&self) -> u32 {
        self.end.saturating_sub(self.start) as u32
    }

    fn size(&self) -> u64 {
        match self.blocks() {
            0 => 0,
            n => (n as u64 - 1) * BLOCK_SIZE as u64 + self.last_bytes.min(BLOCK_SIZE as u16) as u64,
        }
    }
}

/// UCSD Pascal volume bound to a block store
#[derive(Debug, Clone)]
pub struct PascalFileSystem {
    store: BlockStore,
    volume_name: String,
    total_blocks: u32,
    date: u16,
}

impl PascalFileSystem {
    /// Mount a Pascal volume from an image
    pub fn open(image: DiskImage) -> Result<Self> {
        let store = BlockStore::new(image, BlockSize::Block512);
        if store.block_count() < DIRECTORY_END {
            return Err(DiskError::UnrecognizedFilesystem);
        }
        let header = store.read_block(DIRECTORY_BLOCK)?;
        if !is_volume_header(&header) {
            return Err(DiskError::UnrecognizedFilesystem);
        }
        let name_len = header[6] as usize;
        let volume_name: String = header[7..7 + name_len].iter().map(|&b| b as char).collect();
        let total_blocks = read_u16(&header, 14) as u32;
        if total_blocks > store.block_count() {
            tracing::warn!(
                "Pascal volume {} claims {} blocks but image holds {}",
                volume_name,
                total_blocks,
                store.block_count()
            );
        }

        tracing::debug!("Mounted Pascal volume {} ({} blocks)", volume_name, total_blocks);
        Ok(Self {
            store,
            volume_name,
            total_blocks,
            date: read_u16(&header, 20),
        })
    }

    /// Volume name without the trailing colon
    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Borrow the block store
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    /// Give back the image
    pub fn into_image(self) -> DiskImage {
        self.store.into_image()
    }

    fn directory(&self) -> Result<Vec<u8>> {
        let mut dir = Vec::with_capacity((DIRECTORY_END - DIRECTORY_BLOCK) as usize * BLOCK_SIZE);
        for block in DIRECTORY_BLOCK..DIRECTORY_END {
            dir.extend(self.store.read_block(block)?);
        }
        Ok(dir)
    }

    fn entries(&self) -> Result<Vec<(usize, PascalEntry)>> {
        let dir = self.directory()?;
        let count = (read_u16(&dir, 16) as usize).min(MAX_FILES);
        Ok((1..=count)
            .map(|slot| (slot, PascalEntry::parse(&dir[slot * ENTRY_LEN..(slot + 1) * ENTRY_LEN])))
            .collect())
    }

    fn to_directory_entry(&self, slot: usize, pe: &PascalEntry) -> DirectoryEntry {
        let offset = slot * ENTRY_LEN;
        DirectoryEntry {
            name: pe.name.clone(),
            is_directory: false,
            file_type: filetypes::prodos_type_for_pascal(pe.kind),
            aux_type: pe.kind as u16,
            size_bytes: pe.size(),
            blocks_used: pe.blocks(),
            storage: StorageType::Contiguous,
            dos_type: None,
            created_at: None,
            modified_at: decode_date(pe.date),
            first_block: pe.start as u32,
            locked: false,
            location: Some(EntryLocation {
                dir_key: DIRECTORY_BLOCK,
                block: DIRECTORY_BLOCK + (offset / BLOCK_SIZE) as u32,
                slot: slot as u16,
            }),
        }
    }

    fn locate(&self, entry: &DirectoryEntry) -> Result<PascalEntry> {
        let slot = entry
            .location
            .map(|loc| loc.slot as usize)
            .ok_or_else(|| DiskError::FileNotFound(entry.name.clone()))?;
        self.entries()?
            .into_iter()
            .find(|(s, pe)| *s == slot && pe.name == entry.name && pe.start as u32 == entry.first_block)
            .map(|(_, pe)| pe)
            .ok_or_else(|| DiskError::FileNotFound(entry.name.clone()))
    }
}

impl FileSystem for PascalFileSystem {
    fn fs_type(&self) -> FileSystemType {
        FileSystemType::Pascal
    }

    fn root(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: self.volume_name.clone(),
            is_directory: true,
            file_type: 0x0F,
            aux_type: 0,
            size_bytes: ((DIRECTORY_END - DIRECTORY_BLOCK) as usize * BLOCK_SIZE) as u64,
            blocks_used: DIRECTORY_END - DIRECTORY_BLOCK,
            storage: StorageType::Directory,
            dos_type: None,
            created_at: None,
            modified_at: decode_date(self.date),
            first_block: DIRECTORY_BLOCK,
            locked: false,
            location: None,
        }
    }

    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        if !dir.is_directory {
            return Err(DiskError::NotADirectory(dir.name.clone()));
        }
        if dir.first_block != DIRECTORY_BLOCK {
            return Err(DiskError::FileNotFound(dir.name.clone()));
        }
        Ok(self
            .entries()?
            .iter()
            .map(|(slot, pe)| self.to_directory_entry(*slot, pe))
            .collect())
    }

    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let pe = self.locate(entry)?;
        let limit = self.total_blocks.min(self.store.block_count());
        let overlaps_directory = (pe.start as u32) < DIRECTORY_END && pe.end > pe.start;
        if pe.end < pe.start || pe.end as u32 > limit || overlaps_directory {
            return Err(DiskError::corrupt(format!(
                "{} spans blocks {}..{} outside the volume",
                pe.name, pe.start, pe.end
            )));
        }
        let mut data = Vec::with_capacity(pe.blocks() as usize * BLOCK_SIZE);
        for block in pe.start as u32..pe.end as u32 {
            data.extend(self.store.read_block(block)?);
        }
        data.truncate(pe.size() as usize);
        Ok(data)
    }

    fn info(&self) -> Result<FileSystemInfo> {
        let used = self.usage()?.iter().filter(|&&u| u).count() as u32;
        Ok(FileSystemInfo {
            fs_type: FileSystemType::Pascal,
            volume_name: self.volume_name.clone(),
            total_blocks: self.total_blocks,
            free_blocks: self.total_blocks.saturating_sub(used),
            block_size: BLOCK_SIZE,
        })
    }

    fn usage(&self) -> Result<Vec<bool>> {
        let mut used = vec![false; self.total_blocks as usize];
        for flag in used.iter_mut().take(DIRECTORY_END as usize) {
            *flag = true;
        }
        for (_, pe) in self.entries()? {
            for block in pe.start as usize..(pe.end as usize).min(used.len()) {
                used[block] = true;
            }
        }
        Ok(used)
    }
}
