/// ProDOS filesystem implementation
///
/// ProDOS volumes use 512-byte blocks. Blocks 0-1 hold the boot loader, the
/// volume directory starts at block 2 and the volume bitmap follows it.
/// Directories are linked lists of blocks holding 13 entries each; files are
/// seedling, sapling or tree chains, or extended files with two forks.

mod bitmap;
mod entry;
mod storage;

pub use entry::is_volume_header;

use self::bitmap::Bitmap;
use self::entry::{
    decode_datetime, kind, now_stamp, slot_offset, validate_name, DirHeader, FileEntry,
    ACCESS_DIRECTORY, ACCESS_LOCKED, ACCESS_UNLOCKED, DIRECTORY_TYPE, ENTRIES_PER_BLOCK,
};
use self::storage::Fork;
use crate::error::{DiskError, Result};
use crate::filesystem::{
    DirectoryEntry, EntryLocation, FileSystem, FileSystemInfo, FileSystemType, StorageType,
};
use crate::format::constants::{write_u16, BLOCK_SIZE, MAX_PRODOS_BLOCKS};
use crate::image::{BlockSize, BlockStore, ChangeSet, DiskImage, Staging};

/// Key block of the volume directory
pub const VOLUME_DIR_BLOCK: u32 = 2;
/// Blocks in the volume directory
pub const VOLUME_DIR_BLOCKS: u32 = 4;
/// Block where a freshly formatted volume keeps its bitmap
const DEFAULT_BITMAP_BLOCK: u32 = 6;
/// Deepest directory nesting followed before giving up
const MAX_DEPTH: usize = 64;

/// ProDOS volume bound to a block store
#[derive(Debug, Clone)]
pub struct ProDosFileSystem {
    store: BlockStore,
    volume_name: String,
    created: [u8; 4],
    total_blocks: u32,
    bitmap_block: u32,
}

/// One mutating operation: staged blocks plus the working bitmap
struct Session<'a> {
    staging: Staging<'a>,
    bitmap: Bitmap,
}

impl<'a> Session<'a> {
    fn read(&self, block: u32) -> Result<Vec<u8>> {
        self.staging.read(block)
    }

    fn write(&mut self, block: u32, data: Vec<u8>) -> Result<()> {
        self.staging.write(block, data)
    }

    fn finish(mut self) -> Result<ChangeSet> {
        self.bitmap.store(&mut self.staging)?;
        Ok(self.staging.finish())
    }
}

/// Format a blank ProDOS volume onto a 512-byte block store
pub fn format(store: &mut BlockStore, volume_name: &str) -> Result<()> {
    if store.block_size() != BlockSize::Block512 {
        return Err(DiskError::unsupported("ProDOS on a 256-byte sector store"));
    }
    let name = validate_name(volume_name)?;
    let total = store.block_count().min(MAX_PRODOS_BLOCKS);
    let bitmap_blocks = Bitmap::blocks_needed(total);
    let first_free = DEFAULT_BITMAP_BLOCK + bitmap_blocks;
    if total <= first_free {
        return Err(DiskError::VolumeFull);
    }

    let mut staging = store.staging();
    for i in 0..VOLUME_DIR_BLOCKS {
        let block = VOLUME_DIR_BLOCK + i;
        let mut buf = vec![0u8; BLOCK_SIZE];
        if i > 0 {
            write_u16(&mut buf, 0, (block - 1) as u16);
        }
        if i + 1 < VOLUME_DIR_BLOCKS {
            write_u16(&mut buf, 2, (block + 1) as u16);
        }
        if i == 0 {
            DirHeader {
                storage: kind::VOLUME_HEADER,
                name: name.clone(),
                created: now_stamp(),
                case_bits: 0,
                access: ACCESS_DIRECTORY,
                file_count: 0,
                pointer: DEFAULT_BITMAP_BLOCK as u16,
                extra: total as u16,
            }
            .write(&mut buf);
        }
        staging.write(block, buf)?;
    }

    let mut bitmap = Bitmap::new_full(DEFAULT_BITMAP_BLOCK, total);
    for block in first_free..total {
        bitmap.set_free(block)?;
    }
    bitmap.store(&mut staging)?;

    let changes = staging.finish();
    store.apply(changes)?;
    tracing::debug!("Formatted ProDOS volume /{} with {} blocks", name, total);
    Ok(())
}

impl ProDosFileSystem {
    /// Mount a ProDOS volume from an image
    pub fn open(image: DiskImage) -> Result<Self> {
        let store = BlockStore::new(image, BlockSize::Block512);
        if store.block_count() <= VOLUME_DIR_BLOCK {
            return Err(DiskError::UnrecognizedFilesystem);
        }
        let block = store.read_block(VOLUME_DIR_BLOCK)?;
        if !is_volume_header(&block) {
            return Err(DiskError::UnrecognizedFilesystem);
        }
        let header = DirHeader::parse(&block).ok_or(DiskError::UnrecognizedFilesystem)?;
        let total_blocks = header.extra as u32;
        if total_blocks == 0 || total_blocks > store.block_count() {
            return Err(DiskError::corrupt(format!(
                "volume claims {} blocks but image holds {}",
                total_blocks,
                store.block_count()
            )));
        }

        tracing::debug!("Mounted ProDOS volume /{} ({} blocks)", header.name, total_blocks);
        Ok(Self {
            store,
            volume_name: header.name,
            created: header.created,
            total_blocks,
            bitmap_block: header.pointer as u32,
        })
    }

    /// Volume name without the leading slash
    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Total blocks on the volume
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
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

    fn session(&self) -> Result<Session<'_>> {
        let staging = self.store.staging();
        let bitmap = Bitmap::load(&staging, self.bitmap_block, self.total_blocks)?;
        Ok(Session { staging, bitmap })
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<()> {
        self.store.apply(changes)
    }

    fn to_directory_entry(&self, loc: EntryLocation, fe: &FileEntry) -> DirectoryEntry {
        let storage = match fe.storage {
            kind::SEEDLING => StorageType::Seedling,
            kind::SAPLING => StorageType::Sapling,
            kind::TREE => StorageType::Tree,
            kind::EXTENDED => StorageType::Extended,
            kind::SUBDIRECTORY => StorageType::Directory,
            _ => StorageType::Contiguous,
        };
        DirectoryEntry {
            name: fe.display_name(),
            is_directory: fe.is_directory(),
            file_type: fe.file_type,
            aux_type: fe.aux_type,
            size_bytes: fe.eof as u64,
            blocks_used: fe.blocks_used as u32,
            storage,
            dos_type: None,
            created_at: decode_datetime(&fe.created),
            modified_at: decode_datetime(&fe.modified),
            first_block: fe.key_block as u32,
            locked: fe.is_locked(),
            location: Some(loc),
        }
    }

    /// Key block of a directory entry, checked against the header it points at
    fn directory_key(&self, staging: &Staging<'_>, dir: &DirectoryEntry) -> Result<u32> {
        if !dir.is_directory {
            return Err(DiskError::NotADirectory(dir.name.clone()));
        }
        let key = dir.first_block;
        if key == 0 || key >= self.total_blocks {
            return Err(DiskError::FileNotFound(dir.name.clone()));
        }
        match DirHeader::parse(&staging.read(key)?) {
            Some(_) => Ok(key),
            None => Err(DiskError::corrupt(format!(
                "block {} is not a directory key block",
                key
            ))),
        }
    }

    /// Re-read the slot an entry handle points at and check it still matches
    fn locate(&self, staging: &Staging<'_>, entry: &DirectoryEntry) -> Result<(EntryLocation, FileEntry)> {
        let loc = entry
            .location
            .ok_or_else(|| DiskError::FileNotFound(entry.name.clone()))?;
        if loc.block >= self.total_blocks || loc.slot as usize >= ENTRIES_PER_BLOCK {
            return Err(DiskError::FileNotFound(entry.name.clone()));
        }
        let block = staging.read(loc.block)?;
        match FileEntry::parse(&block, loc.slot as usize) {
            Some(fe)
                if fe.name.eq_ignore_ascii_case(&entry.name)
                    && fe.key_block as u32 == entry.first_block
                    && !(loc.block == loc.dir_key && loc.slot == 0) =>
            {
                Ok((loc, fe))
            }
            _ => Err(DiskError::FileNotFound(entry.name.clone())),
        }
    }

    /// Live entries of a directory in chain order
    fn entries(&self, staging: &Staging<'_>, key: u32) -> Result<Vec<(EntryLocation, FileEntry)>> {
        let mut out = Vec::new();
        for block_no in storage::directory_blocks(staging, key, self.total_blocks)? {
            let block = staging.read(block_no)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if block_no == key && slot == 0 {
                    continue;
                }
                if let Some(fe) = FileEntry::parse(&block, slot) {
                    let loc = EntryLocation {
                        dir_key: key,
                        block: block_no,
                        slot: slot as u16,
                    };
                    out.push((loc, fe));
                }
            }
        }
        Ok(out)
    }

    fn check_unique(
        &self,
        staging: &Staging<'_>,
        key: u32,
        name: &str,
        except: Option<EntryLocation>,
    ) -> Result<()> {
        let clash = self
            .entries(staging, key)?
            .into_iter()
            .any(|(loc, fe)| Some(loc) != except && fe.name.eq_ignore_ascii_case(name));
        if clash {
            return Err(DiskError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    fn write_entry(s: &mut Session<'_>, loc: EntryLocation, fe: &FileEntry) -> Result<()> {
        let mut block = s.read(loc.block)?;
        fe.write(&mut block, loc.slot as usize);
        s.write(loc.block, block)
    }

    fn clear_entry(s: &mut Session<'_>, loc: EntryLocation) -> Result<()> {
        let mut block = s.read(loc.block)?;
        let start = slot_offset(loc.slot as usize);
        block[start..start + entry::ENTRY_LENGTH].fill(0);
        s.write(loc.block, block)
    }

    fn adjust_file_count(s: &mut Session<'_>, key: u32, delta: i32) -> Result<()> {
        let mut block = s.read(key)?;
        let mut header = DirHeader::parse(&block)
            .ok_or_else(|| DiskError::corrupt(format!("block {} lost its directory header", key)))?;
        let count = header.file_count as i32 + delta;
        if count < 0 {
            tracing::warn!("File count of directory at block {} went negative", key);
        }
        header.file_count = count.max(0) as u16;
        header.write(&mut block);
        s.write(key, block)
    }

    /// First free slot of a directory, growing a subdirectory when it is full
    fn free_slot(&self, s: &mut Session<'_>, key: u32) -> Result<EntryLocation> {
        let chain = storage::directory_blocks(&s.staging, key, self.total_blocks)?;
        for &block_no in &chain {
            let block = s.read(block_no)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if block_no == key && slot == 0 {
                    continue;
                }
                if block[slot_offset(slot)] >> 4 == kind::DELETED {
                    return Ok(EntryLocation {
                        dir_key: key,
                        block: block_no,
                        slot: slot as u16,
                    });
                }
            }
        }

        if key == VOLUME_DIR_BLOCK {
            return Err(DiskError::DirectoryFull);
        }

        // Link a new block onto the end of the subdirectory
        let last = *chain.last().unwrap_or(&key);
        let new_block = s.bitmap.allocate(1)?[0];
        let mut buf = vec![0u8; BLOCK_SIZE];
        write_u16(&mut buf, 0, last as u16);
        s.write(new_block, buf)?;
        let mut tail = s.read(last)?;
        write_u16(&mut tail, 2, new_block as u16);
        s.write(last, tail)?;

        let header = DirHeader::parse(&s.read(key)?)
            .ok_or_else(|| DiskError::corrupt(format!("block {} lost its directory header", key)))?;
        let parent_block = header.parent_block();
        let parent_slot = header.parent_slot();
        let mut parent = s.read(parent_block)?;
        let mut fe = FileEntry::parse(&parent, parent_slot)
            .filter(|fe| fe.key_block as u32 == key)
            .ok_or_else(|| DiskError::corrupt(format!("subdirectory at block {} has a bad parent pointer", key)))?;
        fe.blocks_used += 1;
        fe.eof += BLOCK_SIZE as u32;
        fe.write(&mut parent, parent_slot);
        s.write(parent_block, parent)?;

        tracing::debug!("Extended directory at block {} with block {}", key, new_block);
        Ok(EntryLocation {
            dir_key: key,
            block: new_block,
            slot: 0,
        })
    }

    /// Key block of the directory containing directory `key`
    fn parent_of(&self, staging: &Staging<'_>, key: u32) -> Result<Option<u32>> {
        if key == VOLUME_DIR_BLOCK {
            return Ok(None);
        }
        let header = DirHeader::parse(&staging.read(key)?)
            .ok_or_else(|| DiskError::corrupt(format!("block {} is not a directory key block", key)))?;
        let parent = staging.read(header.parent_block())?;
        let fe = FileEntry::parse(&parent, header.parent_slot())
            .ok_or_else(|| DiskError::corrupt(format!("subdirectory at block {} has no parent entry", key)))?;
        Ok(Some(fe.header_pointer as u32))
    }

    fn fork_of(fe: &FileEntry) -> Fork {
        Fork {
            storage: fe.storage,
            key_block: fe.key_block as u32,
            blocks_used: fe.blocks_used as u32,
            eof: fe.eof,
        }
    }

    fn delete_in(
        &self,
        s: &mut Session<'_>,
        loc: EntryLocation,
        fe: &FileEntry,
        recursive: bool,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(DiskError::corrupt("directory nesting too deep"));
        }
        if fe.is_locked() {
            return Err(DiskError::FileLocked(fe.name.clone()));
        }

        if fe.is_directory() {
            let key = fe.key_block as u32;
            let children = self.entries(&s.staging, key)?;
            if !children.is_empty() && !recursive {
                return Err(DiskError::DirectoryNotEmpty(fe.name.clone()));
            }
            for (child_loc, child) in children {
                self.delete_in(s, child_loc, &child, true, depth + 1)?;
            }
            for block in storage::directory_blocks(&s.staging, key, self.total_blocks)? {
                s.bitmap.set_free(block)?;
            }
        } else {
            storage::free_fork(&s.staging, &mut s.bitmap, &Self::fork_of(fe), self.total_blocks)?;
        }

        Self::clear_entry(s, loc)?;
        Self::adjust_file_count(s, loc.dir_key, -1)
    }

    fn rename_volume(&mut self, new_name: &str) -> Result<DirectoryEntry> {
        let name = validate_name(new_name)?;
        let mut s = self.session()?;
        let mut block = s.read(VOLUME_DIR_BLOCK)?;
        let mut header = DirHeader::parse(&block).ok_or(DiskError::UnrecognizedFilesystem)?;
        header.name = name.clone();
        header.case_bits = 0;
        header.write(&mut block);
        s.write(VOLUME_DIR_BLOCK, block)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        self.volume_name = name;
        Ok(self.root())
    }

    fn refresh(&self, loc: EntryLocation) -> Result<DirectoryEntry> {
        let block = self.store.read_block(loc.block)?;
        let fe = FileEntry::parse(&block, loc.slot as usize)
            .ok_or_else(|| DiskError::corrupt("entry vanished after commit"))?;
        Ok(self.to_directory_entry(loc, &fe))
    }
}

impl FileSystem for ProDosFileSystem {
    fn fs_type(&self) -> FileSystemType {
        FileSystemType::ProDos
    }

    fn root(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: self.volume_name.clone(),
            is_directory: true,
            file_type: DIRECTORY_TYPE,
            aux_type: 0,
            size_bytes: (VOLUME_DIR_BLOCKS as usize * BLOCK_SIZE) as u64,
            blocks_used: VOLUME_DIR_BLOCKS,
            storage: StorageType::Directory,
            dos_type: None,
            created_at: decode_datetime(&self.created),
            modified_at: None,
            first_block: VOLUME_DIR_BLOCK,
            locked: false,
            location: None,
        }
    }

    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        let staging = self.store.staging();
        let key = self.directory_key(&staging, dir)?;
        Ok(self
            .entries(&staging, key)?
            .iter()
            .map(|(loc, fe)| self.to_directory_entry(*loc, fe))
            .collect())
    }

    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let staging = self.store.staging();
        let (_, fe) = self.locate(&staging, entry)?;
        match fe.storage {
            kind::SUBDIRECTORY => Err(DiskError::unsupported(format!(
                "read_file on directory {}",
                fe.name
            ))),
            kind::EXTENDED => {
                let (data, _) = storage::extended_forks(&staging, fe.key_block as u32, self.total_blocks)?;
                storage::read_fork(&staging, &data, self.total_blocks)
            }
            _ => storage::read_fork(&staging, &Self::fork_of(&fe), self.total_blocks),
        }
    }

    fn read_resource_fork(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let staging = self.store.staging();
        let (_, fe) = self.locate(&staging, entry)?;
        if fe.storage != kind::EXTENDED {
            return Ok(Vec::new());
        }
        let (_, rsrc) = storage::extended_forks(&staging, fe.key_block as u32, self.total_blocks)?;
        if rsrc.storage == kind::DELETED {
            return Ok(Vec::new());
        }
        storage::read_fork(&staging, &rsrc, self.total_blocks)
    }

    fn info(&self) -> Result<FileSystemInfo> {
        let s = self.session()?;
        Ok(FileSystemInfo {
            fs_type: FileSystemType::ProDos,
            volume_name: self.volume_name.clone(),
            total_blocks: self.total_blocks,
            free_blocks: s.bitmap.free_count(),
            block_size: BLOCK_SIZE,
        })
    }

    fn usage(&self) -> Result<Vec<bool>> {
        let s = self.session()?;
        Ok((0..self.total_blocks).map(|b| !s.bitmap.is_free(b)).collect())
    }

    fn create_file(
        &mut self,
        dir: &DirectoryEntry,
        name: &str,
        file_type: u8,
        aux_type: u16,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        let name = validate_name(name)?;
        if data.len() as u64 > entry::MAX_EOF {
            return Err(DiskError::FileTooLarge(data.len() as u64));
        }
        if file_type == DIRECTORY_TYPE {
            return Err(DiskError::unsupported("create_file with the directory type"));
        }

        let mut s = self.session()?;
        let key = self.directory_key(&s.staging, dir)?;
        self.check_unique(&s.staging, key, &name, None)?;
        let loc = self.free_slot(&mut s, key)?;
        let fork = storage::write_fork(&mut s.staging, &mut s.bitmap, data)?;

        let stamp = now_stamp();
        let fe = FileEntry {
            storage: fork.storage,
            name,
            file_type,
            key_block: fork.key_block as u16,
            blocks_used: fork.blocks_used as u16,
            eof: fork.eof,
            created: stamp,
            case_bits: 0,
            access: ACCESS_UNLOCKED,
            aux_type,
            modified: stamp,
            header_pointer: key as u16,
        };
        Self::write_entry(&mut s, loc, &fe)?;
        Self::adjust_file_count(&mut s, key, 1)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        tracing::debug!("Created {} ({} bytes) at block {}", fe.name, fe.eof, fe.key_block);
        Ok(self.to_directory_entry(loc, &fe))
    }

    fn create_directory(&mut self, dir: &DirectoryEntry, name: &str) -> Result<DirectoryEntry> {
        let name = validate_name(name)?;
        let mut s = self.session()?;
        let parent_key = self.directory_key(&s.staging, dir)?;
        self.check_unique(&s.staging, parent_key, &name, None)?;
        let loc = self.free_slot(&mut s, parent_key)?;
        let key = s.bitmap.allocate(1)?[0];

        let stamp = now_stamp();
        let mut block = vec![0u8; BLOCK_SIZE];
        DirHeader::subdirectory(&name, loc.block, loc.slot as usize, stamp).write(&mut block);
        s.write(key, block)?;

        let fe = FileEntry {
            storage: kind::SUBDIRECTORY,
            name,
            file_type: DIRECTORY_TYPE,
            key_block: key as u16,
            blocks_used: 1,
            eof: BLOCK_SIZE as u32,
            created: stamp,
            case_bits: 0,
            access: ACCESS_UNLOCKED,
            aux_type: 0,
            modified: stamp,
            header_pointer: parent_key as u16,
        };
        Self::write_entry(&mut s, loc, &fe)?;
        Self::adjust_file_count(&mut s, parent_key, 1)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        Ok(self.to_directory_entry(loc, &fe))
    }

    fn write_file(&mut self, entry: &DirectoryEntry, data: &[u8]) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut fe) = self.locate(&s.staging, entry)?;
        if fe.is_locked() {
            return Err(DiskError::FileLocked(fe.name));
        }
        if fe.is_directory() {
            return Err(DiskError::unsupported(format!("write_file on directory {}", fe.name)));
        }

        if fe.storage == kind::EXTENDED {
            let key = fe.key_block as u32;
            let (old, rsrc) = storage::extended_forks(&s.staging, key, self.total_blocks)?;
            storage::free_fork(&s.staging, &mut s.bitmap, &old, self.total_blocks)?;
            let fork = storage::write_fork(&mut s.staging, &mut s.bitmap, data)?;
            storage::set_extended_data_fork(&mut s.staging, key, &fork)?;
            fe.blocks_used = (1 + fork.blocks_used + rsrc.blocks_used) as u16;
            fe.eof = fork.eof;
        } else {
            storage::free_fork(&s.staging, &mut s.bitmap, &Self::fork_of(&fe), self.total_blocks)?;
            let fork = storage::write_fork(&mut s.staging, &mut s.bitmap, data)?;
            fe.storage = fork.storage;
            fe.key_block = fork.key_block as u16;
            fe.blocks_used = fork.blocks_used as u16;
            fe.eof = fork.eof;
        }
        fe.modified = now_stamp();
        Self::write_entry(&mut s, loc, &fe)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        Ok(self.to_directory_entry(loc, &fe))
    }

    fn delete(&mut self, entry: &DirectoryEntry, recursive: bool) -> Result<()> {
        let mut s = self.session()?;
        let (loc, fe) = self.locate(&s.staging, entry)?;
        self.delete_in(&mut s, loc, &fe, recursive, 0)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        tracing::debug!("Deleted {}", fe.name);
        Ok(())
    }

    fn rename(&mut self, entry: &DirectoryEntry, new_name: &str) -> Result<DirectoryEntry> {
        if entry.location.is_none() && entry.first_block == VOLUME_DIR_BLOCK {
            return self.rename_volume(new_name);
        }
        let name = validate_name(new_name)?;
        let mut s = self.session()?;
        let (loc, mut fe) = self.locate(&s.staging, entry)?;
        if fe.is_locked() {
            return Err(DiskError::FileLocked(fe.name));
        }
        self.check_unique(&s.staging, loc.dir_key, &name, Some(loc))?;

        fe.name = name.clone();
        fe.case_bits = 0;
        Self::write_entry(&mut s, loc, &fe)?;
        if fe.is_directory() {
            let key = fe.key_block as u32;
            let mut block = s.read(key)?;
            let mut header = DirHeader::parse(&block)
                .ok_or_else(|| DiskError::corrupt(format!("block {} is not a directory key block", key)))?;
            header.name = name;
            header.case_bits = 0;
            header.write(&mut block);
            s.write(key, block)?;
        }

        let changes = s.finish()?;
        self.commit(changes)?;
        Ok(self.to_directory_entry(loc, &fe))
    }

    fn move_entry(&mut self, entry: &DirectoryEntry, new_dir: &DirectoryEntry) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (old_loc, mut fe) = self.locate(&s.staging, entry)?;
        let dest = self.directory_key(&s.staging, new_dir)?;
        if dest == old_loc.dir_key {
            return Ok(self.to_directory_entry(old_loc, &fe));
        }
        if fe.is_locked() {
            return Err(DiskError::FileLocked(fe.name));
        }

        if fe.is_directory() {
            let moved = fe.key_block as u32;
            let mut cursor = Some(dest);
            let mut depth = 0;
            while let Some(key) = cursor {
                if key == moved {
                    return Err(DiskError::InvalidMove(format!(
                        "{} cannot be moved into itself or a subdirectory of itself",
                        fe.name
                    )));
                }
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(DiskError::corrupt("directory parent chain too deep"));
                }
                cursor = self.parent_of(&s.staging, key)?;
            }
        }

        self.check_unique(&s.staging, dest, &fe.name, None)?;
        let new_loc = self.free_slot(&mut s, dest)?;

        fe.header_pointer = dest as u16;
        Self::write_entry(&mut s, new_loc, &fe)?;
        Self::clear_entry(&mut s, old_loc)?;
        Self::adjust_file_count(&mut s, old_loc.dir_key, -1)?;
        Self::adjust_file_count(&mut s, dest, 1)?;

        if fe.is_directory() {
            let key = fe.key_block as u32;
            let mut block = s.read(key)?;
            let mut header = DirHeader::parse(&block)
                .ok_or_else(|| DiskError::corrupt(format!("block {} is not a directory key block", key)))?;
            header.set_parent(new_loc.block, new_loc.slot as usize);
            header.write(&mut block);
            s.write(key, block)?;
        }

        let changes = s.finish()?;
        self.commit(changes)?;
        self.refresh(new_loc)
    }

    fn change_type(&mut self, entry: &DirectoryEntry, file_type: u8, aux_type: u16) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut fe) = self.locate(&s.staging, entry)?;
        if fe.is_directory() || file_type == DIRECTORY_TYPE {
            return Err(DiskError::unsupported("changing the type of a directory"));
        }
        fe.file_type = file_type;
        fe.aux_type = aux_type;
        Self::write_entry(&mut s, loc, &fe)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        Ok(self.to_directory_entry(loc, &fe))
    }

    fn set_locked(&mut self, entry: &DirectoryEntry, locked: bool) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut fe) = self.locate(&s.staging, entry)?;
        fe.access = if locked { ACCESS_LOCKED } else { ACCESS_UNLOCKED };
        Self::write_entry(&mut s, loc, &fe)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        Ok(self.to_directory_entry(loc, &fe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::read_u16;
    use crate::format::ImageSpec;

    fn blank() -> ProDosFileSystem {
        let image = DiskImage::builder()
            .spec(ImageSpec::prodos_140k())
            .volume_name("TEST")
            .build()
            .unwrap();
        ProDosFileSystem::open(image).unwrap()
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_format_layout() {
        let fs = blank();
        let block = fs.store().read_block(2).unwrap();
        assert_eq!(block[0x04], 0xF4);
        assert_eq!(&block[0x05..0x09], b"TEST");
        assert_eq!(read_u16(&block, 0x27), 6);
        assert_eq!(read_u16(&block, 0x29), 280);
        assert_eq!(read_u16(&block, 2), 3);

        let info = fs.info().unwrap();
        assert_eq!(info.total_blocks, 280);
        // boot 2, directory 4, bitmap 1
        assert_eq!(info.free_blocks, 280 - 7);
    }

    #[test]
    fn test_create_and_read() {
        let mut fs = blank();
        let root = fs.root();
        let entry = fs.create_file(&root, "hello", 0x04, 0, b"HELLO WORLD").unwrap();
        assert_eq!(entry.name, "HELLO");
        assert_eq!(entry.storage, StorageType::Seedling);
        assert_eq!(fs.read_file(&entry).unwrap(), b"HELLO WORLD");

        let listing = fs.list(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0], entry);
    }

    #[test]
    fn test_name_collision_is_case_insensitive() {
        let mut fs = blank();
        let root = fs.root();
        fs.create_file(&root, "DATA", 0x06, 0, &[1]).unwrap();
        assert!(matches!(
            fs.create_file(&root, "data", 0x06, 0, &[2]),
            Err(DiskError::NameCollision(_))
        ));
        assert!(matches!(
            fs.create_file(&root, "9LIVES", 0x06, 0, &[2]),
            Err(DiskError::InvalidName(_))
        ));
    }

    #[test]
    fn test_volume_directory_full() {
        let mut fs = blank();
        let root = fs.root();
        // 4 blocks * 13 slots minus the header
        for i in 0..51 {
            fs.create_file(&root, &format!("F{}", i), 0x06, 0, &[]).unwrap();
        }
        let before = fs.info().unwrap();
        assert!(matches!(
            fs.create_file(&root, "ONE.MORE", 0x06, 0, &[]),
            Err(DiskError::DirectoryFull)
        ));
        assert_eq!(fs.info().unwrap(), before);
    }

    #[test]
    fn test_subdirectory_grows() {
        let mut fs = blank();
        let root = fs.root();
        let dir = fs.create_directory(&root, "GAMES").unwrap();
        assert_eq!(dir.blocks_used, 1);

        for i in 0..13 {
            fs.create_file(&dir, &format!("G{}", i), 0x06, 0, &[i as u8]).unwrap();
        }
        let dir = fs.lookup("GAMES").unwrap();
        assert_eq!(dir.blocks_used, 2);
        assert_eq!(dir.size_bytes, 1024);
        assert_eq!(fs.list(&dir).unwrap().len(), 13);
        let g12 = fs.lookup("/GAMES/G12").unwrap();
        assert_eq!(fs.read_file(&g12).unwrap(), vec![12]);
    }

    #[test]
    fn test_delete_non_empty_directory() {
        let mut fs = blank();
        let root = fs.root();
        let free = fs.info().unwrap().free_blocks;
        let dir = fs.create_directory(&root, "DOCS").unwrap();
        fs.create_file(&dir, "A", 0x04, 0, &data(2000)).unwrap();
        let sub = fs.create_directory(&dir, "SUB").unwrap();
        fs.create_file(&sub, "B", 0x04, 0, &data(10)).unwrap();

        assert!(matches!(
            fs.delete(&dir, false),
            Err(DiskError::DirectoryNotEmpty(_))
        ));
        fs.delete(&dir, true).unwrap();
        assert!(fs.list(&root).unwrap().is_empty());
        assert_eq!(fs.info().unwrap().free_blocks, free);
    }

    #[test]
    fn test_locked_file() {
        let mut fs = blank();
        let root = fs.root();
        let entry = fs.create_file(&root, "KEEP", 0x04, 0, b"x").unwrap();
        let entry = fs.set_locked(&entry, true).unwrap();
        assert!(entry.locked);
        assert!(matches!(fs.delete(&entry, false), Err(DiskError::FileLocked(_))));
        assert!(matches!(fs.write_file(&entry, b"y"), Err(DiskError::FileLocked(_))));
        let entry = fs.set_locked(&entry, false).unwrap();
        fs.delete(&entry, false).unwrap();
    }

    #[test]
    fn test_stale_handle() {
        let mut fs = blank();
        let root = fs.root();
        let entry = fs.create_file(&root, "GONE", 0x04, 0, b"x").unwrap();
        fs.delete(&entry, false).unwrap();
        assert!(matches!(fs.read_file(&entry), Err(DiskError::FileNotFound(_))));
    }

    #[test]
    fn test_move_updates_parent_pointer() {
        let mut fs = blank();
        let root = fs.root();
        let a = fs.create_directory(&root, "A").unwrap();
        let b = fs.create_directory(&root, "B").unwrap();
        let moved = fs.move_entry(&b, &a).unwrap();
        assert_eq!(fs.list(&root).unwrap().len(), 1);

        let loc = moved.location.unwrap();
        let header = DirHeader::parse(&fs.store().read_block(moved.first_block).unwrap()).unwrap();
        assert_eq!(header.parent_block(), loc.block);
        assert_eq!(header.parent_slot(), loc.slot as usize);

        let a = fs.lookup("A").unwrap();
        assert!(matches!(
            fs.move_entry(&a, &moved),
            Err(DiskError::InvalidMove(_))
        ));
        assert!(matches!(fs.move_entry(&a, &a), Err(DiskError::InvalidMove(_))));
    }

    #[test]
    fn test_rename_volume() {
        let mut fs = blank();
        let root = fs.root();
        let root = fs.rename(&root, "work").unwrap();
        assert_eq!(root.name, "WORK");
        assert_eq!(fs.volume_name(), "WORK");
    }

    #[test]
    fn test_extended_file_forks() {
        let mut fs = blank();
        let root = fs.root();
        let entry = fs.create_file(&root, "FORKED", 0xB3, 0, &[0u8; 10]).unwrap();

        // Rewrite the entry as an extended file by hand
        let mut s = fs.session().unwrap();
        let blocks = s.bitmap.allocate(3).unwrap();
        let (key, data_block, rsrc_block) = (blocks[0], blocks[1], blocks[2]);
        s.write(data_block, vec![0x44; BLOCK_SIZE]).unwrap();
        s.write(rsrc_block, vec![0x52; BLOCK_SIZE]).unwrap();
        let mut kb = vec![0u8; BLOCK_SIZE];
        Fork { storage: kind::SEEDLING, key_block: data_block, blocks_used: 1, eof: 100 }
            .write_mini(&mut kb, 0);
        Fork { storage: kind::SEEDLING, key_block: rsrc_block, blocks_used: 1, eof: 20 }
            .write_mini(&mut kb, 0x100);
        s.write(key, kb).unwrap();
        let loc = entry.location.unwrap();
        let mut block = s.read(loc.block).unwrap();
        let mut fe = FileEntry::parse(&block, loc.slot as usize).unwrap();
        storage::free_fork(&s.staging, &mut s.bitmap, &ProDosFileSystem::fork_of(&fe), 280).unwrap();
        fe.storage = kind::EXTENDED;
        fe.key_block = key as u16;
        fe.blocks_used = 3;
        fe.eof = 100;
        fe.write(&mut block, loc.slot as usize);
        s.write(loc.block, block).unwrap();
        let changes = s.finish().unwrap();
        fs.commit(changes).unwrap();

        let entry = fs.lookup("FORKED").unwrap();
        assert_eq!(entry.storage, StorageType::Extended);
        assert_eq!(fs.read_file(&entry).unwrap(), vec![0x44; 100]);
        assert_eq!(fs.read_resource_fork(&entry).unwrap(), vec![0x52; 20]);

        let entry = fs.write_file(&entry, &data(600)).unwrap();
        assert_eq!(fs.read_file(&entry).unwrap(), data(600));
        assert_eq!(fs.read_resource_fork(&entry).unwrap(), vec![0x52; 20]);

        let free = fs.info().unwrap().free_blocks;
        fs.delete(&entry, false).unwrap();
        // key block, 3 data fork blocks, 1 resource fork block
        assert_eq!(fs.info().unwrap().free_blocks, free + 5);
    }
}
