/// Block store implementation
///
/// The store is the only owner of image bytes. Filesystem engines read and
/// write logical units through it: 256-byte DOS sectors addressed as
/// `track * 16 + sector`, or 512-byte ProDOS blocks. Mutating operations
/// collect their writes in a [`Staging`] arena and commit them as one
/// [`ChangeSet`].

use crate::error::{DiskError, Result};
use crate::format::constants::*;
use crate::image::{interleave, DiskImage};
use std::collections::BTreeMap;

/// Logical unit size of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    /// 256-byte DOS 3.3 sectors
    Sector256,
    /// 512-byte ProDOS / Pascal blocks
    Block512,
}

impl BlockSize {
    /// Size in bytes
    pub fn bytes(&self) -> usize {
        match self {
            BlockSize::Sector256 => SECTOR_SIZE,
            BlockSize::Block512 => BLOCK_SIZE,
        }
    }
}

/// Uniform addressable-unit view over a disk image
#[derive(Debug, Clone)]
pub struct BlockStore {
    image: DiskImage,
    block_size: BlockSize,
}

impl BlockStore {
    /// Wrap an image with the given unit size
    pub fn new(image: DiskImage, block_size: BlockSize) -> Self {
        Self { image, block_size }
    }

    /// Unit size
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Number of addressable units
    pub fn block_count(&self) -> u32 {
        match self.block_size {
            BlockSize::Sector256 => self.image.sector_count(),
            BlockSize::Block512 => self.image.block_count(),
        }
    }

    /// Map logical unit `n` to the 256-byte physical slots it occupies
    pub fn physical_offsets(&self, n: u32) -> Result<Vec<usize>> {
        self.check_range(n)?;
        let order = self.image.order();
        let offsets = match self.block_size {
            BlockSize::Sector256 => {
                let n = n as usize;
                vec![interleave::dos_sector_offset(
                    order,
                    n / SECTORS_PER_TRACK,
                    n % SECTORS_PER_TRACK,
                )]
            }
            BlockSize::Block512 => interleave::prodos_block_offsets(order, n as usize).to_vec(),
        };
        if offsets
            .iter()
            .any(|&o| o + SECTOR_SIZE > self.image.data().len())
        {
            return Err(DiskError::OutOfRange {
                block: n,
                count: self.block_count(),
            });
        }
        Ok(offsets)
    }

    /// Read logical unit `n`
    pub fn read_block(&self, n: u32) -> Result<Vec<u8>> {
        let data = self.image.data();
        let mut out = Vec::with_capacity(self.block_size.bytes());
        for offset in self.physical_offsets(n)? {
            out.extend_from_slice(&data[offset..offset + SECTOR_SIZE]);
        }
        Ok(out)
    }

    /// Write logical unit `n`
    pub fn write_block(&mut self, n: u32, bytes: &[u8]) -> Result<()> {
        self.check_size(bytes)?;
        let offsets = self.physical_offsets(n)?;
        let data = self.image.data_mut();
        for (offset, chunk) in offsets.into_iter().zip(bytes.chunks(SECTOR_SIZE)) {
            data[offset..offset + SECTOR_SIZE].copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Start staging a mutating operation
    pub fn staging(&self) -> Staging<'_> {
        Staging {
            store: self,
            dirty: BTreeMap::new(),
        }
    }

    /// Commit a change set
    ///
    /// Every unit is validated before the first byte is written.
    pub fn apply(&mut self, changes: ChangeSet) -> Result<()> {
        if changes.block_size != self.block_size {
            return Err(DiskError::InvalidBlockSize {
                expected: self.block_size.bytes(),
                actual: changes.block_size.bytes(),
            });
        }
        for (&n, bytes) in &changes.blocks {
            self.check_size(bytes)?;
            self.physical_offsets(n)?;
        }
        tracing::debug!("Committing {} changed units", changes.blocks.len());
        for (n, bytes) in changes.blocks {
            self.write_block(n, &bytes)?;
        }
        Ok(())
    }

    /// Borrow the underlying image
    pub fn image(&self) -> &DiskImage {
        &self.image
    }

    /// Mutably borrow the underlying image
    pub fn image_mut(&mut self) -> &mut DiskImage {
        &mut self.image
    }

    /// Give back the underlying image
    pub fn into_image(self) -> DiskImage {
        self.image
    }

    fn check_range(&self, n: u32) -> Result<()> {
        let count = self.block_count();
        if n >= count {
            return Err(DiskError::OutOfRange { block: n, count });
        }
        Ok(())
    }

    fn check_size(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.block_size.bytes() {
            return Err(DiskError::InvalidBlockSize {
                expected: self.block_size.bytes(),
                actual: bytes.len(),
            });
        }
        Ok(())
    }
}

/// Arena of dirty units for one mutating operation
///
/// Reads see staged data first. Dropping the arena discards the operation.
pub struct Staging<'a> {
    store: &'a BlockStore,
    dirty: BTreeMap<u32, Vec<u8>>,
}

impl<'a> Staging<'a> {
    /// Number of addressable units
    pub fn block_count(&self) -> u32 {
        self.store.block_count()
    }

    /// Unit size in bytes
    pub fn unit_size(&self) -> usize {
        self.store.block_size.bytes()
    }

    /// Read unit `n`, preferring staged data
    pub fn read(&self, n: u32) -> Result<Vec<u8>> {
        match self.dirty.get(&n) {
            Some(bytes) => Ok(bytes.clone()),
            None => self.store.read_block(n),
        }
    }

    /// Stage a write of unit `n`
    pub fn write(&mut self, n: u32, bytes: Vec<u8>) -> Result<()> {
        self.store.check_range(n)?;
        self.store.check_size(&bytes)?;
        self.dirty.insert(n, bytes);
        Ok(())
    }

    /// Stage a zero-filled unit
    pub fn zero(&mut self, n: u32) -> Result<()> {
        let size = self.unit_size();
        self.write(n, vec![0u8; size])
    }

    /// Number of staged units
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Close the arena, producing the change set to commit
    pub fn finish(self) -> ChangeSet {
        ChangeSet {
            block_size: self.store.block_size,
            blocks: self.dirty,
        }
    }
}

/// Units written by one operation, ready to commit
#[derive(Debug, Clone)]
pub struct ChangeSet {
    block_size: BlockSize,
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl ChangeSet {
    /// Number of changed units
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Nothing to commit
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Indices of changed units, ascending
    pub fn units(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize, ext: &str) -> DiskImage {
        DiskImage::from_bytes(vec![0u8; len], Some(ext)).unwrap()
    }

    #[test]
    fn test_block_count() {
        let store = BlockStore::new(image(FLOPPY_140K_SIZE, "po"), BlockSize::Block512);
        assert_eq!(store.block_count(), 280);
        let store = BlockStore::new(image(FLOPPY_140K_SIZE, "do"), BlockSize::Sector256);
        assert_eq!(store.block_count(), 560);
    }

    #[test]
    fn test_read_write_block() {
        let mut store = BlockStore::new(image(FLOPPY_140K_SIZE, "do"), BlockSize::Block512);
        let mut data = vec![0x11u8; SECTOR_SIZE];
        data.extend(vec![0x22u8; SECTOR_SIZE]);

        store.write_block(2, &data).unwrap();
        assert_eq!(store.read_block(2).unwrap(), data);
        assert!(store.image().is_changed());

        // Block 2 of a DOS-order image lands in DOS sectors 11 and 10
        let raw = store.image().data();
        assert_eq!(raw[11 * SECTOR_SIZE], 0x11);
        assert_eq!(raw[10 * SECTOR_SIZE], 0x22);
    }

    #[test]
    fn test_out_of_range() {
        let store = BlockStore::new(image(FLOPPY_140K_SIZE, "po"), BlockSize::Block512);
        assert!(matches!(
            store.read_block(280),
            Err(DiskError::OutOfRange { block: 280, count: 280 })
        ));
    }

    #[test]
    fn test_wrong_buffer_size() {
        let mut store = BlockStore::new(image(FLOPPY_140K_SIZE, "po"), BlockSize::Block512);
        assert!(matches!(
            store.write_block(0, &[0u8; 256]),
            Err(DiskError::InvalidBlockSize { expected: 512, actual: 256 })
        ));
    }

    #[test]
    fn test_staging_reads_own_writes() {
        let mut store = BlockStore::new(image(FLOPPY_140K_SIZE, "do"), BlockSize::Sector256);
        let mut staging = store.staging();
        staging.write(17 * 16, vec![0xAAu8; SECTOR_SIZE]).unwrap();
        assert_eq!(staging.read(17 * 16).unwrap()[0], 0xAA);
        assert_eq!(staging.read(0).unwrap()[0], 0x00);
        let changes = staging.finish();
        assert_eq!(changes.len(), 1);

        assert_eq!(store.read_block(17 * 16).unwrap()[0], 0x00);
        store.apply(changes).unwrap();
        assert_eq!(store.read_block(17 * 16).unwrap()[0], 0xAA);
    }

    #[test]
    fn test_dropped_staging_changes_nothing() {
        let store = BlockStore::new(image(FLOPPY_140K_SIZE, "po"), BlockSize::Block512);
        {
            let mut staging = store.staging();
            staging.write(5, vec![0xFFu8; BLOCK_SIZE]).unwrap();
        }
        assert!(!store.image().is_changed());
        assert_eq!(store.read_block(5).unwrap(), vec![0u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_staging_rejects_out_of_range() {
        let store = BlockStore::new(image(FLOPPY_140K_SIZE, "po"), BlockSize::Block512);
        let mut staging = store.staging();
        assert!(staging.write(999, vec![0u8; BLOCK_SIZE]).is_err());
        assert_eq!(staging.dirty_count(), 0);
    }
}
