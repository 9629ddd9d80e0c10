/// ProDOS volume bitmap
///
/// One bit per block, most significant bit first, 1 = free. The bitmap
/// occupies `ceil(total / 4096)` blocks starting at the volume header's
/// bitmap pointer.

use crate::error::{DiskError, Result};
use crate::format::constants::BLOCK_SIZE;
use crate::image::Staging;

/// Blocks described by one bitmap block
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// In-memory copy of the volume bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    start: u32,
    total_blocks: u32,
    bytes: Vec<u8>,
}

impl Bitmap {
    /// Number of blocks the bitmap of a `total_blocks` volume needs
    pub fn blocks_needed(total_blocks: u32) -> u32 {
        total_blocks.div_ceil(BITS_PER_BLOCK)
    }

    /// Bitmap with every block marked used
    pub fn new_full(start: u32, total_blocks: u32) -> Self {
        let len = Self::blocks_needed(total_blocks) as usize * BLOCK_SIZE;
        Self {
            start,
            total_blocks,
            bytes: vec![0u8; len],
        }
    }

    /// Load the bitmap through a staging arena
    pub fn load(staging: &Staging<'_>, start: u32, total_blocks: u32) -> Result<Self> {
        let count = Self::blocks_needed(total_blocks);
        if start == 0 || start + count > staging.block_count() {
            return Err(DiskError::corrupt(format!(
                "bitmap at block {} runs past end of volume",
                start
            )));
        }
        let mut bytes = Vec::with_capacity(count as usize * BLOCK_SIZE);
        for block in start..start + count {
            bytes.extend(staging.read(block)?);
        }
        Ok(Self {
            start,
            total_blocks,
            bytes,
        })
    }

    /// Write the bitmap back through a staging arena
    pub fn store(&self, staging: &mut Staging<'_>) -> Result<()> {
        for (i, chunk) in self.bytes.chunks(BLOCK_SIZE).enumerate() {
            let block = self.start + i as u32;
            if staging.read(block)? != chunk {
                staging.write(block, chunk.to_vec())?;
            }
        }
        Ok(())
    }

    /// First block of the bitmap
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Blocks described by the bitmap
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Check whether `block` is free
    pub fn is_free(&self, block: u32) -> bool {
        block < self.total_blocks
            && self.bytes[(block / 8) as usize] & (0x80 >> (block % 8)) != 0
    }

    /// Mark `block` free
    pub fn set_free(&mut self, block: u32) -> Result<()> {
        self.check(block)?;
        if self.is_free(block) {
            tracing::warn!("Double-free detected for block {}", block);
        }
        self.bytes[(block / 8) as usize] |= 0x80 >> (block % 8);
        Ok(())
    }

    /// Mark `block` used
    pub fn set_used(&mut self, block: u32) -> Result<()> {
        self.check(block)?;
        self.bytes[(block / 8) as usize] &= !(0x80 >> (block % 8));
        Ok(())
    }

    /// Number of free blocks
    pub fn free_count(&self) -> u32 {
        (0..self.total_blocks).filter(|&b| self.is_free(b)).count() as u32
    }

    /// Allocate `count` blocks first-fit, lowest numbers first
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        let blocks: Vec<u32> = (0..self.total_blocks)
            .filter(|&b| self.is_free(b))
            .take(count)
            .collect();
        if blocks.len() < count {
            return Err(DiskError::VolumeFull);
        }
        for &block in &blocks {
            self.set_used(block)?;
        }
        tracing::debug!("Allocated {} blocks starting at {:?}", count, blocks.first());
        Ok(blocks)
    }

    fn check(&self, block: u32) -> Result<()> {
        if block >= self.total_blocks {
            return Err(DiskError::corrupt(format!(
                "block {} outside bitmap of {} blocks",
                block, self.total_blocks
            )));
        }
        Ok(())
    }
}
