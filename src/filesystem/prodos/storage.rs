/// ProDOS allocation chains: seedling, sapling, tree and extended files

use super::bitmap::Bitmap;
use super::entry::{kind, MAX_EOF};
use crate::error::{DiskError, Result};
use crate::format::constants::{read_u16, write_u16, BLOCK_SIZE};
use crate::image::Staging;
use std::collections::HashSet;

/// Block pointers held by one index block
pub const POINTERS_PER_INDEX: usize = 256;
/// Index blocks a master index may reference
pub const MAX_INDEX_BLOCKS: usize = 128;
/// Offset of the resource fork mini-entry in an extended key block
const RESOURCE_FORK_OFFSET: usize = 0x100;

/// Shape of one fork on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    pub storage: u8,
    pub key_block: u32,
    pub blocks_used: u32,
    pub eof: u32,
}

impl Fork {
    pub fn parse_mini(block: &[u8], offset: usize) -> Self {
        let e = &block[offset..offset + 8];
        Self {
            storage: e[0] & 0x0F,
            key_block: read_u16(e, 1) as u32,
            blocks_used: read_u16(e, 3) as u32,
            eof: e[5] as u32 | (e[6] as u32) << 8 | (e[7] as u32) << 16,
        }
    }

    pub fn write_mini(&self, block: &mut [u8], offset: usize) {
        let e = &mut block[offset..offset + 8];
        e[0] = self.storage;
        write_u16(e, 1, self.key_block as u16);
        write_u16(e, 3, self.blocks_used as u16);
        e[5..8].copy_from_slice(&self.eof.to_le_bytes()[..3]);
    }
}

fn pointer(index: &[u8], i: usize) -> u32 {
    index[i] as u32 | (index[POINTERS_PER_INDEX + i] as u32) << 8
}

fn set_pointer(index: &mut [u8], i: usize, block: u32) {
    index[i] = block as u8;
    index[POINTERS_PER_INDEX + i] = (block >> 8) as u8;
}

fn check_block(block: u32, total: u32) -> Result<u32> {
    if block == 0 || block >= total {
        return Err(DiskError::corrupt(format!(
            "block pointer {} outside volume of {} blocks",
            block, total
        )));
    }
    Ok(block)
}

/// Data and resource forks of an extended file
pub fn extended_forks(staging: &Staging<'_>, key: u32, total: u32) -> Result<(Fork, Fork)> {
    let block = staging.read(check_block(key, total)?)?;
    Ok((
        Fork::parse_mini(&block, 0),
        Fork::parse_mini(&block, RESOURCE_FORK_OFFSET),
    ))
}

/// Rewrite the data fork mini-entry of an extended key block
pub fn set_extended_data_fork(staging: &mut Staging<'_>, key: u32, fork: &Fork) -> Result<()> {
    let mut block = staging.read(key)?;
    fork.write_mini(&mut block, 0);
    staging.write(key, block)
}

/// Data block list of a fork in file order; 0 marks a sparse block
fn data_blocks(staging: &Staging<'_>, fork: &Fork, total: u32) -> Result<Vec<u32>> {
    let count = (fork.eof as usize).div_ceil(BLOCK_SIZE);
    match fork.storage {
        kind::SEEDLING => {
            if count > 1 {
                return Err(DiskError::corrupt("seedling file longer than one block"));
            }
            Ok(vec![check_block(fork.key_block, total)?; count])
        }
        kind::SAPLING => {
            if count > POINTERS_PER_INDEX {
                return Err(DiskError::corrupt("sapling file longer than its index block"));
            }
            let index = staging.read(check_block(fork.key_block, total)?)?;
            Ok((0..count).map(|i| pointer(&index, i)).collect())
        }
        kind::TREE => {
            if count > POINTERS_PER_INDEX * MAX_INDEX_BLOCKS {
                return Err(DiskError::corrupt("tree file longer than its master index"));
            }
            let master = staging.read(check_block(fork.key_block, total)?)?;
            let mut blocks = Vec::with_capacity(count);
            for i in 0..count.div_ceil(POINTERS_PER_INDEX) {
                let wanted = (count - blocks.len()).min(POINTERS_PER_INDEX);
                match pointer(&master, i) {
                    0 => blocks.extend(std::iter::repeat(0).take(wanted)),
                    ptr => {
                        let index = staging.read(check_block(ptr, total)?)?;
                        blocks.extend((0..wanted).map(|j| pointer(&index, j)));
                    }
                }
            }
            Ok(blocks)
        }
        other => Err(DiskError::corrupt(format!(
            "storage type {} has no data chain",
            other
        ))),
    }
}

/// Read exactly `fork.eof` bytes; sparse blocks read as zeros
pub fn read_fork(staging: &Staging<'_>, fork: &Fork, total: u32) -> Result<Vec<u8>> {
    let blocks = data_blocks(staging, fork, total)?;
    let mut data = Vec::with_capacity(blocks.len() * BLOCK_SIZE);
    for block in blocks {
        match block {
            0 => data.extend_from_slice(&[0u8; BLOCK_SIZE]),
            b => data.extend(staging.read(check_block(b, total)?)?),
        }
    }
    data.truncate(fork.eof as usize);
    Ok(data)
}

/// Every block a fork occupies, index blocks included
pub fn fork_blocks(staging: &Staging<'_>, fork: &Fork, total: u32) -> Result<Vec<u32>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut visit = |block: u32, out: &mut Vec<u32>| -> Result<()> {
        check_block(block, total)?;
        if !seen.insert(block) {
            return Err(DiskError::corrupt(format!(
                "block {} referenced twice in one file",
                block
            )));
        }
        out.push(block);
        Ok(())
    };

    match fork.storage {
        kind::SEEDLING => visit(fork.key_block, &mut out)?,
        kind::SAPLING => {
            visit(fork.key_block, &mut out)?;
            let index = staging.read(fork.key_block)?;
            for i in 0..POINTERS_PER_INDEX {
                match pointer(&index, i) {
                    0 => {}
                    b => visit(b, &mut out)?,
                }
            }
        }
        kind::TREE => {
            visit(fork.key_block, &mut out)?;
            let master = staging.read(fork.key_block)?;
            for i in 0..MAX_INDEX_BLOCKS {
                let ptr = pointer(&master, i);
                if ptr == 0 {
                    continue;
                }
                visit(ptr, &mut out)?;
                let index = staging.read(ptr)?;
                for j in 0..POINTERS_PER_INDEX {
                    match pointer(&index, j) {
                        0 => {}
                        b => visit(b, &mut out)?,
                    }
                }
            }
        }
        kind::EXTENDED => {
            let (data, rsrc) = extended_forks(staging, fork.key_block, total)?;
            visit(fork.key_block, &mut out)?;
            for sub in [data, rsrc] {
                if sub.storage == kind::DELETED {
                    continue;
                }
                for block in fork_blocks(staging, &sub, total)? {
                    visit(block, &mut out)?;
                }
            }
        }
        other => {
            return Err(DiskError::corrupt(format!(
                "storage type {} has no block chain",
                other
            )))
        }
    }
    Ok(out)
}

/// Blocks of a directory chain, following next pointers from `key`
pub fn directory_blocks(staging: &Staging<'_>, key: u32, total: u32) -> Result<Vec<u32>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut block = key;
    loop {
        check_block(block, total)?;
        if !seen.insert(block) || out.len() >= total as usize {
            return Err(DiskError::corrupt(format!(
                "directory chain from block {} loops at block {}",
                key, block
            )));
        }
        out.push(block);
        let next = read_u16(&staging.read(block)?, 2) as u32;
        if next == 0 {
            return Ok(out);
        }
        block = next;
    }
}

/// Allocate blocks for `data` and write it, choosing the storage type by size
pub fn write_fork(staging: &mut Staging<'_>, bitmap: &mut Bitmap, data: &[u8]) -> Result<Fork> {
    if data.len() as u64 > MAX_EOF {
        return Err(DiskError::FileTooLarge(data.len() as u64));
    }
    let count = data.len().div_ceil(BLOCK_SIZE).max(1);
    let (storage, index_count) = if count == 1 {
        (kind::SEEDLING, 0)
    } else if count <= POINTERS_PER_INDEX {
        (kind::SAPLING, 1)
    } else {
        (kind::TREE, 1 + count.div_ceil(POINTERS_PER_INDEX))
    };

    let blocks = bitmap.allocate(count + index_count)?;
    let (index_blocks, data_blocks) = blocks.split_at(index_count);

    for (i, &block) in data_blocks.iter().enumerate() {
        let start = i * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(data.len());
        let mut buf = vec![0u8; BLOCK_SIZE];
        if start < end {
            buf[..end - start].copy_from_slice(&data[start..end]);
        }
        staging.write(block, buf)?;
    }

    let key_block = match storage {
        kind::SEEDLING => data_blocks[0],
        kind::SAPLING => {
            let mut index = vec![0u8; BLOCK_SIZE];
            for (i, &block) in data_blocks.iter().enumerate() {
                set_pointer(&mut index, i, block);
            }
            staging.write(index_blocks[0], index)?;
            index_blocks[0]
        }
        _ => {
            let mut master = vec![0u8; BLOCK_SIZE];
            for (j, chunk) in data_blocks.chunks(POINTERS_PER_INDEX).enumerate() {
                let sub = index_blocks[1 + j];
                let mut index = vec![0u8; BLOCK_SIZE];
                for (i, &block) in chunk.iter().enumerate() {
                    set_pointer(&mut index, i, block);
                }
                staging.write(sub, index)?;
                set_pointer(&mut master, j, sub);
            }
            staging.write(index_blocks[0], master)?;
            index_blocks[0]
        }
    };

    Ok(Fork {
        storage,
        key_block,
        blocks_used: blocks.len() as u32,
        eof: data.len() as u32,
    })
}

/// Return every block of a fork to the bitmap
pub fn free_fork(
    staging: &Staging<'_>,
    bitmap: &mut Bitmap,
    fork: &Fork,
    total: u32,
) -> Result<()> {
    for block in fork_blocks(staging, fork, total)? {
        bitmap.set_free(block)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ContainerKind;
    use crate::image::{BlockSize, BlockStore, DiskImage};

    fn store(blocks: usize) -> BlockStore {
        let image = DiskImage::from_bytes(vec![0u8; blocks * BLOCK_SIZE], Some("po")).unwrap();
        assert_eq!(image.kind(), ContainerKind::ProdosOrder);
        BlockStore::new(image, BlockSize::Block512)
    }

    fn free_bitmap(total: u32) -> Bitmap {
        let mut bitmap = Bitmap::new_full(6, total);
        for b in 8..total {
            bitmap.set_free(b).unwrap();
        }
        bitmap
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 512) as u8).collect()
    }

    #[test]
    fn test_storage_by_size() {
        let store = store(1600);
        let mut staging = store.staging();
        let mut bitmap = free_bitmap(1600);

        let cases = [
            (0, kind::SEEDLING, 1),
            (512, kind::SEEDLING, 1),
            (513, kind::SAPLING, 3),
            (131_072, kind::SAPLING, 257),
            (131_073, kind::TREE, 257 + 1 + 2),
        ];
        for (len, storage, used) in cases {
            let data = pattern(len);
            let fork = write_fork(&mut staging, &mut bitmap, &data).unwrap();
            assert_eq!(fork.storage, storage, "len {}", len);
            assert_eq!(fork.blocks_used, used, "len {}", len);
            assert_eq!(read_fork(&staging, &fork, 1600).unwrap(), data);
            assert_eq!(fork_blocks(&staging, &fork, 1600).unwrap().len(), used as usize);
        }
    }

    #[test]
    fn test_free_fork_restores_bitmap() {
        let store = store(280);
        let mut staging = store.staging();
        let mut bitmap = free_bitmap(280);
        let before = bitmap.clone();

        let fork = write_fork(&mut staging, &mut bitmap, &pattern(5000)).unwrap();
        assert_eq!(bitmap.free_count(), before.free_count() - 11);
        free_fork(&staging, &mut bitmap, &fork, 280).unwrap();
        assert_eq!(bitmap, before);
    }

    #[test]
    fn test_sparse_blocks_read_as_zero() {
        let store = store(280);
        let mut staging = store.staging();
        let mut index = vec![0u8; BLOCK_SIZE];
        set_pointer(&mut index, 0, 20);
        staging.write(10, index).unwrap();
        staging.write(20, vec![0xAB; BLOCK_SIZE]).unwrap();

        let fork = Fork {
            storage: kind::SAPLING,
            key_block: 10,
            blocks_used: 2,
            eof: 1024,
        };
        let data = read_fork(&staging, &fork, 280).unwrap();
        assert_eq!(&data[..512], &[0xAB; 512][..]);
        assert_eq!(&data[512..], &[0u8; 512][..]);
    }

    #[test]
    fn test_directory_loop_detected() {
        let store = store(280);
        let mut staging = store.staging();
        let mut block = vec![0u8; BLOCK_SIZE];
        block[2] = 11;
        staging.write(10, block.clone()).unwrap();
        block[2] = 10;
        staging.write(11, block).unwrap();

        assert!(matches!(
            directory_blocks(&staging, 10, 280),
            Err(DiskError::CorruptStructure(_))
        ));
    }

    #[test]
    fn test_bad_pointer_is_corrupt() {
        let store = store(280);
        let staging = store.staging();
        let fork = Fork {
            storage: kind::SEEDLING,
            key_block: 5000,
            blocks_used: 1,
            eof: 10,
        };
        assert!(matches!(
            read_fork(&staging, &fork, 280),
            Err(DiskError::CorruptStructure(_))
        ));
    }

    #[test]
    fn test_too_large() {
        let store = store(280);
        let mut staging = store.staging();
        let mut bitmap = free_bitmap(280);
        let data = vec![0u8; MAX_EOF as usize + 1];
        assert!(matches!(
            write_fork(&mut staging, &mut bitmap, &data),
            Err(DiskError::FileTooLarge(_))
        ));
    }
}
