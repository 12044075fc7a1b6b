//! Heap-backed block store.

use super::bitset::Bitset;
use super::pool::padded;
use super::{BlockId, BlockStore, Pool};
use crate::config::Options;
use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct MemoryPool {
    block_size: usize,
    bitset: Bitset,
    /// Freed blocks keep their bytes, like on disk.
    blocks: HashMap<BlockId, Vec<u8>>,
}

impl MemoryPool {
    fn new(block_size: usize, max_blocks: u32) -> Self {
        Self { block_size, bitset: Bitset::new(max_blocks), blocks: HashMap::new() }
    }

    fn check(&self, pool: Pool, block: BlockId) -> Result<()> {
        if self.bitset.get(block) {
            Ok(())
        } else {
            Err(Error::NotAllocated { pool, block })
        }
    }
}

/// A [`BlockStore`] that keeps every block in memory.
///
/// Behaves like a [`BlockFile`](super::BlockFile) or, when created with
/// [`MemoryBlockStore::new_split`], like a
/// [`SplitBlockFile`](super::SplitBlockFile), including allocation order and
/// errors. Nothing is persisted.
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    pools: Vec<MemoryPool>,
    reserve: Vec<u8>,
}

impl MemoryBlockStore {
    /// Creates a store with one pool shared by leaf and index blocks.
    pub fn new(options: &Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            pools: vec![MemoryPool::new(options.block_size, options.max_blocks)],
            reserve: vec![0; options.reserve_size],
        })
    }

    /// Creates a store with separate index and leaf pools.
    pub fn new_split(options: &Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            pools: vec![
                MemoryPool::new(options.block_size, options.max_blocks),
                MemoryPool::new(options.region_block_size, options.region_max_blocks),
            ],
            reserve: vec![0; options.reserve_size],
        })
    }

    fn pool(&self, pool: Pool) -> &MemoryPool {
        match pool {
            Pool::Index if self.pools.len() > 1 => &self.pools[1],
            _ => &self.pools[0],
        }
    }

    fn pool_mut(&mut self, pool: Pool) -> &mut MemoryPool {
        match pool {
            Pool::Index if self.pools.len() > 1 => &mut self.pools[1],
            _ => &mut self.pools[0],
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_size(&self, pool: Pool) -> usize {
        self.pool(pool).block_size
    }

    fn max_blocks(&self, pool: Pool) -> u32 {
        self.pool(pool).bitset.max()
    }

    fn allocate(&mut self, pool: Pool, data: &[u8]) -> Result<BlockId> {
        let p = self.pool_mut(pool);
        let block = p
            .bitset
            .first_clear()
            .ok_or(Error::OutOfSpace { pool, max_blocks: p.bitset.max() })?;
        p.bitset.set(block);
        p.blocks.insert(block, padded(data, p.block_size));
        Ok(block)
    }

    fn read(&self, pool: Pool, block: BlockId) -> Result<Vec<u8>> {
        let p = self.pool(pool);
        p.check(pool, block)?;
        Ok(p.blocks.get(&block).cloned().unwrap_or_else(|| vec![0; p.block_size]))
    }

    fn write(&mut self, pool: Pool, block: BlockId, data: &[u8]) -> Result<()> {
        let p = self.pool_mut(pool);
        p.check(pool, block)?;
        p.blocks.insert(block, padded(data, p.block_size));
        Ok(())
    }

    fn free(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        let p = self.pool_mut(pool);
        p.check(pool, block)?;
        p.bitset.clear(block);
        Ok(())
    }

    fn is_allocated(&self, pool: Pool, block: BlockId) -> bool {
        self.pool(pool).bitset.get(block)
    }

    fn allocated_count(&self, pool: Pool) -> u32 {
        self.pool(pool).bitset.count()
    }

    fn reserve_size(&self) -> usize {
        self.reserve.len()
    }

    fn reserve(&self) -> Result<Vec<u8>> {
        Ok(self.reserve.clone())
    }

    fn set_reserve(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.reserve.len() {
            return Err(Error::invalid_argument(format!(
                "reserve data is {} bytes, reserve area holds {}",
                data.len(),
                self.reserve.len()
            )));
        }
        self.reserve[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
