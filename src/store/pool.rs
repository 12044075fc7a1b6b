//! Allocation bookkeeping for one file-backed pool.
//!
//! The pool owns the in-memory bitset and knows where its persisted copy
//! lives. Only the changed byte is written back on allocate and free.

use super::bitset::Bitset;
use super::header::BITSET_LEN_SIZE;
use super::{BlockId, Pool};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Writes `data` at `offset`.
pub(crate) fn write_at(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

/// Fills `buf` from `offset`.
pub(crate) fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

/// Copies `data` into a zeroed buffer of `size` bytes, truncating if longer.
pub(crate) fn padded(data: &[u8], size: usize) -> Vec<u8> {
    let mut block = vec![0; size];
    let n = data.len().min(size);
    block[..n].copy_from_slice(&data[..n]);
    block
}

/// Bitset plus geometry of one pool.
#[derive(Debug)]
pub(crate) struct PoolAllocator {
    block_size: usize,
    bitset: Bitset,
    bitset_offset: u64,
}

impl PoolAllocator {
    /// Writes an empty bitset for a new pool.
    pub fn create(file: &mut File, block_size: usize, max_blocks: u32, bitset_offset: u64) -> Result<Self> {
        let bitset = Bitset::new(max_blocks);
        let mut buf = Vec::with_capacity(BITSET_LEN_SIZE as usize + bitset.as_bytes().len());
        buf.extend_from_slice(&(bitset.as_bytes().len() as i32).to_be_bytes());
        buf.extend_from_slice(bitset.as_bytes());
        write_at(file, bitset_offset, &buf)?;
        Ok(Self { block_size, bitset, bitset_offset })
    }

    /// Reads the persisted bitset of an existing pool.
    pub fn load(file: &mut File, block_size: usize, max_blocks: u32, bitset_offset: u64) -> Result<Self> {
        let mut len = [0u8; BITSET_LEN_SIZE as usize];
        read_at(file, bitset_offset, &mut len)?;
        let len = i32::from_be_bytes(len);
        if len < 0 || len as usize != Bitset::byte_len(max_blocks) {
            return Err(Error::format_mismatch(format!(
                "Bitset length {} does not match {} blocks",
                len, max_blocks
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        read_at(file, bitset_offset + BITSET_LEN_SIZE, &mut bytes)?;
        let bitset = Bitset::from_bytes(bytes, max_blocks)?;
        Ok(Self { block_size, bitset, bitset_offset })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_blocks(&self) -> u32 {
        self.bitset.max()
    }

    pub fn allocated_count(&self) -> u32 {
        self.bitset.count()
    }

    pub fn is_allocated(&self, block: BlockId) -> bool {
        self.bitset.get(block)
    }

    /// Fails with `NotAllocated` unless `block` is allocated.
    pub fn check(&self, pool: Pool, block: BlockId) -> Result<()> {
        if self.bitset.get(block) {
            Ok(())
        } else {
            Err(Error::NotAllocated { pool, block })
        }
    }

    /// Sets the lowest clear bit in memory and returns its block number.
    pub fn claim(&mut self, pool: Pool) -> Result<BlockId> {
        let block = self
            .bitset
            .first_clear()
            .ok_or(Error::OutOfSpace { pool, max_blocks: self.bitset.max() })?;
        self.bitset.set(block);
        Ok(block)
    }

    /// Undoes a [`PoolAllocator::claim`] whose block write failed.
    pub fn unclaim(&mut self, block: BlockId) {
        self.bitset.clear(block);
    }

    /// Clears the bit of an allocated block in memory.
    pub fn release(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        self.check(pool, block)?;
        self.bitset.clear(block);
        Ok(())
    }

    /// Writes the bitset byte holding `block`'s bit.
    pub fn persist(&self, file: &mut File, block: BlockId) -> Result<()> {
        let index = block as usize / 8;
        write_at(
            file,
            self.bitset_offset + BITSET_LEN_SIZE + index as u64,
            &[self.bitset.byte(index)],
        )
    }
}
