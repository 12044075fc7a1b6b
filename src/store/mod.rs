//! Fixed-size block storage.
//!
//! A store hands out numbered blocks of a fixed capacity, tracks which ones
//! are in use with an allocation bitset, and keeps a small reserve area for
//! engine metadata. The tree talks to storage only through [`BlockStore`].
//!
//! Blocks live in one of two pools. [`Pool::Index`] holds B+Tree index
//! blocks and [`Pool::Leaf`] holds leaves. A plain [`BlockFile`] serves both
//! from the same pool; a [`SplitBlockFile`] keeps index blocks in a separate
//! memory-mapped region with its own block size.

mod bitset;
mod file;
mod header;
mod memory;
mod pool;
mod split;

pub use self::bitset::Bitset;
pub use self::file::BlockFile;
pub use self::header::{FileHeader, Layout, RegionGeometry, FORMAT_VERSION, PLAIN_MAGIC, SPLIT_MAGIC};
pub use self::memory::MemoryBlockStore;
pub use self::split::SplitBlockFile;

use crate::error::Result;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Block number within a pool.
pub type BlockId = u32;

/// Marker for "no block", stored as the last pointer of leaves.
pub const NO_BLOCK: BlockId = u32::MAX;

/// Selects the pool a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Leaf blocks.
    Leaf,
    /// Index blocks.
    Index,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Leaf => f.write_str("leaf"),
            Pool::Index => f.write_str("index"),
        }
    }
}

/// Block allocation and I/O.
///
/// Reads take `&self`; everything that changes the store takes `&mut self`.
pub trait BlockStore {
    /// Capacity of one block in `pool`.
    fn block_size(&self, pool: Pool) -> usize;

    /// Number of blocks `pool` can hold.
    fn max_blocks(&self, pool: Pool) -> u32;

    /// Allocates the lowest free block and writes `data` into it, zero-padded
    /// or truncated to the block size.
    ///
    /// Fails with `OutOfSpace` when every block is in use.
    fn allocate(&mut self, pool: Pool, data: &[u8]) -> Result<BlockId>;

    /// Reads a whole block. Fails with `NotAllocated` for free blocks.
    fn read(&self, pool: Pool, block: BlockId) -> Result<Vec<u8>>;

    /// Overwrites a block, zero-padded or truncated to the block size.
    fn write(&mut self, pool: Pool, block: BlockId, data: &[u8]) -> Result<()>;

    /// Returns a block to the free set. Its bytes are left as they are.
    fn free(&mut self, pool: Pool, block: BlockId) -> Result<()>;

    /// Whether `block` is currently allocated.
    fn is_allocated(&self, pool: Pool, block: BlockId) -> bool;

    /// Number of allocated blocks in `pool`.
    fn allocated_count(&self, pool: Pool) -> u32;

    /// Size of the reserve area.
    fn reserve_size(&self) -> usize;

    /// Reads the whole reserve area.
    fn reserve(&self) -> Result<Vec<u8>>;

    /// Overwrites the start of the reserve area. Fails with
    /// `InvalidArgument` if `data` is longer than the reserve.
    fn set_reserve(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes everything to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// The backing file, if any.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Opens or creates a backing file according to `create_if_missing` and
/// `error_if_exists`. Returns the file and whether it was created.
pub(crate) fn open_backing_file(path: &Path, options: &crate::config::Options) -> Result<(File, bool)> {
    use crate::error::Error;

    let exists = path.exists();
    if exists && options.error_if_exists {
        return Err(Error::AlreadyExists(path.display().to_string()));
    }
    if !exists && !options.create_if_missing {
        return Err(Error::NotFound(path.display().to_string()));
    }

    let file = OpenOptions::new().read(true).write(true).create(!exists).truncate(false).open(path)?;
    // An existing empty file is initialized like a new one.
    let fresh = !exists || file.metadata()?.len() == 0;
    Ok((file, fresh))
}
