//! Split block file: an index region pool and a main leaf pool in one file.
//!
//! ## File Layout
//!
//! ```text
//! [header: 28 bytes]                       // see header.rs
//! [aligned] [region_bitset_len: i32][region bitset]
//! [aligned] [region block 0]...[region block region_max_blocks - 1]
//! [aligned] [bitset_len: i32][bitset]
//! [aligned] [reserve]
//! [aligned] [block 0][block 1]...
//! ```
//!
//! The region blocks are preallocated when the file is created and accessed
//! through a writable memory mapping. Region bitset updates still go through
//! the file handle.

use super::file::FileCore;
use super::header::{FileHeader, Layout, SPLIT_HEADER_SIZE};
use super::pool::{padded, read_at, write_at, PoolAllocator};
use super::{open_backing_file, BlockId, BlockStore, Pool};
use crate::config::Options;
use crate::error::{Error, Result};
use log::{info, trace};
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::ops::Range;
use std::path::Path;

/// A block file whose index blocks live in a separate memory-mapped region.
///
/// [`Pool::Index`] maps to the region pool and [`Pool::Leaf`] to the main pool.
#[derive(Debug)]
pub struct SplitBlockFile {
    header: FileHeader,
    core: FileCore,
    region: PoolAllocator,
    region_map: MmapMut,
}

fn map_region(file: &File, layout: &Layout, len: usize) -> Result<MmapMut> {
    // SAFETY: the mapped range lies below the main pool and is never
    // truncated while this handle is open. The file is only written through
    // this process; cross-process writers are not supported.
    let map = unsafe {
        MmapOptions::new()
            .offset(layout.region_blocks_offset)
            .len(len)
            .map_mut(file)?
    };
    Ok(map)
}

impl SplitBlockFile {
    /// Opens a split block file, creating it if allowed by `options`.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let expected = FileHeader::split(&options)?;
        let layout = Layout::new(&expected);
        let region_len = options.region_block_size * options.region_max_blocks as usize;
        let (mut file, fresh) = open_backing_file(&path, &options)?;

        let (region, mut core) = if fresh {
            write_at(&mut file, 0, &expected.encode())?;
            let region = PoolAllocator::create(
                &mut file,
                options.region_block_size,
                options.region_max_blocks,
                layout.region_bitset_offset,
            )?;
            let core = FileCore::create(path, file, &expected, &options)?;
            info!(
                "Created split block file {:?} ({} region blocks of {} bytes, {} blocks of {} bytes)",
                core.path(),
                options.region_max_blocks,
                options.region_block_size,
                options.max_blocks,
                options.block_size
            );
            (region, core)
        } else {
            if file.metadata()?.len() < layout.initial_len() {
                return Err(Error::format_mismatch("File is too short for a split block file"));
            }
            let mut buf = [0u8; SPLIT_HEADER_SIZE];
            read_at(&mut file, 0, &mut buf)?;
            FileHeader::decode(&buf, true)?.check_matches(&expected)?;
            let region = PoolAllocator::load(
                &mut file,
                options.region_block_size,
                options.region_max_blocks,
                layout.region_bitset_offset,
            )?;
            let core = FileCore::load(path, file, &expected, &options)?;
            info!(
                "Opened split block file {:?} ({} region and {} main blocks allocated)",
                core.path(),
                region.allocated_count(),
                core.allocated_count()
            );
            (region, core)
        };

        let region_map = map_region(core.file_mut(), &layout, region_len)?;
        Ok(Self { header: expected, core, region, region_map })
    }

    /// The file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Section offsets of the file.
    pub fn layout(&self) -> &Layout {
        self.core.layout()
    }

    fn region_range(&self, block: BlockId) -> Range<usize> {
        let start = block as usize * self.region.block_size();
        start..start + self.region.block_size()
    }

    /// Allocates a region block holding `data`.
    pub fn allocate_region(&mut self, data: &[u8]) -> Result<BlockId> {
        let block = self.region.claim(Pool::Index)?;
        let range = self.region_range(block);
        self.region_map[range].copy_from_slice(&padded(data, self.region.block_size()));
        self.region.persist(self.core.file_mut(), block)?;
        trace!("Allocated region block {}", block);
        Ok(block)
    }

    /// Reads a region block.
    pub fn read_region(&self, block: BlockId) -> Result<Vec<u8>> {
        self.region.check(Pool::Index, block)?;
        Ok(self.region_map[self.region_range(block)].to_vec())
    }

    /// Overwrites a region block.
    pub fn write_region(&mut self, block: BlockId, data: &[u8]) -> Result<()> {
        self.region.check(Pool::Index, block)?;
        let range = self.region_range(block);
        self.region_map[range].copy_from_slice(&padded(data, self.region.block_size()));
        Ok(())
    }

    /// Frees a region block.
    pub fn free_region(&mut self, block: BlockId) -> Result<()> {
        self.region.release(Pool::Index, block)?;
        self.region.persist(self.core.file_mut(), block)?;
        trace!("Freed region block {}", block);
        Ok(())
    }

    /// Allocates a main pool block holding `data`.
    pub fn allocate_block(&mut self, data: &[u8]) -> Result<BlockId> {
        self.core.allocate(Pool::Leaf, data)
    }

    /// Reads a main pool block.
    pub fn read_block(&self, block: BlockId) -> Result<Vec<u8>> {
        self.core.read(Pool::Leaf, block)
    }

    /// Overwrites a main pool block.
    pub fn write_block(&mut self, block: BlockId, data: &[u8]) -> Result<()> {
        self.core.write(Pool::Leaf, block, data)
    }

    /// Frees a main pool block.
    pub fn free_block(&mut self, block: BlockId) -> Result<()> {
        self.core.free(Pool::Leaf, block)
    }
}

impl BlockStore for SplitBlockFile {
    fn block_size(&self, pool: Pool) -> usize {
        match pool {
            Pool::Index => self.region.block_size(),
            Pool::Leaf => self.core.block_size(),
        }
    }

    fn max_blocks(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Index => self.region.max_blocks(),
            Pool::Leaf => self.core.max_blocks(),
        }
    }

    fn allocate(&mut self, pool: Pool, data: &[u8]) -> Result<BlockId> {
        match pool {
            Pool::Index => self.allocate_region(data),
            Pool::Leaf => self.allocate_block(data),
        }
    }

    fn read(&self, pool: Pool, block: BlockId) -> Result<Vec<u8>> {
        match pool {
            Pool::Index => self.read_region(block),
            Pool::Leaf => self.read_block(block),
        }
    }

    fn write(&mut self, pool: Pool, block: BlockId, data: &[u8]) -> Result<()> {
        match pool {
            Pool::Index => self.write_region(block, data),
            Pool::Leaf => self.write_block(block, data),
        }
    }

    fn free(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        match pool {
            Pool::Index => self.free_region(block),
            Pool::Leaf => self.free_block(block),
        }
    }

    fn is_allocated(&self, pool: Pool, block: BlockId) -> bool {
        match pool {
            Pool::Index => self.region.is_allocated(block),
            Pool::Leaf => self.core.is_allocated(block),
        }
    }

    fn allocated_count(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Index => self.region.allocated_count(),
            Pool::Leaf => self.core.allocated_count(),
        }
    }

    fn reserve_size(&self) -> usize {
        self.core.reserve_size()
    }

    fn reserve(&self) -> Result<Vec<u8>> {
        self.core.reserve()
    }

    fn set_reserve(&mut self, data: &[u8]) -> Result<()> {
        self.core.set_reserve(data)
    }

    fn sync(&mut self) -> Result<()> {
        if self.core.sync_on_save() {
            self.region_map.flush()?;
        }
        self.core.sync()
    }

    fn path(&self) -> Option<&Path> {
        Some(self.core.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small() -> Options {
        Options::new()
            .block_size(128)
            .max_blocks(16)
            .region_block_size(32)
            .region_max_blocks(4)
            .reserve_size(32)
    }

    #[test]
    fn test_pools_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = SplitBlockFile::open(temp_dir.path().join("s.blk"), small()).unwrap();
        assert_eq!(file.block_size(Pool::Index), 32);
        assert_eq!(file.block_size(Pool::Leaf), 128);

        let r = file.allocate(Pool::Index, b"index").unwrap();
        let l = file.allocate(Pool::Leaf, b"leaf").unwrap();
        assert_eq!((r, l), (0, 0));
        assert_eq!(file.read(Pool::Index, r).unwrap().len(), 32);
        assert_eq!(&file.read(Pool::Index, r).unwrap()[..5], b"index");
        assert_eq!(&file.read(Pool::Leaf, l).unwrap()[..4], b"leaf");

        file.free(Pool::Index, r).unwrap();
        assert!(!file.is_allocated(Pool::Index, r));
        assert!(file.is_allocated(Pool::Leaf, l));
        assert!(matches!(file.read_region(r), Err(Error::NotAllocated { pool: Pool::Index, .. })));
    }

    #[test]
    fn test_region_out_of_space() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = SplitBlockFile::open(temp_dir.path().join("s.blk"), small()).unwrap();
        for _ in 0..4 {
            file.allocate_region(b"r").unwrap();
        }
        let err = file.allocate_region(b"r").unwrap_err();
        assert_eq!(err.to_string(), "Out of space: all 4 blocks of the index pool are allocated");
        // The main pool is unaffected.
        file.allocate_block(b"l").unwrap();
    }

    #[test]
    fn test_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.blk");
        {
            let mut file = SplitBlockFile::open(&path, small()).unwrap();
            file.allocate_region(b"r0").unwrap();
            let r1 = file.allocate_region(b"r1").unwrap();
            file.write_region(r1, b"r1-updated").unwrap();
            file.allocate_block(b"l0").unwrap();
            file.set_reserve(b"descriptor").unwrap();
            file.sync().unwrap();
        }

        let file = SplitBlockFile::open(&path, small()).unwrap();
        assert_eq!(file.allocated_count(Pool::Index), 2);
        assert_eq!(file.allocated_count(Pool::Leaf), 1);
        assert_eq!(&file.read_region(1).unwrap()[..10], b"r1-updated");
        assert_eq!(&file.read_block(0).unwrap()[..2], b"l0");
        assert_eq!(&file.reserve().unwrap()[..10], b"descriptor");
    }

    #[test]
    fn test_region_geometry_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.blk");
        SplitBlockFile::open(&path, small()).unwrap();
        let err = SplitBlockFile::open(&path, small().region_max_blocks(8)).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch(_)));
    }

    #[test]
    fn test_plain_file_is_not_split() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p.blk");
        crate::store::BlockFile::open(&path, small()).unwrap();
        assert!(matches!(SplitBlockFile::open(&path, small()), Err(Error::FormatMismatch(_))));
    }
}
