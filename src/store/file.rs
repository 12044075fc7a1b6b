//! Plain block file: one pool of fixed-size blocks in a single file.
//!
//! ## File Layout
//!
//! ```text
//! [header: 20 bytes]                       // see header.rs
//! [aligned] [bitset_len: i32][bitset]
//! [aligned] [reserve]
//! [aligned] [block 0][block 1]...[block max_blocks - 1]
//! ```
//!
//! The file only grows as far as the highest block written.

use super::header::{FileHeader, Layout, PLAIN_HEADER_SIZE};
use super::pool::{padded, read_at, write_at, PoolAllocator};
use super::{open_backing_file, BlockId, BlockStore, Pool};
use crate::config::Options;
use crate::error::{Error, Result};
use log::{info, trace};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The main pool, reserve area and file handle shared by plain and split
/// block files.
#[derive(Debug)]
pub(crate) struct FileCore {
    path: PathBuf,
    file: Mutex<File>,
    pool: PoolAllocator,
    layout: Layout,
    reserve_size: usize,
    sync_on_save: bool,
}

impl FileCore {
    /// Initializes the main bitset and reserve of a new file. The header must
    /// already be written.
    pub fn create(path: PathBuf, mut file: File, header: &FileHeader, options: &Options) -> Result<Self> {
        let layout = Layout::new(header);
        let pool = PoolAllocator::create(&mut file, options.block_size, options.max_blocks, layout.bitset_offset)?;
        write_at(&mut file, layout.reserve_offset, &vec![0u8; options.reserve_size])?;
        if file.metadata()?.len() < layout.initial_len() {
            file.set_len(layout.initial_len())?;
        }
        file.sync_all()?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            pool,
            layout,
            reserve_size: options.reserve_size,
            sync_on_save: options.sync_on_save,
        })
    }

    /// Loads the main bitset of an existing file.
    pub fn load(path: PathBuf, mut file: File, header: &FileHeader, options: &Options) -> Result<Self> {
        let layout = Layout::new(header);
        let pool = PoolAllocator::load(&mut file, options.block_size, options.max_blocks, layout.bitset_offset)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            pool,
            layout,
            reserve_size: options.reserve_size,
            sync_on_save: options.sync_on_save,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.file.get_mut()
    }

    pub fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    pub fn max_blocks(&self) -> u32 {
        self.pool.max_blocks()
    }

    pub fn is_allocated(&self, block: BlockId) -> bool {
        self.pool.is_allocated(block)
    }

    pub fn allocated_count(&self) -> u32 {
        self.pool.allocated_count()
    }

    fn block_offset(&self, block: BlockId) -> u64 {
        self.layout.blocks_offset + block as u64 * self.pool.block_size() as u64
    }

    pub fn allocate(&mut self, pool: Pool, data: &[u8]) -> Result<BlockId> {
        let block = self.pool.claim(pool)?;
        let offset = self.block_offset(block);
        let bytes = padded(data, self.pool.block_size());
        let file = self.file.get_mut();
        if let Err(e) = write_at(file, offset, &bytes) {
            self.pool.unclaim(block);
            return Err(e);
        }
        self.pool.persist(file, block)?;
        trace!("Allocated {} block {}", pool, block);
        Ok(block)
    }

    pub fn read(&self, pool: Pool, block: BlockId) -> Result<Vec<u8>> {
        self.pool.check(pool, block)?;
        let mut buf = vec![0u8; self.pool.block_size()];
        read_at(&mut self.file.lock(), self.block_offset(block), &mut buf)?;
        Ok(buf)
    }

    pub fn write(&mut self, pool: Pool, block: BlockId, data: &[u8]) -> Result<()> {
        self.pool.check(pool, block)?;
        let offset = self.block_offset(block);
        let bytes = padded(data, self.pool.block_size());
        write_at(self.file.get_mut(), offset, &bytes)
    }

    pub fn free(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        self.pool.release(pool, block)?;
        self.pool.persist(self.file.get_mut(), block)?;
        trace!("Freed {} block {}", pool, block);
        Ok(())
    }

    pub fn reserve_size(&self) -> usize {
        self.reserve_size
    }

    pub fn sync_on_save(&self) -> bool {
        self.sync_on_save
    }

    pub fn reserve(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.reserve_size];
        read_at(&mut self.file.lock(), self.layout.reserve_offset, &mut buf)?;
        Ok(buf)
    }

    pub fn set_reserve(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.reserve_size {
            return Err(Error::invalid_argument(format!(
                "reserve data is {} bytes, reserve area holds {}",
                data.len(),
                self.reserve_size
            )));
        }
        let offset = self.layout.reserve_offset;
        write_at(self.file.get_mut(), offset, data)
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.sync_on_save {
            self.file.get_mut().sync_data()?;
        }
        Ok(())
    }
}

/// A block file with a single pool serving both leaf and index blocks.
#[derive(Debug)]
pub struct BlockFile {
    header: FileHeader,
    core: FileCore,
}

impl BlockFile {
    /// Opens a block file, creating it if allowed by `options`.
    ///
    /// An existing file must have been created with the same block size,
    /// block count and reserve size, or `FormatMismatch` is returned.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let expected = FileHeader::plain(&options)?;
        let (mut file, fresh) = open_backing_file(&path, &options)?;

        let core = if fresh {
            write_at(&mut file, 0, &expected.encode())?;
            let core = FileCore::create(path, file, &expected, &options)?;
            info!(
                "Created block file {:?} ({} blocks of {} bytes)",
                core.path(),
                options.max_blocks,
                options.block_size
            );
            core
        } else {
            if file.metadata()?.len() < PLAIN_HEADER_SIZE as u64 {
                return Err(Error::format_mismatch("File is too short to hold a header"));
            }
            let mut buf = [0u8; PLAIN_HEADER_SIZE];
            read_at(&mut file, 0, &mut buf)?;
            FileHeader::decode(&buf, false)?.check_matches(&expected)?;
            let core = FileCore::load(path, file, &expected, &options)?;
            info!(
                "Opened block file {:?} ({} of {} blocks allocated)",
                core.path(),
                core.allocated_count(),
                core.max_blocks()
            );
            core
        };

        Ok(Self { header: expected, core })
    }

    /// The file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Section offsets of the file.
    pub fn layout(&self) -> &Layout {
        self.core.layout()
    }
}

impl BlockStore for BlockFile {
    fn block_size(&self, _pool: Pool) -> usize {
        self.core.block_size()
    }

    fn max_blocks(&self, _pool: Pool) -> u32 {
        self.core.max_blocks()
    }

    fn allocate(&mut self, pool: Pool, data: &[u8]) -> Result<BlockId> {
        self.core.allocate(pool, data)
    }

    fn read(&self, pool: Pool, block: BlockId) -> Result<Vec<u8>> {
        self.core.read(pool, block)
    }

    fn write(&mut self, pool: Pool, block: BlockId, data: &[u8]) -> Result<()> {
        self.core.write(pool, block, data)
    }

    fn free(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        self.core.free(pool, block)
    }

    fn is_allocated(&self, _pool: Pool, block: BlockId) -> bool {
        self.core.is_allocated(block)
    }

    fn allocated_count(&self, _pool: Pool) -> u32 {
        self.core.allocated_count()
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
        self.core.sync()
    }

    fn path(&self) -> Option<&Path> {
        Some(self.core.path())
    }
}
