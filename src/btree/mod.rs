//! The B+Tree engine.
//!
//! A [`BPlusTree`] keeps sorted key/value entries in leaf blocks and a
//! hierarchy of index blocks above them, all stored through a
//! [`BlockStore`]. The tree's root, height and size live in the store's
//! reserve area (see [`Descriptor`]).
//!
//! ## Structure
//!
//! ```text
//! leaf_level = -1:   [root leaf]
//!
//! leaf_level = 0:         [root index]
//!                       /      |      \
//!                 [leaf]    [leaf]    [leaf]
//! ```
//!
//! An index block with N separators has N + 1 children: the left child of
//! each separator plus the block's last pointer. A key equal to a separator
//! lives to the right of it.
//!
//! ## Concurrency
//!
//! Reads take `&self` and mutations take `&mut self`. To share a tree across
//! threads wrap it in `Arc<parking_lot::RwLock<_>>`.

mod bulk;
mod descriptor;
mod iter;
mod rank;
mod rebalance;
mod verify;

pub use self::descriptor::{Descriptor, DESCRIPTOR_SIZE};
pub use self::iter::TreeIter;
pub use self::rank::RankSnapshot;

use crate::block::{IndexBlock, LeafBlock, SearchResult, BLOCK_HEADER_SIZE};
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::{BlockFile, BlockId, BlockStore, Pool, SplitBlockFile};
use log::{info, warn};
use std::ops::{Bound, RangeBounds};
use std::path::Path;

/// A tree stored in a plain [`BlockFile`].
pub type FileTree<K, V> = BPlusTree<BlockFile, K, V>;

/// A tree whose index blocks live in the region pool of a [`SplitBlockFile`].
pub type SplitTree<K, V> = BPlusTree<SplitBlockFile, K, V>;

/// One index block visited on the way from the root to a leaf.
#[derive(Debug, Clone)]
pub(crate) struct PathStep<K> {
    /// Block number of the index block.
    pub block: BlockId,
    /// The index block as read during the descent.
    pub node: IndexBlock<K>,
    /// Child position taken.
    pub pos: usize,
}

/// A disk-resident B+Tree mapping `K::Item` keys to `V::Item` values.
pub struct BPlusTree<S: BlockStore, K: KeyCodec, V: Codec> {
    store: S,
    key_codec: K,
    value_codec: V,
    descriptor: Descriptor,
    /// The descriptor changed since the last save.
    dirty: bool,
}

impl<S: BlockStore, K: KeyCodec, V: Codec> BPlusTree<S, K, V> {
    /// Opens the tree kept in `store`, initializing an empty tree if the
    /// store's reserve area was never written.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use blocktree::codec::{StringCodec, U64Codec};
    /// use blocktree::{BPlusTree, BlockFile, Options};
    ///
    /// # fn main() -> Result<(), blocktree::Error> {
    /// let store = BlockFile::open("./tree.blk", Options::default())?;
    /// let mut tree = BPlusTree::open(store, StringCodec, U64Codec)?;
    /// tree.put(&"apples".to_string(), &3)?;
    /// assert_eq!(tree.get(&"apples".to_string())?, Some(3));
    /// tree.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(mut store: S, key_codec: K, value_codec: V) -> Result<Self> {
        if store.reserve_size() < DESCRIPTOR_SIZE {
            return Err(Error::invalid_argument(format!(
                "reserve area must hold at least {} bytes, store has {}",
                DESCRIPTOR_SIZE,
                store.reserve_size()
            )));
        }

        let descriptor = match Descriptor::decode(&store.reserve()?)? {
            Some(descriptor) => {
                let pool = if descriptor.leaf_level < 0 { Pool::Leaf } else { Pool::Index };
                if !store.is_allocated(pool, descriptor.root) {
                    return Err(Error::corruption(format!(
                        "Root block {} is not allocated",
                        descriptor.root
                    )));
                }
                info!(
                    "Opened tree with {} entries (root {}, leaf level {})",
                    descriptor.size, descriptor.root, descriptor.leaf_level
                );
                descriptor
            }
            None => {
                let empty = LeafBlock::new(key_codec.clone(), value_codec.clone(), store.block_size(Pool::Leaf));
                let root = store.allocate(Pool::Leaf, &empty.to_bytes())?;
                let descriptor = Descriptor::empty(root);
                store.set_reserve(&descriptor.encode()?)?;
                store.sync()?;
                info!("Initialized empty tree with root leaf {}", root);
                descriptor
            }
        };

        Ok(Self { store, key_codec, value_codec, descriptor, dirty: false })
    }

    /// Inserts or replaces the value for `key`. Returns the previous value.
    pub fn put(&mut self, key: &K::Item, value: &V::Item) -> Result<Option<V::Item>> {
        self.insert(key, value, true)
    }

    /// Inserts `value` only if `key` is absent. Returns the existing value
    /// when the key was already present, leaving it unchanged.
    pub fn put_if_absent(&mut self, key: &K::Item, value: &V::Item) -> Result<Option<V::Item>> {
        self.insert(key, value, false)
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &K::Item) -> Result<Option<V::Item>> {
        let probe = self.key_codec.encode_to_vec(key)?;
        let leaf = self.load_leaf(self.find_leaf(&probe)?)?;
        match leaf.binary_search_encoded(&probe)? {
            SearchResult::Found(i) => Ok(Some(leaf.payload(i)?)),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Looks up `key` and returns the stored key together with its value.
    pub fn get_key_value(&self, key: &K::Item) -> Result<Option<(K::Item, V::Item)>> {
        let probe = self.key_codec.encode_to_vec(key)?;
        let leaf = self.load_leaf(self.find_leaf(&probe)?)?;
        match leaf.binary_search_encoded(&probe)? {
            SearchResult::Found(i) => Ok(Some((leaf.key(i)?, leaf.payload(i)?))),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K::Item) -> Result<bool> {
        let probe = self.key_codec.encode_to_vec(key)?;
        let leaf = self.load_leaf(self.find_leaf(&probe)?)?;
        Ok(leaf.binary_search_encoded(&probe)?.is_found())
    }

    /// Removes `key`, returning its value. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &K::Item) -> Result<Option<V::Item>> {
        let probe = self.key_codec.encode_to_vec(key)?;
        let (path, leaf_id) = self.find_path(&probe)?;
        let mut leaf = self.load_leaf(leaf_id)?;
        let index = match leaf.binary_search_encoded(&probe)? {
            SearchResult::Found(i) => i,
            SearchResult::NotFound(_) => return Ok(None),
        };
        let previous = leaf.payload(index)?;
        leaf.remove_at(index);
        self.descriptor.size -= 1;
        self.dirty = true;

        let fixup = self.settle_leaf(&path, leaf_id, leaf)?;
        self.propagate(path, fixup)?;
        Ok(Some(previous))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.descriptor.size
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.descriptor.size == 0
    }

    /// Iterates every entry in ascending key order.
    pub fn iter(&self) -> Result<TreeIter<'_, S, K, V>> {
        TreeIter::new(self, false, Bound::Unbounded, Bound::Unbounded)
    }

    /// Iterates entries between `from` and `to`.
    ///
    /// `from` is always the lower bound and `to` the upper bound; `descending`
    /// only reverses the order in which the range is produced.
    pub fn iterator(&self, descending: bool, from: Bound<K::Item>, to: Bound<K::Item>) -> Result<TreeIter<'_, S, K, V>> {
        TreeIter::new(self, descending, from, to)
    }

    /// Iterates the entries within `range` in ascending key order.
    pub fn range<R>(&self, range: R) -> Result<TreeIter<'_, S, K, V>>
    where
        R: RangeBounds<K::Item>,
        K::Item: Clone,
    {
        TreeIter::new(self, false, range.start_bound().cloned(), range.end_bound().cloned())
    }

    /// Writes the descriptor to the reserve area and syncs the store.
    pub fn save(&mut self) -> Result<()> {
        let encoded = self.descriptor.encode()?;
        self.store.set_reserve(&encoded)?;
        self.store.sync()?;
        self.dirty = false;
        Ok(())
    }

    /// Saves and closes the tree.
    pub fn close(mut self) -> Result<()> {
        self.save()?;
        info!("Closed tree with {} entries", self.descriptor.size);
        Ok(())
    }

    /// Closes the tree without saving and removes its backing file.
    pub fn delete(mut self) -> Result<()> {
        let path = self.store.path().map(Path::to_path_buf);
        self.dirty = false;
        drop(self);
        if let Some(path) = path {
            std::fs::remove_file(&path)?;
            info!("Deleted tree file {:?}", path);
        }
        Ok(())
    }

    /// Removes every entry, freeing all blocks, and saves the empty tree.
    pub fn truncate(&mut self) -> Result<()> {
        let (index_blocks, leaves) = self.collect_blocks()?;
        for block in index_blocks {
            self.store.free(Pool::Index, block)?;
        }
        for block in leaves {
            self.store.free(Pool::Leaf, block)?;
        }

        let empty = self.new_leaf();
        let root = self.allocate_leaf(&empty)?;
        self.descriptor = Descriptor::empty(root);
        self.dirty = true;
        self.save()?;
        info!("Truncated tree, new root leaf {}", root);
        Ok(())
    }

    /// Depth of the index levels; -1 when the root is a leaf.
    pub fn leaf_level(&self) -> i32 {
        self.descriptor.leaf_level
    }

    /// Block number of the root.
    pub fn root_block(&self) -> BlockId {
        self.descriptor.root
    }

    /// The current descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The underlying block store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Largest encoded leaf entry (key plus value) accepted.
    pub fn max_entry_size(&self) -> usize {
        (self.store.block_size(Pool::Leaf) - BLOCK_HEADER_SIZE) / 3
    }

    /// Largest encoded key accepted.
    pub fn max_key_size(&self) -> usize {
        let separator = (self.store.block_size(Pool::Index) - BLOCK_HEADER_SIZE) / 3;
        separator.saturating_sub(4).min(self.max_entry_size())
    }

    fn insert(&mut self, key: &K::Item, value: &V::Item, overwrite: bool) -> Result<Option<V::Item>> {
        let key_bytes = self.key_codec.encode_to_vec(key)?;
        let entry = self.encode_entry(&key_bytes, value)?;
        self.check_entry_size(&key_bytes, &entry)?;

        let (path, leaf_id) = self.find_path(&key_bytes)?;
        let mut leaf = self.load_leaf(leaf_id)?;
        let previous = match leaf.binary_search_encoded(&key_bytes)? {
            SearchResult::Found(i) => {
                let previous = leaf.payload(i)?;
                if !overwrite {
                    return Ok(Some(previous));
                }
                leaf.remove_at(i);
                Some(previous)
            }
            SearchResult::NotFound(_) => None,
        };
        leaf.insert_unchecked(&entry)?;
        if previous.is_none() {
            self.descriptor.size += 1;
        }
        self.dirty = true;

        let fixup = self.settle_leaf(&path, leaf_id, leaf)?;
        self.propagate(path, fixup)?;
        Ok(previous)
    }

    pub(crate) fn check_entry_size(&self, key: &[u8], entry: &[u8]) -> Result<()> {
        if entry.len() > self.max_entry_size() {
            return Err(Error::invalid_argument(format!(
                "entry of {} bytes exceeds the {} byte limit",
                entry.len(),
                self.max_entry_size()
            )));
        }
        if key.len() > self.max_key_size() {
            return Err(Error::invalid_argument(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                self.max_key_size()
            )));
        }
        Ok(())
    }

    pub(crate) fn encode_entry(&self, key: &[u8], value: &V::Item) -> Result<Vec<u8>> {
        let mut entry = Vec::with_capacity(key.len() + self.value_codec.encoded_size(value)?);
        entry.extend_from_slice(key);
        self.value_codec.encode(value, &mut entry)?;
        Ok(entry)
    }

    pub(crate) fn key_codec(&self) -> &K {
        &self.key_codec
    }

    pub(crate) fn new_leaf(&self) -> LeafBlock<K, V> {
        LeafBlock::new(self.key_codec.clone(), self.value_codec.clone(), self.store.block_size(Pool::Leaf))
    }

    pub(crate) fn new_index(&self) -> IndexBlock<K> {
        IndexBlock::new_index(self.key_codec.clone(), self.store.block_size(Pool::Index))
    }

    pub(crate) fn load_leaf(&self, block: BlockId) -> Result<LeafBlock<K, V>> {
        LeafBlock::from_bytes(
            self.key_codec.clone(),
            self.value_codec.clone(),
            self.store.read(Pool::Leaf, block)?,
            self.store.block_size(Pool::Leaf),
        )
    }

    pub(crate) fn load_index(&self, block: BlockId) -> Result<IndexBlock<K>> {
        IndexBlock::from_bytes(
            self.key_codec.clone(),
            crate::codec::U32Codec,
            self.store.read(Pool::Index, block)?,
            self.store.block_size(Pool::Index),
        )
    }

    pub(crate) fn write_leaf(&mut self, block: BlockId, leaf: &LeafBlock<K, V>) -> Result<()> {
        self.store.write(Pool::Leaf, block, &leaf.to_bytes())
    }

    pub(crate) fn write_index(&mut self, block: BlockId, node: &IndexBlock<K>) -> Result<()> {
        self.store.write(Pool::Index, block, &node.to_bytes())
    }

    pub(crate) fn allocate_leaf(&mut self, leaf: &LeafBlock<K, V>) -> Result<BlockId> {
        self.store.allocate(Pool::Leaf, &leaf.to_bytes())
    }

    pub(crate) fn allocate_index(&mut self, node: &IndexBlock<K>) -> Result<BlockId> {
        self.store.allocate(Pool::Index, &node.to_bytes())
    }

    pub(crate) fn free_block(&mut self, pool: Pool, block: BlockId) -> Result<()> {
        self.store.free(pool, block)
    }

    /// Descends from the root towards `probe`, keeping every index block
    /// visited. Returns the path and the leaf reached.
    pub(crate) fn find_path(&self, probe: &[u8]) -> Result<(Vec<PathStep<K>>, BlockId)> {
        let mut path = Vec::with_capacity((self.descriptor.leaf_level + 1).max(0) as usize);
        let mut block = self.descriptor.root;
        for _ in 0..=self.descriptor.leaf_level {
            let node = self.load_index(block)?;
            let pos = node.binary_search_encoded(probe)?.child_position();
            let child = node.child(pos)?;
            path.push(PathStep { block, node, pos });
            block = child;
        }
        Ok((path, block))
    }

    /// The leaf that holds or would hold `probe`.
    pub(crate) fn find_leaf(&self, probe: &[u8]) -> Result<BlockId> {
        let mut block = self.descriptor.root;
        for _ in 0..=self.descriptor.leaf_level {
            let node = self.load_index(block)?;
            block = node.child(node.binary_search_encoded(probe)?.child_position())?;
        }
        Ok(block)
    }

    /// The first (or last) leaf in key order.
    pub(crate) fn edge_leaf(&self, last: bool) -> Result<BlockId> {
        let mut block = self.descriptor.root;
        for _ in 0..=self.descriptor.leaf_level {
            let node = self.load_index(block)?;
            block = node.child(if last { node.len() } else { 0 })?;
        }
        Ok(block)
    }

    /// All index blocks (pre-order) and all leaves (key order).
    pub(crate) fn collect_blocks(&self) -> Result<(Vec<BlockId>, Vec<BlockId>)> {
        let mut index_blocks = Vec::new();
        let mut leaves = Vec::new();
        if self.descriptor.leaf_level < 0 {
            leaves.push(self.descriptor.root);
            return Ok((index_blocks, leaves));
        }

        let mut stack = vec![(self.descriptor.root, 0)];
        while let Some((block, level)) = stack.pop() {
            index_blocks.push(block);
            let children = self.load_index(block)?.children()?;
            if level == self.descriptor.leaf_level {
                leaves.extend(children);
            } else {
                stack.extend(children.into_iter().rev().map(|child| (child, level + 1)));
            }
        }
        Ok((index_blocks, leaves))
    }

    /// Ordered list of leaf block numbers.
    pub(crate) fn leaf_blocks(&self) -> Result<Vec<BlockId>> {
        Ok(self.collect_blocks()?.1)
    }
}

impl<S: BlockStore, K: KeyCodec, V: Codec> Drop for BPlusTree<S, K, V> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.save() {
                warn!("Failed to save tree descriptor on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{StringCodec, U32Codec};
    use crate::config::Options;
    use crate::store::MemoryBlockStore;
    use tempfile::TempDir;

    type Tree = BPlusTree<MemoryBlockStore, U32Codec, U32Codec>;

    /// 32-byte blocks: three u32/u32 entries per leaf.
    fn tiny_tree() -> Tree {
        let options = Options::new().block_size(32).max_blocks(1024).reserve_size(20);
        BPlusTree::open(MemoryBlockStore::new(&options).unwrap(), U32Codec, U32Codec).unwrap()
    }

    fn keys(tree: &Tree) -> Vec<u32> {
        tree.iter().unwrap().map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = tiny_tree();
        assert!(tree.is_empty());
        assert_eq!(tree.leaf_level(), -1);
        assert_eq!(tree.get(&1).unwrap(), None);
        assert!(keys(&tree).is_empty());
        tree.verify().unwrap();
    }

    #[test]
    fn test_put_get_overwrite() {
        let mut tree = tiny_tree();
        assert_eq!(tree.put(&1, &10).unwrap(), None);
        assert_eq!(tree.put(&1, &11).unwrap(), Some(10));
        assert_eq!(tree.get(&1).unwrap(), Some(11));
        assert_eq!(tree.len(), 1);

        assert_eq!(tree.put_if_absent(&1, &12).unwrap(), Some(11));
        assert_eq!(tree.get(&1).unwrap(), Some(11));
        assert_eq!(tree.put_if_absent(&2, &20).unwrap(), None);
        assert_eq!(tree.get_key_value(&2).unwrap(), Some((2, 20)));
        assert!(tree.contains_key(&2).unwrap());
        assert!(!tree.contains_key(&3).unwrap());
    }

    #[test]
    fn test_split_and_collapse() {
        let mut tree = tiny_tree();
        for k in 1..=5 {
            tree.put(&k, &(k * 10)).unwrap();
        }
        // [1, 2] | 3 | [3, 4, 5]
        assert_eq!(tree.leaf_level(), 0);
        assert_eq!(tree.store().allocated_count(Pool::Leaf), 3);
        tree.verify().unwrap();

        tree.remove(&3).unwrap();
        assert_eq!(tree.leaf_level(), 0);
        tree.remove(&4).unwrap();
        // [5] merges into [1, 2] and the root index disappears.
        assert_eq!(tree.leaf_level(), -1);
        assert_eq!(keys(&tree), vec![1, 2, 5]);
        assert_eq!(tree.store().allocated_count(Pool::Leaf), 1);
        tree.verify().unwrap();
    }

    #[test]
    fn test_remove_absent() {
        let mut tree = tiny_tree();
        tree.put(&1, &1).unwrap();
        assert_eq!(tree.remove(&2).unwrap(), None);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.remove(&1).unwrap(), Some(1));
        assert_eq!(tree.remove(&1).unwrap(), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_grow_and_shrink_many_levels() {
        let mut tree = tiny_tree();
        for k in 0..500 {
            tree.put(&k, &k).unwrap();
        }
        assert!(tree.leaf_level() >= 2);
        tree.verify().unwrap();
        assert_eq!(keys(&tree), (0..500).collect::<Vec<_>>());

        for k in (0..500).step_by(2) {
            assert_eq!(tree.remove(&k).unwrap(), Some(k));
        }
        tree.verify().unwrap();
        for k in (1..500).step_by(2) {
            assert_eq!(tree.remove(&k).unwrap(), Some(k));
        }
        tree.verify().unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.leaf_level(), -1);
    }

    #[test]
    fn test_entry_size_limit() {
        let options = Options::new().block_size(64).reserve_size(20);
        let store = MemoryBlockStore::new(&options).unwrap();
        let mut tree = BPlusTree::open(store, StringCodec, U32Codec).unwrap();
        // (64 - 8) / 3 = 18 bytes per entry: 4 length + key + 4 value.
        assert_eq!(tree.max_entry_size(), 18);
        tree.put(&"x".repeat(10), &1).unwrap();
        let err = tree.put(&"x".repeat(11), &1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_truncate() {
        let mut tree = tiny_tree();
        for k in 0..100 {
            tree.put(&k, &k).unwrap();
        }
        tree.truncate().unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.leaf_level(), -1);
        assert_eq!(tree.store().allocated_count(Pool::Leaf), 1);
        tree.put(&7, &7).unwrap();
        assert_eq!(keys(&tree), vec![7]);
    }

    #[test]
    fn test_reopen_file_tree() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.blk");
        let options = Options::new().block_size(128).max_blocks(4096);
        {
            let store = BlockFile::open(&path, options.clone()).unwrap();
            let mut tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
            for k in 0..1000 {
                tree.put(&k, &(k + 1)).unwrap();
            }
            tree.close().unwrap();
        }

        let store = BlockFile::open(&path, options).unwrap();
        let tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
        assert_eq!(tree.len(), 1000);
        assert_eq!(tree.get(&500).unwrap(), Some(501));
        tree.verify().unwrap();
    }

    #[test]
    fn test_drop_saves_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.blk");
        {
            let store = BlockFile::open(&path, Options::default()).unwrap();
            let mut tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
            tree.put(&1, &1).unwrap();
        }
        let store = BlockFile::open(&path, Options::default()).unwrap();
        let tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_delete_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tree.blk");
        let store = BlockFile::open(&path, Options::default()).unwrap();
        let mut tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
        tree.put(&1, &1).unwrap();
        tree.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_descriptor() {
        let mut store = MemoryBlockStore::new(&Options::default()).unwrap();
        let mut encoded = Descriptor::empty(0).encode().unwrap();
        encoded[2] ^= 0x01;
        store.set_reserve(&encoded).unwrap();
        let err = BPlusTree::open(store, U32Codec, U32Codec).err().unwrap();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
