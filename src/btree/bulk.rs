//! Bulk loading of sorted input.
//!
//! Leaves are packed left to right. Each time a leaf fills up it is written
//! out and a separator for it is pushed into the open index block one level
//! up; a full index block is written the same way, promoting its last
//! separator. Only the rightmost block of every level is held in memory.
//!
//! ```text
//! level 1:  [open]
//! level 0:  [written] [written] [open]
//! leaves:   [w] [w] [w] [w] [w] [w] [prev] [open]
//! ```

use super::{BPlusTree, Descriptor};
use crate::block::{separator, IndexBlock, LeafBlock};
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::{BlockId, BlockStore, Pool};
use log::{debug, info, warn};
use std::cmp::Ordering;

use super::rebalance::shift_leaf_entries;

struct BulkLoader<K: KeyCodec, V: Codec> {
    /// Every block written so far, released again if the load fails.
    allocated: Vec<(Pool, BlockId)>,
    /// Open index block per level, lowest first.
    levels: Vec<IndexBlock<K>>,
    /// The most recently written leaf.
    prev: Option<(BlockId, LeafBlock<K, V>)>,
    leaf: LeafBlock<K, V>,
    count: usize,
}

impl<S: BlockStore, K: KeyCodec, V: Codec> BPlusTree<S, K, V> {
    /// Builds the tree from `entries`, which must be sorted by strictly
    /// ascending key. The tree must be empty.
    ///
    /// On error every block written by the load is released and the tree is
    /// left empty.
    pub fn create_index<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K::Item, V::Item)>,
    {
        if !self.is_empty() {
            return Err(Error::invalid_state(format!(
                "bulk load requires an empty tree, tree has {} entries",
                self.len()
            )));
        }

        let (index_blocks, leaves) = self.collect_blocks()?;
        for block in index_blocks {
            self.free_block(Pool::Index, block)?;
        }
        for block in leaves {
            self.free_block(Pool::Leaf, block)?;
        }

        let mut loader = BulkLoader {
            allocated: Vec::new(),
            levels: Vec::new(),
            prev: None,
            leaf: self.new_leaf(),
            count: 0,
        };

        match self.bulk_load(&mut loader, entries.into_iter()) {
            Ok(()) => {
                self.dirty = true;
                self.save()?;
                info!(
                    "Bulk loaded {} entries into {} blocks (leaf level {})",
                    loader.count,
                    loader.allocated.len(),
                    self.descriptor.leaf_level
                );
                Ok(())
            }
            Err(e) => {
                for (pool, block) in loader.allocated.drain(..).rev() {
                    if let Err(free_err) = self.free_block(pool, block) {
                        warn!("Failed to release {} block {} after bulk load error: {}", pool, block, free_err);
                    }
                }
                let empty = self.new_leaf();
                let root = self.allocate_leaf(&empty)?;
                self.descriptor = Descriptor::empty(root);
                self.dirty = true;
                Err(e)
            }
        }
    }

    fn bulk_load(&mut self, loader: &mut BulkLoader<K, V>, entries: impl Iterator<Item = (K::Item, V::Item)>) -> Result<()> {
        let mut last_key: Option<Vec<u8>> = None;
        for (key, value) in entries {
            let key_bytes = self.key_codec.encode_to_vec(&key)?;
            let entry = self.encode_entry(&key_bytes, &value)?;
            self.check_entry_size(&key_bytes, &entry)?;
            if let Some(last) = &last_key {
                if self.key_codec.compare_encoded(last, &key_bytes)? != Ordering::Less {
                    return Err(Error::invalid_argument(format!(
                        "bulk load input is not strictly ascending at entry {}",
                        loader.count
                    )));
                }
            }

            if !loader.leaf.fits(&entry) {
                self.flush_leaf(loader, &key_bytes)?;
            }
            loader.leaf.insert_unsorted(&entry)?;
            loader.count += 1;
            last_key = Some(key_bytes);
        }
        self.finish_bulk(loader)
    }

    /// Writes the open leaf and pushes its separator to level 0. `next_key`
    /// is the first key of the following leaf.
    fn flush_leaf(&mut self, loader: &mut BulkLoader<K, V>, next_key: &[u8]) -> Result<()> {
        let full = std::mem::replace(&mut loader.leaf, self.new_leaf());
        let key = separator(&self.key_codec, full.key_bytes(full.len() - 1)?, next_key)?;
        let id = self.allocate_leaf(&full)?;
        loader.allocated.push((Pool::Leaf, id));
        self.push_separator(loader, 0, key, id)?;
        loader.prev = Some((id, full));
        Ok(())
    }

    fn push_separator(&mut self, loader: &mut BulkLoader<K, V>, level: usize, key: Vec<u8>, left: BlockId) -> Result<()> {
        if loader.levels.len() == level {
            loader.levels.push(self.new_index());
        }
        let entry = IndexBlock::<K>::make_entry(&key, left);
        if loader.levels[level].fits(&entry) {
            return loader.levels[level].insert_unsorted(&entry);
        }

        // The last separator moves up; its left child becomes the last pointer.
        let mut full = std::mem::replace(&mut loader.levels[level], self.new_index());
        let last = full.len() - 1;
        let promoted_key = full.key_bytes(last)?.to_vec();
        let promoted_child = full.child(last)?;
        full.remove_at(last);
        full.set_last_pointer(promoted_child);
        let id = self.allocate_index(&full)?;
        loader.allocated.push((Pool::Index, id));
        debug!("Bulk load wrote index block {} at level {} ({} separators)", id, level, full.len());

        loader.levels[level].insert_unsorted(&entry)?;
        self.push_separator(loader, level + 1, promoted_key, id)
    }

    /// Writes the open blocks of every level and installs the new root.
    fn finish_bulk(&mut self, loader: &mut BulkLoader<K, V>) -> Result<()> {
        let mut leaf = std::mem::replace(&mut loader.leaf, self.new_leaf());

        // Even out an underfull final leaf with its predecessor when the
        // replacement separator still fits.
        if let Some((prev_id, prev)) = loader.prev.take() {
            if leaf.is_underflowed() {
                let (mut lower, mut upper) = (prev, leaf.clone());
                if shift_leaf_entries(&mut lower, &mut upper) > 0 {
                    let key = separator(&self.key_codec, lower.key_bytes(lower.len() - 1)?, upper.key_bytes(0)?)?;
                    let mut parent = loader.levels[0].clone();
                    parent.replace_separator(parent.len() - 1, &key)?;
                    if !parent.is_overflowed() {
                        self.write_leaf(prev_id, &lower)?;
                        loader.levels[0] = parent;
                        leaf = upper;
                        debug!("Bulk load rebalanced final leaf with leaf {}", prev_id);
                    }
                }
            }
        }

        let leaf_id = self.allocate_leaf(&leaf)?;
        loader.allocated.push((Pool::Leaf, leaf_id));

        let height = loader.levels.len();
        let mut child = leaf_id;
        for mut node in std::mem::take(&mut loader.levels) {
            node.set_last_pointer(child);
            child = self.allocate_index(&node)?;
            loader.allocated.push((Pool::Index, child));
        }

        self.descriptor = Descriptor { root: child, leaf_level: height as i32 - 1, size: loader.count };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{StringCodec, U32Codec};
    use crate::config::Options;
    use crate::store::MemoryBlockStore;

    type Tree = BPlusTree<MemoryBlockStore, U32Codec, U32Codec>;

    fn tiny_tree() -> Tree {
        let options = Options::new().block_size(32).max_blocks(4096).reserve_size(20);
        BPlusTree::open(MemoryBlockStore::new(&options).unwrap(), U32Codec, U32Codec).unwrap()
    }

    fn leaf_sizes(tree: &Tree) -> Vec<usize> {
        tree.leaf_blocks()
            .unwrap()
            .into_iter()
            .map(|block| tree.load_leaf(block).unwrap().len())
            .collect()
    }

    #[test]
    fn test_bulk_matches_incremental() {
        let mut bulk = tiny_tree();
        bulk.create_index((0..1000).map(|k| (k, k + 1))).unwrap();
        bulk.verify().unwrap();

        let mut incremental = tiny_tree();
        for k in 0..1000 {
            incremental.put(&k, &(k + 1)).unwrap();
        }

        assert_eq!(bulk.len(), 1000);
        let a: Vec<_> = bulk.iter().unwrap().map(|r| r.unwrap()).collect();
        let b: Vec<_> = incremental.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(a, b);
        assert_eq!(bulk.get(&777).unwrap(), Some(778));
        assert!(bulk.leaf_level() >= 2);
    }

    #[test]
    fn test_bulk_tree_accepts_updates() {
        let mut tree = tiny_tree();
        tree.create_index((0..200).map(|k| (k * 2, k))).unwrap();
        for k in 0..200 {
            tree.put(&(k * 2 + 1), &k).unwrap();
        }
        for k in 0..100 {
            tree.remove(&(k * 4)).unwrap();
        }
        tree.verify().unwrap();
        assert_eq!(tree.len(), 300);
    }

    #[test]
    fn test_final_leaf_rebalanced() {
        let mut tree = tiny_tree();
        tree.create_index((1..=7).map(|k| (k, k))).unwrap();
        // [1, 2, 3] [4, 5, 6] [7] becomes [1, 2, 3] [4, 5] [6, 7].
        assert_eq!(leaf_sizes(&tree), vec![3, 2, 2]);
        assert_eq!(tree.leaf_level(), 0);
        tree.verify().unwrap();
    }

    #[test]
    fn test_empty_input() {
        let mut tree = tiny_tree();
        tree.create_index(std::iter::empty()).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.leaf_level(), -1);
        tree.put(&1, &1).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_requires_empty_tree() {
        let mut tree = tiny_tree();
        tree.put(&1, &1).unwrap();
        let err = tree.create_index([(2, 2)]).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_unsorted_input_leaves_tree_empty() {
        let mut tree = tiny_tree();
        let entries = (0..50).map(|k| (k, k)).chain([(10, 10)]);
        let err = tree.create_index(entries).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        assert!(tree.is_empty());
        assert_eq!(tree.leaf_level(), -1);
        assert_eq!(tree.store().allocated_count(Pool::Leaf), 1);
        tree.put(&3, &3).unwrap();
        tree.verify().unwrap();
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let options = Options::new().block_size(64).reserve_size(20);
        let store = MemoryBlockStore::new(&options).unwrap();
        let mut tree = BPlusTree::open(store, StringCodec, U32Codec).unwrap();
        let err = tree
            .create_index([("a".to_string(), 1), ("b".repeat(40), 2)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(tree.is_empty());
    }
}
