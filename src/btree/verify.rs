//! Structural consistency check.

use super::BPlusTree;
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::{BlockId, BlockStore, Pool};
use std::cmp::Ordering;

/// Key range a subtree must stay within: `lower` inclusive, `upper` exclusive.
struct KeyRange<'a> {
    lower: Option<&'a [u8]>,
    upper: Option<&'a [u8]>,
}

impl<S: BlockStore, K: KeyCodec, V: Codec> BPlusTree<S, K, V> {
    /// Walks the whole tree and checks its invariants: keys ascend within
    /// every block and respect the separators above them, all leaves sit at
    /// the same depth, every block is allocated and the leaf entries add up
    /// to the recorded size.
    pub fn verify(&self) -> Result<()> {
        let range = KeyRange { lower: None, upper: None };
        let count = self.verify_subtree(self.descriptor.root, 0, &range)?;
        if count != self.descriptor.size {
            return Err(Error::corruption(format!(
                "Leaves hold {} entries, descriptor records {}",
                count, self.descriptor.size
            )));
        }
        Ok(())
    }

    fn verify_subtree(&self, block: BlockId, depth: i32, range: &KeyRange<'_>) -> Result<usize> {
        let is_leaf = depth > self.descriptor.leaf_level;
        let pool = if is_leaf { Pool::Leaf } else { Pool::Index };
        if !self.store.is_allocated(pool, block) {
            return Err(Error::corruption(format!("{} block {} is referenced but not allocated", pool, block)));
        }

        if is_leaf {
            let leaf = self.load_leaf(block)?;
            let keys = (0..leaf.len()).map(|i| leaf.key_bytes(i)).collect::<Result<Vec<_>>>()?;
            self.check_keys(block, &keys, range)?;
            return Ok(leaf.len());
        }

        let node = self.load_index(block)?;
        let keys = (0..node.len()).map(|i| node.key_bytes(i)).collect::<Result<Vec<_>>>()?;
        self.check_keys(block, &keys, range)?;

        let children = node.children()?;
        let mut count = 0;
        for (pos, child) in children.into_iter().enumerate() {
            let child_range = KeyRange {
                lower: if pos == 0 { range.lower } else { Some(keys[pos - 1]) },
                upper: keys.get(pos).copied().or(range.upper),
            };
            count += self.verify_subtree(child, depth + 1, &child_range)?;
        }
        Ok(count)
    }

    fn check_keys(&self, block: BlockId, keys: &[&[u8]], range: &KeyRange<'_>) -> Result<()> {
        for pair in keys.windows(2) {
            if self.key_codec.compare_encoded(pair[0], pair[1])? != Ordering::Less {
                return Err(Error::corruption(format!("Keys out of order in block {}", block)));
            }
        }
        if let (Some(lower), Some(first)) = (range.lower, keys.first()) {
            if self.key_codec.compare_encoded(first, lower)? == Ordering::Less {
                return Err(Error::corruption(format!("Block {} has a key below its separator", block)));
            }
        }
        if let (Some(upper), Some(last)) = (range.upper, keys.last()) {
            if self.key_codec.compare_encoded(last, upper)? != Ordering::Less {
                return Err(Error::corruption(format!("Block {} has a key at or above its separator", block)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::IndexBlock;
    use crate::codec::U32Codec;
    use crate::config::Options;
    use crate::store::MemoryBlockStore;

    fn tree_with(n: u32) -> BPlusTree<MemoryBlockStore, U32Codec, U32Codec> {
        let options = Options::new().block_size(32).max_blocks(1024).reserve_size(20);
        let mut tree = BPlusTree::open(MemoryBlockStore::new(&options).unwrap(), U32Codec, U32Codec).unwrap();
        for k in 0..n {
            tree.put(&k, &k).unwrap();
        }
        tree
    }

    #[test]
    fn test_verify_healthy_tree() {
        tree_with(0).verify().unwrap();
        tree_with(200).verify().unwrap();
    }

    #[test]
    fn test_verify_detects_size_mismatch() {
        let mut tree = tree_with(10);
        tree.descriptor.size = 11;
        assert!(matches!(tree.verify(), Err(Error::Corruption(_))));
        tree.descriptor.size = 10;
    }

    #[test]
    fn test_verify_detects_bad_separator() {
        let mut tree = tree_with(5);
        assert_eq!(tree.leaf_level(), 0);
        let root = tree.root_block();
        let mut node: IndexBlock<U32Codec> = tree.load_index(root).unwrap();
        node.replace_separator(0, &1u32.to_be_bytes()).unwrap();
        tree.write_index(root, &node).unwrap();
        assert!(matches!(tree.verify(), Err(Error::Corruption(_))));
    }
}
