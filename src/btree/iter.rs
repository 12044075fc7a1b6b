//! Ordered iteration over a range of the tree.

use super::BPlusTree;
use crate::block::{BlockCursor, LeafBlock};
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::{BlockId, BlockStore};
use std::ops::Bound;

/// Iterator over the entries of a [`BPlusTree`] within key bounds.
///
/// The ordered list of leaves is collected once when the iterator is
/// created; each leaf is read when the iterator reaches it. Errors are
/// yielded once, after which the iterator is exhausted.
pub struct TreeIter<'a, S: BlockStore, K: KeyCodec, V: Codec> {
    tree: &'a BPlusTree<S, K, V>,
    leaves: Vec<BlockId>,
    /// Index into `leaves` of the leaf to visit next, or being visited.
    position: usize,
    current: Option<(LeafBlock<K, V>, BlockCursor)>,
    lower: Bound<K::Item>,
    upper: Bound<K::Item>,
    descending: bool,
    done: bool,
}

fn bound_key<T>(bound: &Bound<T>) -> Option<&T> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    }
}

impl<'a, S: BlockStore, K: KeyCodec, V: Codec> TreeIter<'a, S, K, V> {
    pub(crate) fn new(
        tree: &'a BPlusTree<S, K, V>,
        descending: bool,
        lower: Bound<K::Item>,
        upper: Bound<K::Item>,
    ) -> Result<Self> {
        let leaves = tree.leaf_blocks()?;

        // Ascending starts at the leaf holding the lower bound, descending at
        // the leaf holding the upper bound.
        let start_bound = if descending { &upper } else { &lower };
        let start = match bound_key(start_bound) {
            Some(key) => tree.find_leaf(&tree.key_codec().encode_to_vec(key)?)?,
            None => tree.edge_leaf(descending)?,
        };
        let position = leaves
            .iter()
            .position(|&leaf| leaf == start)
            .ok_or_else(|| Error::corruption(format!("Leaf {} is missing from the leaf list", start)))?;

        Ok(Self { tree, leaves, position, current: None, lower, upper, descending, done: false })
    }

    fn advance(&mut self) -> Result<Option<(K::Item, V::Item)>> {
        loop {
            if self.current.is_none() {
                let leaf = self.tree.load_leaf(self.leaves[self.position])?;
                let cursor = leaf.cursor(self.lower.as_ref(), self.upper.as_ref(), self.descending)?;
                self.current = Some((leaf, cursor));
            }

            if let Some((leaf, cursor)) = self.current.as_mut() {
                if let Some(index) = cursor.next_index() {
                    return Ok(Some((leaf.key(index)?, leaf.payload(index)?)));
                }
                if cursor.reached_bound() {
                    return Ok(None);
                }
            }

            self.current = None;
            if self.descending {
                if self.position == 0 {
                    return Ok(None);
                }
                self.position -= 1;
            } else {
                self.position += 1;
                if self.position == self.leaves.len() {
                    return Ok(None);
                }
            }
        }
    }
}

impl<S: BlockStore, K: KeyCodec, V: Codec> Iterator for TreeIter<'_, S, K, V> {
    type Item = Result<(K::Item, V::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::U32Codec;
    use crate::config::Options;
    use crate::store::MemoryBlockStore;

    fn tree_with(keys: impl IntoIterator<Item = u32>) -> BPlusTree<MemoryBlockStore, U32Codec, U32Codec> {
        let options = Options::new().block_size(32).max_blocks(4096).reserve_size(20);
        let mut tree = BPlusTree::open(MemoryBlockStore::new(&options).unwrap(), U32Codec, U32Codec).unwrap();
        for k in keys {
            tree.put(&k, &(k * 2)).unwrap();
        }
        tree
    }

    fn collect(iter: TreeIter<'_, MemoryBlockStore, U32Codec, U32Codec>) -> Vec<u32> {
        iter.map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_half_open_range() {
        let tree = tree_with([10, 20, 30, 40, 50]);
        let iter = tree.iterator(false, Bound::Included(20), Bound::Excluded(40)).unwrap();
        assert_eq!(collect(iter), vec![20, 30]);
        assert_eq!(collect(tree.range(20..40).unwrap()), vec![20, 30]);
        assert_eq!(collect(tree.range(20..=40).unwrap()), vec![20, 30, 40]);
    }

    #[test]
    fn test_descending_uses_same_bounds() {
        let tree = tree_with([10, 20, 30, 40, 50]);
        let iter = tree.iterator(true, Bound::Included(20), Bound::Excluded(40)).unwrap();
        assert_eq!(collect(iter), vec![30, 20]);
        let iter = tree.iterator(true, Bound::Unbounded, Bound::Unbounded).unwrap();
        assert_eq!(collect(iter), vec![50, 40, 30, 20, 10]);
    }

    #[test]
    fn test_across_many_leaves() {
        let tree = tree_with(0..300);
        assert!(tree.leaf_level() >= 1);
        assert_eq!(collect(tree.iter().unwrap()), (0..300).collect::<Vec<_>>());

        let iter = tree.iterator(false, Bound::Excluded(99), Bound::Included(205)).unwrap();
        assert_eq!(collect(iter), (100..=205).collect::<Vec<_>>());

        let iter = tree.iterator(true, Bound::Included(17), Bound::Excluded(250)).unwrap();
        assert_eq!(collect(iter), (17..250).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_ranges() {
        let tree = tree_with(0..100);
        assert!(collect(tree.range(500..600).unwrap()).is_empty());
        assert!(collect(tree.iterator(false, Bound::Included(60), Bound::Included(40)).unwrap()).is_empty());
        assert!(collect(tree.iterator(true, Bound::Unbounded, Bound::Excluded(0)).unwrap()).is_empty());

        let empty = tree_with([]);
        assert!(collect(empty.iter().unwrap()).is_empty());
    }

    #[test]
    fn test_values() {
        let tree = tree_with([3, 1, 2]);
        let entries: Vec<_> = tree.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(entries, vec![(1, 2), (2, 4), (3, 6)]);
    }
}
