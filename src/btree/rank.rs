//! Rank and position queries.

use super::BPlusTree;
use crate::block::SearchResult;
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::BlockStore;

/// Where a key sits in the tree's key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankSnapshot {
    /// Keys in the whole tree strictly smaller than the probed key.
    pub smaller_global: usize,
    /// Entries in the tree.
    pub total_elements: usize,
    /// Keys in the probed key's leaf strictly smaller than it.
    pub smaller_in_block: usize,
    /// Entries in the probed key's leaf.
    pub elements_in_block: usize,
    /// Whether the probed key is present.
    pub exists: bool,
}

impl<S: BlockStore, K: KeyCodec, V: Codec> BPlusTree<S, K, V> {
    /// Position of `key`, or `None` if it is absent.
    pub fn get_position(&self, key: &K::Item) -> Result<Option<RankSnapshot>> {
        let snapshot = self.get_position_with_missing(key)?;
        Ok(snapshot.exists.then_some(snapshot))
    }

    /// Position `key` has, or would have if it were inserted.
    pub fn get_position_with_missing(&self, key: &K::Item) -> Result<RankSnapshot> {
        let probe = self.key_codec().encode_to_vec(key)?;
        let target = self.find_leaf(&probe)?;
        let leaf = self.load_leaf(target)?;
        let (smaller_in_block, exists) = match leaf.binary_search_encoded(&probe)? {
            SearchResult::Found(i) => (i, true),
            SearchResult::NotFound(i) => (i, false),
        };

        let mut smaller_before = 0;
        let mut found = false;
        for block in self.leaf_blocks()? {
            if block == target {
                found = true;
                break;
            }
            smaller_before += self.load_leaf(block)?.len();
        }
        if !found {
            return Err(Error::corruption(format!("Leaf {} is missing from the leaf list", target)));
        }

        Ok(RankSnapshot {
            smaller_global: smaller_before + smaller_in_block,
            total_elements: self.len(),
            smaller_in_block,
            elements_in_block: leaf.len(),
            exists,
        })
    }

    /// The key with `rank` smaller keys (0-based), if `rank < len()`.
    pub fn get_key(&self, rank: usize) -> Result<Option<K::Item>> {
        if rank >= self.len() {
            return Ok(None);
        }
        let mut remaining = rank;
        for block in self.leaf_blocks()? {
            let leaf = self.load_leaf(block)?;
            if remaining < leaf.len() {
                return leaf.key(remaining).map(Some);
            }
            remaining -= leaf.len();
        }
        Ok(None)
    }
}
