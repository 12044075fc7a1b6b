//! Structural maintenance after a leaf changes.
//!
//! Inserts and deletes both end by handing the modified leaf to
//! [`BPlusTree::settle_leaf`]. The result is a [`Fixup`] describing what the
//! parent has to change, which [`BPlusTree::propagate`] applies level by
//! level on the way back up the descent path:
//!
//! - an overflowing block splits and its parent gains a separator;
//! - an underflowing block first tries to borrow entries from a sibling
//!   (the parent's separator is replaced), then to merge with one (the
//!   parent loses a separator);
//! - a split root grows a new root, and a root index left without
//!   separators is replaced by its only child.

use super::{BPlusTree, PathStep};
use crate::block::{separator, IndexBlock, LeafBlock};
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};
use crate::store::{BlockId, BlockStore, Pool};
use log::{debug, warn};

/// The change a child requires from its parent index block.
#[derive(Debug)]
pub(crate) enum Fixup {
    /// Nothing to do.
    Done,
    /// The child split; `key` separates it from the new block `right`.
    Split { key: Vec<u8>, right: BlockId },
    /// Separator `sep` must become `key`.
    Replace { sep: usize, key: Vec<u8> },
    /// Separator `sep` and its right child are gone; its left child survives.
    Remove { sep: usize },
}

/// Moves entries between adjacent leaves while each move narrows the byte
/// gap between them. Returns the number of entries moved.
pub(crate) fn shift_leaf_entries<K: KeyCodec, V: Codec>(lower: &mut LeafBlock<K, V>, upper: &mut LeafBlock<K, V>) -> usize {
    let mut moved = 0;
    loop {
        let (lo, hi) = (lower.occupied(), upper.occupied());
        if lo < hi && !upper.is_empty() {
            let size = upper.entry(0).len();
            if size >= hi - lo || !lower.fits(upper.entry(0)) {
                break;
            }
            let entry = upper.remove_at(0);
            lower.insert_at(lower.len(), &entry);
        } else if lo > hi && !lower.is_empty() {
            let last = lower.len() - 1;
            let size = lower.entry(last).len();
            if size >= lo - hi || !upper.fits(lower.entry(last)) {
                break;
            }
            let entry = lower.remove_at(last);
            upper.insert_at(0, &entry);
        } else {
            break;
        }
        moved += 1;
    }
    moved
}

/// Rotates separators between adjacent index blocks through the parent
/// separator `parent_key`, which is updated in place. Returns the number of
/// rotations.
fn rotate_index_entries<K: KeyCodec>(
    lower: &mut IndexBlock<K>,
    upper: &mut IndexBlock<K>,
    parent_key: &mut Vec<u8>,
) -> Result<usize> {
    let limit = lower.len() + upper.len();
    let mut moved = 0;
    while moved < limit {
        let (lo, hi) = (lower.occupied(), upper.occupied());
        // The parent key comes down together with a child pointer.
        let incoming = parent_key.len() + 4;
        if lo < hi && !upper.is_empty() {
            if incoming >= hi - lo || lo + incoming > lower.capacity() {
                break;
            }
            let first_child = upper.child(0)?;
            let first_key = upper.key_bytes(0)?.to_vec();
            upper.remove_at(0);
            let entry = IndexBlock::<K>::make_entry(parent_key, lower.last_pointer());
            lower.insert_at(lower.len(), &entry);
            lower.set_last_pointer(first_child);
            *parent_key = first_key;
        } else if lo > hi && !lower.is_empty() {
            if incoming >= lo - hi || hi + incoming > upper.capacity() {
                break;
            }
            let last = lower.len() - 1;
            let last_child = lower.child(last)?;
            let last_key = lower.key_bytes(last)?.to_vec();
            let entry = IndexBlock::<K>::make_entry(parent_key, lower.last_pointer());
            lower.remove_at(last);
            lower.set_last_pointer(last_child);
            upper.insert_at(0, &entry);
            *parent_key = last_key;
        } else {
            break;
        }
        moved += 1;
    }
    Ok(moved)
}

/// Siblings of the child at `pos`: the separator index shared with each and
/// the sibling's block number.
fn siblings<K: KeyCodec>(parent: &PathStep<K>) -> Result<(Option<(usize, BlockId)>, Option<(usize, BlockId)>)> {
    let pos = parent.pos;
    let left = match pos {
        0 => None,
        _ => Some((pos - 1, parent.node.child(pos - 1)?)),
    };
    let right = if pos < parent.node.len() {
        Some((pos, parent.node.child(pos + 1)?))
    } else {
        None
    };
    Ok((left, right))
}

impl<S: BlockStore, K: KeyCodec, V: Codec> BPlusTree<S, K, V> {
    /// Writes back a modified leaf, splitting or rebalancing it as needed.
    /// `path` holds the index blocks above the leaf.
    pub(crate) fn settle_leaf(&mut self, path: &[PathStep<K>], leaf_id: BlockId, mut leaf: LeafBlock<K, V>) -> Result<Fixup> {
        if leaf.is_overflowed() {
            let right = leaf.split()?;
            let key = separator(self.key_codec(), leaf.key_bytes(leaf.len() - 1)?, right.key_bytes(0)?)?;
            self.write_leaf(leaf_id, &leaf)?;
            let right_id = self.allocate_leaf(&right)?;
            debug!(
                "Split leaf {} into {} ({} entries) and {} ({} entries)",
                leaf_id,
                leaf_id,
                leaf.len(),
                right_id,
                right.len()
            );
            return Ok(Fixup::Split { key, right: right_id });
        }

        match path.last() {
            Some(parent) if leaf.is_underflowed() => self.resolve_leaf_underflow(parent, leaf_id, leaf),
            _ => {
                self.write_leaf(leaf_id, &leaf)?;
                Ok(Fixup::Done)
            }
        }
    }

    fn resolve_leaf_underflow(&mut self, parent: &PathStep<K>, leaf_id: BlockId, leaf: LeafBlock<K, V>) -> Result<Fixup> {
        let (left, right) = siblings(parent)?;
        let left = match left {
            Some((sep, id)) => Some((sep, id, self.load_leaf(id)?)),
            None => None,
        };
        let right = match right {
            Some((sep, id)) => Some((sep, id, self.load_leaf(id)?)),
            None => None,
        };

        // Pairs in (separator, lower id, lower, upper id, upper) form, left first.
        let mut pairs = Vec::with_capacity(2);
        if let Some((sep, id, block)) = left {
            pairs.push((sep, id, block, leaf_id, leaf.clone()));
        }
        if let Some((sep, id, block)) = right {
            pairs.push((sep, leaf_id, leaf.clone(), id, block));
        }

        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            let (mut lower, mut upper) = (lower.clone(), upper.clone());
            let moved = shift_leaf_entries(&mut lower, &mut upper);
            if moved > 0 && !lower.is_underflowed() && !upper.is_underflowed() {
                return self.commit_leaf_shift(*sep, *lower_id, &lower, *upper_id, &upper, moved);
            }
        }

        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            if lower.can_merge(upper, 0) {
                let mut merged = lower.clone();
                merged.merge(upper.clone())?;
                self.write_leaf(*lower_id, &merged)?;
                self.free_block(Pool::Leaf, *upper_id)?;
                debug!("Merged leaf {} into leaf {}", upper_id, lower_id);
                return Ok(Fixup::Remove { sep: *sep });
            }
        }

        // Neither a full rebalance nor a merge is possible; keep any shift
        // that narrows the gap.
        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            let (mut lower, mut upper) = (lower.clone(), upper.clone());
            let moved = shift_leaf_entries(&mut lower, &mut upper);
            if moved > 0 && !lower.is_empty() && !upper.is_empty() {
                return self.commit_leaf_shift(*sep, *lower_id, &lower, *upper_id, &upper, moved);
            }
        }

        warn!("Leaf {} stays underflowed ({} of {} bytes)", leaf_id, leaf.occupied(), leaf.capacity());
        self.write_leaf(leaf_id, &leaf)?;
        Ok(Fixup::Done)
    }

    fn commit_leaf_shift(
        &mut self,
        sep: usize,
        lower_id: BlockId,
        lower: &LeafBlock<K, V>,
        upper_id: BlockId,
        upper: &LeafBlock<K, V>,
        moved: usize,
    ) -> Result<Fixup> {
        let key = separator(self.key_codec(), lower.key_bytes(lower.len() - 1)?, upper.key_bytes(0)?)?;
        self.write_leaf(lower_id, lower)?;
        self.write_leaf(upper_id, upper)?;
        debug!("Redistributed {} entries between leaves {} and {}", moved, lower_id, upper_id);
        Ok(Fixup::Replace { sep, key })
    }

    /// Writes back a modified index block, splitting, rebalancing or
    /// collapsing it as needed. `path` holds the index blocks above it.
    fn settle_index(&mut self, path: &[PathStep<K>], block: BlockId, mut node: IndexBlock<K>) -> Result<Fixup> {
        if node.is_overflowed() {
            let (key, right) = node.split_promote()?;
            self.write_index(block, &node)?;
            let right_id = self.allocate_index(&right)?;
            debug!("Split index block {} into {} and {}", block, block, right_id);
            return Ok(Fixup::Split { key, right: right_id });
        }

        match path.last() {
            None if node.is_empty() => {
                self.collapse_root(block, node.last_pointer())?;
                Ok(Fixup::Done)
            }
            Some(parent) if node.is_underflowed() => self.resolve_index_underflow(parent, block, node),
            _ => {
                self.write_index(block, &node)?;
                Ok(Fixup::Done)
            }
        }
    }

    fn resolve_index_underflow(&mut self, parent: &PathStep<K>, block: BlockId, node: IndexBlock<K>) -> Result<Fixup> {
        let (left, right) = siblings(parent)?;
        let mut pairs = Vec::with_capacity(2);
        if let Some((sep, id)) = left {
            pairs.push((sep, id, self.load_index(id)?, block, node.clone()));
        }
        if let Some((sep, id)) = right {
            pairs.push((sep, block, node.clone(), id, self.load_index(id)?));
        }

        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            let (mut lower, mut upper) = (lower.clone(), upper.clone());
            let mut key = parent.node.key_bytes(*sep)?.to_vec();
            let moved = rotate_index_entries(&mut lower, &mut upper, &mut key)?;
            if moved > 0 && !lower.is_underflowed() && !upper.is_underflowed() {
                return self.commit_index_rotation(*sep, key, *lower_id, &lower, *upper_id, &upper, moved);
            }
        }

        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            let key = parent.node.key_bytes(*sep)?;
            if lower.can_merge(upper, key.len() + 4) {
                let mut merged = lower.clone();
                let entry = IndexBlock::<K>::make_entry(key, merged.last_pointer());
                merged.insert_at(merged.len(), &entry);
                merged.merge(upper.clone())?;
                self.write_index(*lower_id, &merged)?;
                self.free_block(Pool::Index, *upper_id)?;
                debug!("Merged index block {} into {}", upper_id, lower_id);
                return Ok(Fixup::Remove { sep: *sep });
            }
        }

        for (sep, lower_id, lower, upper_id, upper) in &pairs {
            let (mut lower, mut upper) = (lower.clone(), upper.clone());
            let mut key = parent.node.key_bytes(*sep)?.to_vec();
            let moved = rotate_index_entries(&mut lower, &mut upper, &mut key)?;
            if moved > 0 {
                return self.commit_index_rotation(*sep, key, *lower_id, &lower, *upper_id, &upper, moved);
            }
        }

        warn!("Index block {} stays underflowed ({} of {} bytes)", block, node.occupied(), node.capacity());
        self.write_index(block, &node)?;
        Ok(Fixup::Done)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_index_rotation(
        &mut self,
        sep: usize,
        key: Vec<u8>,
        lower_id: BlockId,
        lower: &IndexBlock<K>,
        upper_id: BlockId,
        upper: &IndexBlock<K>,
        moved: usize,
    ) -> Result<Fixup> {
        self.write_index(lower_id, lower)?;
        self.write_index(upper_id, upper)?;
        debug!("Rotated {} separators between index blocks {} and {}", moved, lower_id, upper_id);
        Ok(Fixup::Replace { sep, key })
    }

    /// Applies `fixup` to each ancestor in `path`, innermost first, growing a
    /// new root if the old one splits.
    pub(crate) fn propagate(&mut self, mut path: Vec<PathStep<K>>, mut fixup: Fixup) -> Result<()> {
        while let Some(step) = path.pop() {
            let PathStep { block, mut node, pos } = step;
            match fixup {
                Fixup::Done => return Ok(()),
                Fixup::Split { key, right } => {
                    let left = node.child(pos)?;
                    node.insert_separator(&key, left, right)?;
                }
                Fixup::Replace { sep, key } => node.replace_separator(sep, &key)?,
                Fixup::Remove { sep } => {
                    node.remove_separator(sep)?;
                }
            }
            fixup = self.settle_index(&path, block, node)?;
        }

        match fixup {
            Fixup::Done => Ok(()),
            Fixup::Split { key, right } => self.grow_root(key, right),
            other => Err(Error::internal(format!("root produced {:?}", other))),
        }
    }

    fn grow_root(&mut self, key: Vec<u8>, right: BlockId) -> Result<()> {
        let mut root = self.new_index();
        root.insert_unsorted(&IndexBlock::<K>::make_entry(&key, self.descriptor.root))?;
        root.set_last_pointer(right);
        let root_id = self.allocate_index(&root)?;
        self.descriptor.root = root_id;
        self.descriptor.leaf_level += 1;
        debug!("Grew new root {} at leaf level {}", root_id, self.descriptor.leaf_level);
        Ok(())
    }

    /// Replaces a root index without separators by its only child, repeating
    /// while the new root is also such an index.
    fn collapse_root(&mut self, block: BlockId, child: BlockId) -> Result<()> {
        self.free_block(Pool::Index, block)?;
        self.descriptor.root = child;
        self.descriptor.leaf_level -= 1;

        while self.descriptor.leaf_level >= 0 {
            let root = self.load_index(self.descriptor.root)?;
            if !root.is_empty() {
                break;
            }
            self.free_block(Pool::Index, self.descriptor.root)?;
            self.descriptor.root = root.last_pointer();
            self.descriptor.leaf_level -= 1;
        }
        debug!("Collapsed root to {} at leaf level {}", self.descriptor.root, self.descriptor.leaf_level);
        Ok(())
    }
}
