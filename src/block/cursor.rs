//! Positions within a single sorted block.

use super::SortedBlock;
use crate::codec::{Codec, KeyCodec};
use crate::error::{Error, Result};

/// A cursor over the half-open index range `[lo, hi)` of one block.
///
/// Ascending cursors consume from `lo`, descending ones from `hi`. The
/// cursor remembers whether the far bound cut the block short, which tells
/// the tree iterator that no later block can hold matching keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCursor {
    lo: usize,
    hi: usize,
    descending: bool,
    current: Option<usize>,
    clipped: bool,
}

impl BlockCursor {
    /// Creates a cursor over `[lo, hi)` in a block of `len` entries.
    pub fn new(lo: usize, hi: usize, len: usize, descending: bool) -> Self {
        let clipped = if descending { lo > 0 } else { hi < len };
        Self { lo, hi, descending, current: None, clipped }
    }

    /// Advances and returns the next entry index.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.lo >= self.hi {
            self.current = None;
            return None;
        }
        let index = if self.descending {
            self.hi -= 1;
            self.hi
        } else {
            self.lo += 1;
            self.lo - 1
        };
        self.current = Some(index);
        Some(index)
    }

    /// The index returned by the last [`BlockCursor::next_index`].
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Entries left to visit.
    pub fn remaining(&self) -> usize {
        self.hi - self.lo
    }

    /// Whether the cursor runs in descending key order.
    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// Whether the far bound fell inside this block.
    pub fn reached_bound(&self) -> bool {
        self.clipped
    }

    /// Removes the current entry from `block` and keeps the remaining range
    /// pointing at the same entries.
    pub fn remove_current<K: KeyCodec, P: Codec>(&mut self, block: &mut SortedBlock<K, P>) -> Result<Vec<u8>> {
        let index = self
            .current
            .take()
            .filter(|&index| index < block.len())
            .ok_or_else(|| Error::invalid_state("cursor has no current entry"))?;
        let removed = block.remove_at(index);
        if !self.descending {
            self.lo -= 1;
            self.hi -= 1;
        }
        Ok(removed)
    }
}

/// Iterator over decoded entries of one block.
pub struct BlockIter<'a, K, P> {
    block: &'a SortedBlock<K, P>,
    cursor: BlockCursor,
}

impl<'a, K: KeyCodec, P: Codec> BlockIter<'a, K, P> {
    pub(crate) fn new(block: &'a SortedBlock<K, P>, cursor: BlockCursor) -> Self {
        Self { block, cursor }
    }

    /// The underlying cursor.
    pub fn cursor(&self) -> &BlockCursor {
        &self.cursor
    }
}

impl<K: KeyCodec, P: Codec> Iterator for BlockIter<'_, K, P> {
    type Item = Result<(K::Item, P::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor.next_index()?;
        Some(self.block.key(index).and_then(|k| Ok((k, self.block.payload(index)?))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.cursor.remaining();
        (n, Some(n))
    }
}
