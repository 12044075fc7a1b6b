//! Sorted blocks: one block's worth of packed, ordered entries.
//!
//! Both leaf blocks (key → value) and index blocks (separator key → left
//! child) use the same layout. Index blocks additionally keep the rightmost
//! child in the header.
//!
//! ## Block Format
//!
//! ```text
//! [count: u32]          // number of entries
//! [last_pointer: u32]   // rightmost child (index blocks), u32::MAX for leaves
//! [Entry 1]             // key bytes ++ payload bytes
//! [Entry 2]
//! ...
//! [Entry N]
//! [zero padding up to the block size]
//! ```
//!
//! Entries are strictly ascending by key. Entry boundaries are not stored;
//! they are recovered on load by asking the codecs for encoded sizes and kept
//! in an in-memory offset table for binary search.

mod cursor;

pub use cursor::{BlockCursor, BlockIter};

use crate::codec::{Codec, KeyCodec, U32Codec};
use crate::error::{Error, Result};
use crate::store::{BlockId, NO_BLOCK};
use bytes::{Buf, BufMut};
use std::cmp::Ordering;
use std::ops::{Bound, Range};

/// Size of the block header (`count` + `last_pointer`).
pub const BLOCK_HEADER_SIZE: usize = 8;

/// A sorted block holding key → value entries.
pub type LeafBlock<K, V> = SortedBlock<K, V>;

/// A sorted block holding separator key → left child entries.
pub type IndexBlock<K> = SortedBlock<K, U32Codec>;

/// Outcome of a binary search within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The key is stored at this index.
    Found(usize),
    /// The key is absent; this is where it would be inserted.
    NotFound(usize),
}

impl SearchResult {
    /// Whether the search found an exact match.
    pub fn is_found(self) -> bool {
        matches!(self, SearchResult::Found(_))
    }

    /// The matching index or the insertion point.
    pub fn index(self) -> usize {
        match self {
            SearchResult::Found(i) | SearchResult::NotFound(i) => i,
        }
    }

    /// The child to descend into when this result comes from an index block.
    ///
    /// A key equal to separator `i` lives under child `i + 1`.
    pub fn child_position(self) -> usize {
        match self {
            SearchResult::Found(i) => i + 1,
            SearchResult::NotFound(i) => i,
        }
    }
}

/// In-memory view of one block's sorted entries.
#[derive(Debug, Clone)]
pub struct SortedBlock<K, P> {
    key_codec: K,
    payload_codec: P,
    capacity: usize,
    /// Header placeholder followed by the packed entries.
    data: Vec<u8>,
    /// Start offset of each entry within `data`.
    offsets: Vec<usize>,
    last_pointer: BlockId,
}

impl<K: KeyCodec, P: Codec> SortedBlock<K, P> {
    /// Creates an empty block with the given capacity in bytes.
    pub fn new(key_codec: K, payload_codec: P, capacity: usize) -> Self {
        Self {
            key_codec,
            payload_codec,
            capacity,
            data: vec![0; BLOCK_HEADER_SIZE],
            offsets: Vec::new(),
            last_pointer: NO_BLOCK,
        }
    }

    /// Parses a block read from storage.
    pub fn from_bytes(key_codec: K, payload_codec: P, mut bytes: Vec<u8>, capacity: usize) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(Error::corruption("Block too small"));
        }

        let mut header = &bytes[..BLOCK_HEADER_SIZE];
        let count = header.get_u32() as usize;
        let last_pointer = header.get_u32();

        let mut offsets = Vec::with_capacity(count);
        let mut offset = BLOCK_HEADER_SIZE;
        for i in 0..count {
            let rest = bytes
                .get(offset..)
                .filter(|rest| !rest.is_empty())
                .ok_or_else(|| Error::corruption(format!("Block ends before entry {} of {}", i, count)))?;
            let key_len = key_codec.encoded_size_at(rest)?;
            let payload_len = payload_codec.encoded_size_at(rest.get(key_len..).unwrap_or_default())?;
            offsets.push(offset);
            offset += key_len + payload_len;
        }

        if offset > capacity || offset > bytes.len() {
            return Err(Error::corruption(format!(
                "Block entries span {} bytes, capacity is {}",
                offset, capacity
            )));
        }
        bytes.truncate(offset);

        Ok(Self { key_codec, payload_codec, capacity, data: bytes, offsets, last_pointer })
    }

    /// Serializes the block. The result is `occupied()` bytes long; the store
    /// pads it to the block size.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len());
        out.put_u32(self.offsets.len() as u32);
        out.put_u32(self.last_pointer);
        out.extend_from_slice(&self.data[BLOCK_HEADER_SIZE..]);
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the block has no entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Block capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes in use, header included.
    pub fn occupied(&self) -> usize {
        self.data.len()
    }

    /// Bytes used by entries alone.
    pub fn entry_bytes(&self) -> usize {
        self.data.len() - BLOCK_HEADER_SIZE
    }

    /// Bytes still available.
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// A block is underflowed once it is at most half full.
    pub fn is_underflowed(&self) -> bool {
        self.occupied() <= self.capacity / 2
    }

    /// Whether the block holds more bytes than fit on disk. Only happens
    /// transiently between [`SortedBlock::insert_unchecked`] and a split.
    pub fn is_overflowed(&self) -> bool {
        self.occupied() > self.capacity
    }

    /// The out-of-band rightmost child pointer.
    pub fn last_pointer(&self) -> BlockId {
        self.last_pointer
    }

    /// Sets the rightmost child pointer.
    pub fn set_last_pointer(&mut self, block: BlockId) {
        self.last_pointer = block;
    }

    /// The key codec.
    pub fn key_codec(&self) -> &K {
        &self.key_codec
    }

    /// An empty block with the same codecs and capacity.
    pub fn empty_like(&self) -> Self {
        Self::new(self.key_codec.clone(), self.payload_codec.clone(), self.capacity)
    }

    fn entry_range(&self, index: usize) -> Range<usize> {
        let start = self.offsets[index];
        let end = self.offsets.get(index + 1).copied().unwrap_or(self.data.len());
        start..end
    }

    /// Encoded bytes of entry `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn entry(&self, index: usize) -> &[u8] {
        &self.data[self.entry_range(index)]
    }

    fn key_len(&self, entry: &[u8]) -> Result<usize> {
        match self.key_codec.fixed_size() {
            Some(size) => Ok(size),
            None => self.key_codec.encoded_size_at(entry),
        }
    }

    /// Encoded key of entry `index`.
    pub fn key_bytes(&self, index: usize) -> Result<&[u8]> {
        let entry = self.entry(index);
        let len = self.key_len(entry)?;
        Ok(&entry[..len])
    }

    /// Encoded payload of entry `index`.
    pub fn payload_bytes(&self, index: usize) -> Result<&[u8]> {
        let entry = self.entry(index);
        let len = self.key_len(entry)?;
        Ok(&entry[len..])
    }

    /// Decoded key of entry `index`.
    pub fn key(&self, index: usize) -> Result<K::Item> {
        self.key_codec.decode(self.key_bytes(index)?)
    }

    /// Decoded payload of entry `index`.
    pub fn payload(&self, index: usize) -> Result<P::Item> {
        self.payload_codec.decode(self.payload_bytes(index)?)
    }

    /// The smallest key, if any.
    pub fn first_key(&self) -> Result<Option<K::Item>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.key(0).map(Some)
    }

    /// The largest key, if any.
    pub fn last_key(&self) -> Result<Option<K::Item>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.key(self.len() - 1).map(Some)
    }

    /// Encodes a key/payload pair as a block entry.
    pub fn encode_entry(&self, key: &K::Item, payload: &P::Item) -> Result<Vec<u8>> {
        let size = self.key_codec.encoded_size(key)? + self.payload_codec.encoded_size(payload)?;
        let mut entry = Vec::with_capacity(size);
        self.key_codec.encode(key, &mut entry)?;
        self.payload_codec.encode(payload, &mut entry)?;
        Ok(entry)
    }

    /// Whether `entry` can be added without exceeding the capacity.
    pub fn fits(&self, entry: &[u8]) -> bool {
        self.occupied() + entry.len() <= self.capacity
    }

    /// Binary search for `key`.
    pub fn binary_search(&self, key: &K::Item) -> Result<SearchResult> {
        let probe = self.key_codec.encode_to_vec(key)?;
        self.binary_search_encoded(&probe)
    }

    /// Binary search for an encoded key.
    pub fn binary_search_encoded(&self, probe: &[u8]) -> Result<SearchResult> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_codec.compare_encoded(self.key_bytes(mid)?, probe)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }
        Ok(SearchResult::NotFound(lo))
    }

    /// Inserts `entry` in key order. Fails if the key exists or the entry
    /// does not fit.
    pub fn insert(&mut self, entry: &[u8]) -> Result<usize> {
        if !self.fits(entry) {
            return Err(Error::invalid_state(format!(
                "entry of {} bytes does not fit, {} bytes free",
                entry.len(),
                self.free_space()
            )));
        }
        self.insert_unchecked(entry)
    }

    /// Inserts `entry` in key order even if the block overflows. The caller
    /// must split the block before it is written back.
    pub fn insert_unchecked(&mut self, entry: &[u8]) -> Result<usize> {
        let key_len = self.key_len(entry)?;
        match self.binary_search_encoded(&entry[..key_len])? {
            SearchResult::Found(_) => Err(Error::invalid_argument("duplicate key in block")),
            SearchResult::NotFound(pos) => {
                self.insert_at(pos, entry);
                Ok(pos)
            }
        }
    }

    /// Appends `entry`; the caller guarantees its key is larger than every
    /// key already present.
    pub fn insert_unsorted(&mut self, entry: &[u8]) -> Result<()> {
        if !self.fits(entry) {
            return Err(Error::invalid_state("entry does not fit in block"));
        }
        debug_assert!(
            self.is_empty()
                || matches!(
                    self.key_len(entry).and_then(|len| self
                        .key_codec
                        .compare_encoded(self.key_bytes(self.len() - 1)?, &entry[..len])),
                    Ok(Ordering::Less)
                ),
            "unsorted insert out of order"
        );
        self.offsets.push(self.data.len());
        self.data.extend_from_slice(entry);
        Ok(())
    }

    /// Inserts `entry` at position `pos` without any ordering check.
    pub(crate) fn insert_at(&mut self, pos: usize, entry: &[u8]) {
        let at = self.offsets.get(pos).copied().unwrap_or(self.data.len());
        self.data.splice(at..at, entry.iter().copied());
        for offset in &mut self.offsets[pos..] {
            *offset += entry.len();
        }
        self.offsets.insert(pos, at);
    }

    /// Removes and returns the encoded entry at `pos`.
    pub fn remove_at(&mut self, pos: usize) -> Vec<u8> {
        let range = self.entry_range(pos);
        let len = range.len();
        let removed: Vec<u8> = self.data.drain(range).collect();
        self.offsets.remove(pos);
        for offset in &mut self.offsets[pos..] {
            *offset -= len;
        }
        removed
    }

    /// Removes the entry with `key`, returning its encoded bytes.
    pub fn delete(&mut self, key: &K::Item) -> Result<Option<Vec<u8>>> {
        match self.binary_search(key)? {
            SearchResult::Found(pos) => Ok(Some(self.remove_at(pos))),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Splits the block by byte mass. This block keeps the lower entries and
    /// the returned block holds the upper ones.
    ///
    /// Accepts an overflowed block; both halves must fit afterwards.
    pub fn split(&mut self) -> Result<Self> {
        if self.len() < 2 {
            return Err(Error::internal("cannot split a block with fewer than 2 entries"));
        }
        let total = self.entry_bytes();
        let mut best = 1;
        let mut best_diff = usize::MAX;
        for i in 1..self.len() {
            let lower = self.offsets[i] - BLOCK_HEADER_SIZE;
            let diff = (2 * lower).abs_diff(total);
            if diff <= best_diff {
                best = i;
                best_diff = diff;
            }
            if 2 * lower >= total {
                break;
            }
        }

        let upper = self.split_off(best);
        if self.is_overflowed() || upper.is_overflowed() {
            return Err(Error::internal("split halves exceed block capacity"));
        }
        Ok(upper)
    }

    /// Moves entries `at..` into a new block.
    fn split_off(&mut self, at: usize) -> Self {
        let cut = self.offsets[at];
        let mut upper = self.empty_like();
        upper.data.extend_from_slice(&self.data[cut..]);
        upper.offsets = self.offsets[at..]
            .iter()
            .map(|offset| offset - cut + BLOCK_HEADER_SIZE)
            .collect();
        self.data.truncate(cut);
        self.offsets.truncate(at);
        upper
    }

    /// Whether `other`'s entries plus `extra` bytes fit into this block.
    pub fn can_merge(&self, other: &Self, extra: usize) -> bool {
        self.occupied() + other.entry_bytes() + extra <= self.capacity
    }

    /// Appends every entry of `other`, whose keys are all larger than this
    /// block's, and takes over its last pointer.
    pub fn merge(&mut self, other: Self) -> Result<()> {
        if !self.can_merge(&other, 0) {
            return Err(Error::invalid_state("blocks are too large to merge"));
        }
        let base = self.data.len();
        self.data.extend_from_slice(&other.data[BLOCK_HEADER_SIZE..]);
        self.offsets
            .extend(other.offsets.iter().map(|offset| offset - BLOCK_HEADER_SIZE + base));
        self.last_pointer = other.last_pointer;
        Ok(())
    }

    /// Builds a cursor over the entries within the given key bounds.
    pub fn cursor(&self, lower: Bound<&K::Item>, upper: Bound<&K::Item>, descending: bool) -> Result<BlockCursor> {
        let lo = match lower {
            Bound::Unbounded => 0,
            Bound::Included(key) => self.binary_search(key)?.index(),
            Bound::Excluded(key) => match self.binary_search(key)? {
                SearchResult::Found(i) => i + 1,
                SearchResult::NotFound(i) => i,
            },
        };
        let hi = match upper {
            Bound::Unbounded => self.len(),
            Bound::Included(key) => match self.binary_search(key)? {
                SearchResult::Found(i) => i + 1,
                SearchResult::NotFound(i) => i,
            },
            Bound::Excluded(key) => self.binary_search(key)?.index(),
        };
        Ok(BlockCursor::new(lo, hi.max(lo), self.len(), descending))
    }

    /// Iterates decoded entries within the given key bounds.
    pub fn iter_range(&self, lower: Bound<&K::Item>, upper: Bound<&K::Item>, descending: bool) -> Result<BlockIter<'_, K, P>> {
        Ok(BlockIter::new(self, self.cursor(lower, upper, descending)?))
    }

    /// Iterates all decoded entries in ascending order.
    pub fn iter(&self) -> BlockIter<'_, K, P> {
        BlockIter::new(self, BlockCursor::new(0, self.len(), self.len(), false))
    }
}

impl<K: KeyCodec> SortedBlock<K, U32Codec> {
    /// Creates an empty index block.
    pub fn new_index(key_codec: K, capacity: usize) -> Self {
        Self::new(key_codec, U32Codec, capacity)
    }

    /// Builds a separator entry from an encoded key and its left child.
    pub fn make_entry(key: &[u8], left_child: BlockId) -> Vec<u8> {
        let mut entry = Vec::with_capacity(key.len() + 4);
        entry.extend_from_slice(key);
        entry.put_u32(left_child);
        entry
    }

    /// Child pointer at position `pos` (`0..=len()`).
    pub fn child(&self, pos: usize) -> Result<BlockId> {
        match pos.cmp(&self.len()) {
            Ordering::Less => self.payload(pos),
            Ordering::Equal => Ok(self.last_pointer),
            Ordering::Greater => Err(Error::internal(format!(
                "child position {} out of range for {} separators",
                pos,
                self.len()
            ))),
        }
    }

    /// Replaces the child pointer at position `pos` (`0..=len()`).
    pub fn set_child(&mut self, pos: usize, block: BlockId) -> Result<()> {
        match pos.cmp(&self.len()) {
            Ordering::Less => {
                let end = self.entry_range(pos).end;
                self.data[end - 4..end].copy_from_slice(&block.to_be_bytes());
                Ok(())
            }
            Ordering::Equal => {
                self.last_pointer = block;
                Ok(())
            }
            Ordering::Greater => Err(Error::internal("child position out of range")),
        }
    }

    /// All `len() + 1` child pointers in order.
    pub fn children(&self) -> Result<Vec<BlockId>> {
        (0..=self.len()).map(|pos| self.child(pos)).collect()
    }

    /// Inserts separator `key` between `left` (the existing child at the
    /// insertion point) and the new block `right`.
    pub fn insert_separator(&mut self, key: &[u8], left: BlockId, right: BlockId) -> Result<usize> {
        let pos = self.insert_unchecked(&Self::make_entry(key, left))?;
        self.set_child(pos + 1, right)?;
        Ok(pos)
    }

    /// Removes separator `sep` and the pointer to its right child, keeping
    /// the left child in place. Returns the dropped right child.
    pub fn remove_separator(&mut self, sep: usize) -> Result<BlockId> {
        let left = self.child(sep)?;
        let right = self.child(sep + 1)?;
        self.remove_at(sep);
        self.set_child(sep, left)?;
        Ok(right)
    }

    /// Replaces the key of separator `sep`, keeping both children. The block
    /// may overflow if the new key is longer.
    pub fn replace_separator(&mut self, sep: usize, key: &[u8]) -> Result<()> {
        let left = self.child(sep)?;
        self.remove_at(sep);
        self.insert_at(sep, &Self::make_entry(key, left));
        Ok(())
    }

    /// Splits an (over)full index block, promoting one separator.
    ///
    /// This block keeps the lower separators and gets the promoted
    /// separator's left child as its last pointer. The returned block holds
    /// the upper separators and the original last pointer. Returns the
    /// promoted encoded key and the upper block.
    pub fn split_promote(&mut self) -> Result<(Vec<u8>, Self)> {
        let n = self.len();
        if n < 3 {
            return Err(Error::internal("cannot split an index block with fewer than 3 separators"));
        }
        let total = self.entry_bytes();
        let mut best = 1;
        let mut best_diff = usize::MAX;
        for p in 1..=n - 2 {
            let lower = self.offsets[p] - BLOCK_HEADER_SIZE;
            let upper = total - (self.offsets[p + 1] - BLOCK_HEADER_SIZE);
            let diff = lower.abs_diff(upper);
            if diff < best_diff {
                best = p;
                best_diff = diff;
            }
        }

        let mut upper = self.split_off(best + 1);
        upper.last_pointer = self.last_pointer;
        let promoted_child = self.payload(best)?;
        let promoted_key = self.key_bytes(best)?.to_vec();
        self.remove_at(best);
        self.last_pointer = promoted_child;

        if self.is_overflowed() || upper.is_overflowed() {
            return Err(Error::internal("index split halves exceed block capacity"));
        }
        Ok((promoted_key, upper))
    }
}

/// Returns the encoded separator between a block ending in `low` and a block
/// starting with `high`.
pub fn separator<K: KeyCodec>(codec: &K, low: &[u8], high: &[u8]) -> Result<Vec<u8>> {
    codec.separate(low, high)
}
