//! Allocation bitset.
//!
//! Bit `i` lives in byte `i / 8` under mask `1 << (i % 8)`. A set bit means
//! the block is allocated.

use crate::error::{Error, Result};

/// In-memory copy of a pool's allocation bitset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    bytes: Vec<u8>,
    max: u32,
    count: u32,
    /// No clear bit exists below this index.
    hint: u32,
}

impl Bitset {
    /// Number of bytes needed to track `max` blocks.
    pub fn byte_len(max: u32) -> usize {
        (max as usize).div_ceil(8)
    }

    /// Creates an all-clear bitset for `max` blocks.
    pub fn new(max: u32) -> Self {
        Self { bytes: vec![0; Self::byte_len(max)], max, count: 0, hint: 0 }
    }

    /// Loads a bitset from its persisted bytes.
    pub fn from_bytes(bytes: Vec<u8>, max: u32) -> Result<Self> {
        if bytes.len() != Self::byte_len(max) {
            return Err(Error::corruption(format!(
                "Bitset length mismatch: expected {} bytes for {} blocks, got {}",
                Self::byte_len(max),
                max,
                bytes.len()
            )));
        }
        let mut bitset = Self { bytes, max, count: 0, hint: 0 };
        if (max..(bitset.bytes.len() * 8) as u32).any(|i| bitset.get(i)) {
            return Err(Error::corruption("Bitset has bits set beyond the block count"));
        }
        bitset.count = bitset.bytes.iter().map(|b| b.count_ones()).sum();
        Ok(bitset)
    }

    /// Persisted form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte `index` of the persisted form.
    pub fn byte(&self, index: usize) -> u8 {
        self.bytes[index]
    }

    /// Number of tracked blocks.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether bit `i` is set. Out-of-range bits read as clear.
    pub fn get(&self, i: u32) -> bool {
        self.bytes
            .get(i as usize / 8)
            .is_some_and(|byte| byte & (1 << (i % 8)) != 0)
    }

    /// Sets bit `i` and returns the index of the changed byte.
    pub fn set(&mut self, i: u32) -> usize {
        debug_assert!(i < self.max);
        let index = i as usize / 8;
        if self.bytes[index] & (1 << (i % 8)) == 0 {
            self.bytes[index] |= 1 << (i % 8);
            self.count += 1;
        }
        if self.hint == i {
            self.hint = i + 1;
        }
        index
    }

    /// Clears bit `i` and returns the index of the changed byte.
    pub fn clear(&mut self, i: u32) -> usize {
        debug_assert!(i < self.max);
        let index = i as usize / 8;
        if self.bytes[index] & (1 << (i % 8)) != 0 {
            self.bytes[index] &= !(1 << (i % 8));
            self.count -= 1;
        }
        self.hint = self.hint.min(i);
        index
    }

    /// Lowest clear bit, if any.
    pub fn first_clear(&self) -> Option<u32> {
        let start = self.hint as usize / 8;
        let byte = self.bytes[start.min(self.bytes.len())..]
            .iter()
            .position(|&b| b != 0xFF)?
            + start;
        let i = byte as u32 * 8 + (!self.bytes[byte]).trailing_zeros();
        (i < self.max).then_some(i)
    }
}
