//! Tree descriptor stored in the block store's reserve area.
//!
//! ## Format
//!
//! ```text
//! [root: i32]
//! [leaf_level: i32]   // -1 when the root is a leaf
//! [size: i32]
//! [flags: u32]        // bit 0: initialized
//! [crc32: u32]        // over the preceding 16 bytes
//! ```

use crate::error::{Error, Result};
use crate::store::BlockId;
use bytes::{Buf, BufMut};

/// Encoded descriptor size.
pub const DESCRIPTOR_SIZE: usize = 20;

const FLAG_INITIALIZED: u32 = 1;

/// Root location, height and element count of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Root block number. A leaf when `leaf_level == -1`, otherwise an index block.
    pub root: BlockId,
    /// Depth of the index levels above the leaves; -1 when there are none.
    pub leaf_level: i32,
    /// Number of live entries.
    pub size: usize,
}

impl Descriptor {
    /// Descriptor of a tree consisting of a single empty leaf.
    pub fn empty(root: BlockId) -> Self {
        Self { root, leaf_level: -1, size: 0 }
    }

    /// Encodes the descriptor.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let root = i32::try_from(self.root)
            .map_err(|_| Error::internal(format!("root block {} does not fit in i32", self.root)))?;
        let size = i32::try_from(self.size)
            .map_err(|_| Error::invalid_state(format!("tree size {} exceeds i32::MAX", self.size)))?;

        let mut buf = Vec::with_capacity(DESCRIPTOR_SIZE);
        buf.put_i32(root);
        buf.put_i32(self.leaf_level);
        buf.put_i32(size);
        buf.put_u32(FLAG_INITIALIZED);
        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);
        Ok(buf)
    }

    /// Decodes a descriptor from the reserve area. Returns `None` for a
    /// reserve that was never written.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < DESCRIPTOR_SIZE {
            return Err(Error::corruption(format!(
                "Reserve area too small for descriptor: {} bytes",
                data.len()
            )));
        }

        let mut buf = &data[..DESCRIPTOR_SIZE];
        let root = buf.get_i32();
        let leaf_level = buf.get_i32();
        let size = buf.get_i32();
        let flags = buf.get_u32();
        let expected = buf.get_u32();

        if flags & FLAG_INITIALIZED == 0 {
            return Ok(None);
        }

        let actual = crc32fast::hash(&data[..DESCRIPTOR_SIZE - 4]);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        if root < 0 || leaf_level < -1 || size < 0 {
            return Err(Error::corruption(format!(
                "Invalid descriptor: root={}, leaf_level={}, size={}",
                root, leaf_level, size
            )));
        }

        Ok(Some(Self { root: root as BlockId, leaf_level, size: size as usize }))
    }
}
