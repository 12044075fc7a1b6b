//! File header and layout of block files.
//!
//! ## Header Format
//!
//! ```text
//! [magic: 4 bytes]          // "BTRF" plain, "BTRS" split
//! [version: i32]
//! [block_size: i32]
//! [max_blocks: i32]
//! [reserve_size: i32]
//! [region_block_size: i32]  // split files only
//! [region_max_blocks: i32]  // split files only
//! ```
//!
//! All integers are big-endian. Every section after the header starts at an
//! offset rounded up to the main block size.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::store::bitset::Bitset;
use bytes::{Buf, BufMut};

/// Magic number of plain block files.
pub const PLAIN_MAGIC: &[u8; 4] = b"BTRF";

/// Magic number of split block files.
pub const SPLIT_MAGIC: &[u8; 4] = b"BTRS";

/// Current file format version.
pub const FORMAT_VERSION: i32 = 1;

/// Encoded header size of a plain file.
pub const PLAIN_HEADER_SIZE: usize = 20;

/// Encoded header size of a split file.
pub const SPLIT_HEADER_SIZE: usize = 28;

/// Size of the `BITSET_LEN` field preceding each bitset.
pub const BITSET_LEN_SIZE: u64 = 4;

/// Geometry of the region pool in a split file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGeometry {
    /// Region block size in bytes.
    pub block_size: u32,
    /// Number of region blocks.
    pub max_blocks: u32,
}

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: i32,
    /// Main block size in bytes.
    pub block_size: u32,
    /// Number of main blocks.
    pub max_blocks: u32,
    /// Reserve area size in bytes.
    pub reserve_size: u32,
    /// Region pool geometry, present in split files.
    pub region: Option<RegionGeometry>,
}

fn to_i32(value: usize, name: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::invalid_argument(format!("{} does not fit in i32", name)))
}

fn read_positive(buf: &mut &[u8], name: &str) -> Result<u32> {
    let value = buf.get_i32();
    if value <= 0 {
        return Err(Error::format_mismatch(format!("{} must be positive, got {}", name, value)));
    }
    Ok(value as u32)
}

impl FileHeader {
    /// Builds the header of a plain file from options.
    pub fn plain(options: &Options) -> Result<Self> {
        Ok(Self {
            version: FORMAT_VERSION,
            block_size: to_i32(options.block_size, "block_size")? as u32,
            max_blocks: options.max_blocks,
            reserve_size: to_i32(options.reserve_size, "reserve_size")? as u32,
            region: None,
        })
    }

    /// Builds the header of a split file from options.
    pub fn split(options: &Options) -> Result<Self> {
        Ok(Self {
            region: Some(RegionGeometry {
                block_size: to_i32(options.region_block_size, "region_block_size")? as u32,
                max_blocks: options.region_max_blocks,
            }),
            ..Self::plain(options)?
        })
    }

    /// Encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        if self.region.is_some() {
            SPLIT_HEADER_SIZE
        } else {
            PLAIN_HEADER_SIZE
        }
    }

    /// Encodes the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self.region {
            Some(_) => buf.put_slice(SPLIT_MAGIC),
            None => buf.put_slice(PLAIN_MAGIC),
        }
        buf.put_i32(self.version);
        buf.put_i32(self.block_size as i32);
        buf.put_i32(self.max_blocks as i32);
        buf.put_i32(self.reserve_size as i32);
        if let Some(region) = self.region {
            buf.put_i32(region.block_size as i32);
            buf.put_i32(region.max_blocks as i32);
        }
        buf
    }

    /// Decodes a header, expecting a split file when `split` is set.
    pub fn decode(data: &[u8], split: bool) -> Result<Self> {
        let (magic, size) = if split {
            (SPLIT_MAGIC, SPLIT_HEADER_SIZE)
        } else {
            (PLAIN_MAGIC, PLAIN_HEADER_SIZE)
        };
        if data.len() < size {
            return Err(Error::format_mismatch(format!(
                "Header too short: expected {} bytes, got {}",
                size,
                data.len()
            )));
        }
        if &data[..4] != magic {
            return Err(Error::format_mismatch(format!(
                "Invalid magic: expected {:?}, got {:?}",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(&data[..4])
            )));
        }

        let mut buf = &data[4..size];
        let version = buf.get_i32();
        if version != FORMAT_VERSION {
            return Err(Error::format_mismatch(format!(
                "Unsupported version {}, expected {}",
                version, FORMAT_VERSION
            )));
        }
        let block_size = read_positive(&mut buf, "block_size")?;
        let max_blocks = read_positive(&mut buf, "max_blocks")?;
        let reserve_size = read_positive(&mut buf, "reserve_size")?;
        let region = if split {
            Some(RegionGeometry {
                block_size: read_positive(&mut buf, "region_block_size")?,
                max_blocks: read_positive(&mut buf, "region_max_blocks")?,
            })
        } else {
            None
        };

        Ok(Self { version, block_size, max_blocks, reserve_size, region })
    }

    /// Checks that an existing file's header matches the requested geometry.
    pub fn check_matches(&self, expected: &FileHeader) -> Result<()> {
        let mismatch = |field: &str, found: u32, wanted: u32| -> Result<()> {
            Err(Error::format_mismatch(format!(
                "{} is {} in the file but {} was requested",
                field, found, wanted
            )))
        };
        if self.block_size != expected.block_size {
            return mismatch("block_size", self.block_size, expected.block_size);
        }
        if self.max_blocks != expected.max_blocks {
            return mismatch("max_blocks", self.max_blocks, expected.max_blocks);
        }
        if self.reserve_size != expected.reserve_size {
            return mismatch("reserve_size", self.reserve_size, expected.reserve_size);
        }
        if let (Some(found), Some(wanted)) = (self.region, expected.region) {
            if found.block_size != wanted.block_size {
                return mismatch("region_block_size", found.block_size, wanted.block_size);
            }
            if found.max_blocks != wanted.max_blocks {
                return mismatch("region_max_blocks", found.max_blocks, wanted.max_blocks);
            }
        }
        Ok(())
    }
}

/// Byte offsets of each file section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Region bitset (`BITSET_LEN` field first). Split files only.
    pub region_bitset_offset: u64,
    /// First region block. Split files only.
    pub region_blocks_offset: u64,
    /// Main pool bitset (`BITSET_LEN` field first).
    pub bitset_offset: u64,
    /// Reserve area.
    pub reserve_offset: u64,
    /// First main block.
    pub blocks_offset: u64,
}

impl Layout {
    /// Computes section offsets for `header`.
    pub fn new(header: &FileHeader) -> Self {
        let align = header.block_size as u64;
        let align_up = |offset: u64| offset.div_ceil(align) * align;

        let mut offset = align_up(header.encoded_len() as u64);
        let (region_bitset_offset, region_blocks_offset) = match header.region {
            Some(region) => {
                let bitset = offset;
                let blocks = align_up(bitset + BITSET_LEN_SIZE + Bitset::byte_len(region.max_blocks) as u64);
                offset = align_up(blocks + region.max_blocks as u64 * region.block_size as u64);
                (bitset, blocks)
            }
            None => (0, 0),
        };

        let bitset_offset = offset;
        let reserve_offset = align_up(bitset_offset + BITSET_LEN_SIZE + Bitset::byte_len(header.max_blocks) as u64);
        let blocks_offset = align_up(reserve_offset + header.reserve_size as u64);

        Self { region_bitset_offset, region_blocks_offset, bitset_offset, reserve_offset, blocks_offset }
    }

    /// Minimum file length for a freshly created file.
    pub fn initial_len(&self) -> u64 {
        self.blocks_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_options() -> Options {
        Options::new()
            .block_size(64)
            .max_blocks(100)
            .region_block_size(32)
            .region_max_blocks(10)
            .reserve_size(40)
    }

    #[test]
    fn test_plain_header_roundtrip() {
        let header = FileHeader::plain(&small_options()).unwrap();
        let encoded = header.encode();
        assert_eq!(encoded.len(), PLAIN_HEADER_SIZE);
        assert_eq!(&encoded[..4], b"BTRF");
        assert_eq!(&encoded[8..12], &64i32.to_be_bytes());
        assert_eq!(FileHeader::decode(&encoded, false).unwrap(), header);
    }

    #[test]
    fn test_split_header_roundtrip() {
        let header = FileHeader::split(&small_options()).unwrap();
        let encoded = header.encode();
        assert_eq!(encoded.len(), SPLIT_HEADER_SIZE);
        assert_eq!(FileHeader::decode(&encoded, true).unwrap(), header);
        // A split file is not a plain file.
        assert!(matches!(FileHeader::decode(&encoded, false), Err(Error::FormatMismatch(_))));
    }

    #[test]
    fn test_bad_version() {
        let mut encoded = FileHeader::plain(&small_options()).unwrap().encode();
        encoded[4..8].copy_from_slice(&7i32.to_be_bytes());
        assert!(matches!(FileHeader::decode(&encoded, false), Err(Error::FormatMismatch(_))));
    }

    #[test]
    fn test_check_matches() {
        let header = FileHeader::plain(&small_options()).unwrap();
        assert!(header.check_matches(&header).is_ok());
        let other = FileHeader::plain(&small_options().block_size(128)).unwrap();
        let err = header.check_matches(&other).unwrap_err();
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn test_plain_layout() {
        let layout = Layout::new(&FileHeader::plain(&small_options()).unwrap());
        // header 20 -> 64; bitset 4 + 13 -> 128; reserve 40 -> 192
        assert_eq!(layout.bitset_offset, 64);
        assert_eq!(layout.reserve_offset, 128);
        assert_eq!(layout.blocks_offset, 192);
    }

    #[test]
    fn test_split_layout() {
        let layout = Layout::new(&FileHeader::split(&small_options()).unwrap());
        // header 28 -> 64; region bitset 4 + 2 -> 128; region blocks 10 * 32 -> 448
        assert_eq!(layout.region_bitset_offset, 64);
        assert_eq!(layout.region_blocks_offset, 128);
        assert_eq!(layout.bitset_offset, 448);
        assert_eq!(layout.reserve_offset, 512);
        assert_eq!(layout.blocks_offset, 576);
    }
}
