//! Configuration options for blocktree block files.
//!
//! The geometry fields (block sizes, block counts, reserve size) are written
//! into the file header when a file is created and must match exactly when
//! the file is reopened.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Smallest block size accepted for either pool.
pub const MIN_BLOCK_SIZE: usize = 32;

/// Smallest reserve area; the tree descriptor needs 20 bytes.
pub const MIN_RESERVE_SIZE: usize = 20;

/// Configuration options for opening a block file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the file if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the file already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Size of a main pool block (leaf blocks, and index blocks in a plain file).
    /// Default: 4KB
    pub block_size: usize,

    /// Maximum number of blocks in the main pool.
    /// Default: 65536
    pub max_blocks: u32,

    /// Size of a region pool block (index blocks in a split file).
    /// Default: 1KB
    pub region_block_size: usize,

    /// Maximum number of blocks in the region pool.
    /// Default: 16384
    pub region_max_blocks: u32,

    /// Size of the reserve area holding engine metadata.
    /// Default: 64 bytes
    pub reserve_size: usize,

    /// Call `fsync` (and flush the region mapping) on every save.
    /// Default: true
    pub sync_on_save: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            block_size: 4 * 1024, // 4KB
            max_blocks: 64 * 1024,
            region_block_size: 1024, // 1KB
            region_max_blocks: 16 * 1024,
            reserve_size: 64,
            sync_on_save: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the file if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing file is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the main pool block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the main pool block count.
    pub fn max_blocks(mut self, count: u32) -> Self {
        self.max_blocks = count;
        self
    }

    /// Sets the region pool block size.
    pub fn region_block_size(mut self, size: usize) -> Self {
        self.region_block_size = size;
        self
    }

    /// Sets the region pool block count.
    pub fn region_max_blocks(mut self, count: u32) -> Self {
        self.region_max_blocks = count;
        self
    }

    /// Sets the reserve area size.
    pub fn reserve_size(mut self, size: usize) -> Self {
        self.reserve_size = size;
        self
    }

    /// Enables or disables syncing on save.
    pub fn sync_on_save(mut self, value: bool) -> Self {
        self.sync_on_save = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > i32::MAX as usize {
            return Err(Error::invalid_argument(format!(
                "block_size must be between {} and {}",
                MIN_BLOCK_SIZE,
                i32::MAX
            )));
        }
        if self.region_block_size < MIN_BLOCK_SIZE || self.region_block_size > i32::MAX as usize {
            return Err(Error::invalid_argument(format!(
                "region_block_size must be between {} and {}",
                MIN_BLOCK_SIZE,
                i32::MAX
            )));
        }
        // Block numbers are persisted as i32 and u32::MAX marks "no block".
        if self.max_blocks == 0 || self.max_blocks > i32::MAX as u32 {
            return Err(Error::invalid_argument("max_blocks must be between 1 and i32::MAX"));
        }
        if self.region_max_blocks == 0 || self.region_max_blocks > i32::MAX as u32 {
            return Err(Error::invalid_argument(
                "region_max_blocks must be between 1 and i32::MAX",
            ));
        }
        if self.reserve_size < MIN_RESERVE_SIZE || self.reserve_size > i32::MAX as usize {
            return Err(Error::invalid_argument(format!(
                "reserve_size must be at least {} bytes",
                MIN_RESERVE_SIZE
            )));
        }
        Ok(())
    }

    /// Parses options from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Serializes the options to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads options from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Writes options to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert_eq!(opts.block_size, 4096);
        assert_eq!(opts.reserve_size, 64);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .block_size(8 * 1024)
            .max_blocks(128)
            .region_block_size(512)
            .sync_on_save(false);

        assert_eq!(opts.block_size, 8 * 1024);
        assert_eq!(opts.max_blocks, 128);
        assert_eq!(opts.region_block_size, 512);
        assert!(!opts.sync_on_save);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.block_size = 16;
        assert!(opts.validate().is_err());

        opts.block_size = 4096;
        opts.max_blocks = 0;
        assert!(opts.validate().is_err());

        opts.max_blocks = 10;
        opts.reserve_size = 8;
        assert!(matches!(opts.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_options_json() {
        let opts = Options::from_json(r#"{ "block_size": 512, "max_blocks": 99 }"#).unwrap();
        assert_eq!(opts.block_size, 512);
        assert_eq!(opts.max_blocks, 99);
        assert_eq!(opts.reserve_size, Options::default().reserve_size);

        let round = Options::from_json(&opts.to_json().unwrap()).unwrap();
        assert_eq!(round, opts);

        assert!(Options::from_json(r#"{ "block_size": 1 }"#).is_err());
    }

    #[test]
    fn test_options_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("options.json");
        let opts = Options::new().block_size(1024);
        opts.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), opts);
    }
}
