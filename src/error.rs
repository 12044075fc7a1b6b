//! Error types for the blocktree storage engine.

use crate::store::Pool;
use std::io;
use thiserror::Error;

/// The result type used throughout blocktree.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for blocktree operations.
///
/// A key that is absent is never an error: lookups and removals return
/// `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred while reading or writing the backing file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The allocator has no free block left in the given pool.
    #[error("Out of space: all {max_blocks} blocks of the {pool} pool are allocated")]
    OutOfSpace {
        /// The pool that ran out of blocks.
        pool: Pool,
        /// The configured maximum block count of that pool.
        max_blocks: u32,
    },

    /// A read, write or free touched a block whose allocation bit is clear.
    #[error("Block {block} of the {pool} pool is not allocated")]
    NotAllocated {
        /// The pool that was addressed.
        pool: Pool,
        /// The block number.
        block: u32,
    },

    /// The file header does not describe a file usable by this engine.
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// Data corruption was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The tree or store is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A backing file does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A backing file already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new format mismatch error.
    pub fn format_mismatch(msg: impl Into<String>) -> Self {
        Error::FormatMismatch(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
