//! # blocktree - An Embedded B+Tree Key-Value Store
//!
//! blocktree keeps sorted key/value entries in a disk-resident B+Tree whose
//! nodes are fixed-size blocks inside a single file. Keys and values are
//! typed through pluggable codecs, so the tree itself only ever moves
//! encoded byte spans around.
//!
//! ## Architecture
//!
//! The engine consists of several layers:
//!
//! - **Codecs**: encode, decode, size and order typed keys and values
//! - **Blocks**: sorted entry containers with search, split and merge
//! - **Block stores**: block allocation over a plain file, a split file
//!   with a memory-mapped index region, or memory
//! - **B+Tree**: lookups, updates, range iteration, rank queries and bulk
//!   loading on top of a block store
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use blocktree::codec::{StringCodec, U32Codec};
//! use blocktree::{BPlusTree, BlockFile, Options};
//!
//! # fn main() -> Result<(), blocktree::Error> {
//! // Open or create a block file and the tree inside it
//! let store = BlockFile::open("./data.blk", Options::default())?;
//! let mut tree = BPlusTree::open(store, StringCodec, U32Codec)?;
//!
//! // Write operations
//! tree.put(&"key1".to_string(), &1)?;
//! tree.put(&"key2".to_string(), &2)?;
//!
//! // Read operations
//! if let Some(value) = tree.get(&"key1".to_string())? {
//!     println!("Found: {}", value);
//! }
//!
//! // Range scan
//! for entry in tree.range("key1".to_string().."key9".to_string())? {
//!     let (key, value) = entry?;
//!     println!("{} => {}", key, value);
//! }
//!
//! // Delete operations
//! tree.remove(&"key1".to_string())?;
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod block;
pub mod btree;
pub mod codec;
pub mod config;
pub mod error;
pub mod store;

// Re-exports
pub use btree::{BPlusTree, FileTree, RankSnapshot, SplitTree, TreeIter};
pub use config::Options;
pub use error::{Error, Result};
pub use store::{BlockFile, BlockId, BlockStore, MemoryBlockStore, Pool, SplitBlockFile, NO_BLOCK};
