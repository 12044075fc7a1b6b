//! Split block file example for blocktree
//!
//! Index blocks live in a small memory-mapped region at the front of the
//! file while leaves use the larger main pool. This example bulk loads a
//! tree into a split file, reopens it and reports how the blocks are spread
//! across the two pools.

use blocktree::codec::{U32Codec, U64Codec};
use blocktree::{BPlusTree, BlockStore, Options, Pool, SplitBlockFile};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = "./example_split.blk";
    let options = Options::default()
        .block_size(4096)
        .max_blocks(64 * 1024)
        .region_block_size(512)
        .region_max_blocks(4096);

    {
        let store = SplitBlockFile::open(path, options.clone())?;
        let mut tree = BPlusTree::open(store, U32Codec, U64Codec)?;
        if !tree.is_empty() {
            tree.truncate()?;
        }

        println!("Bulk loading 200000 entries...");
        tree.create_index((0..200_000u32).map(|k| (k, k as u64 * k as u64)))?;
        tree.close()?;
    }

    let store = SplitBlockFile::open(path, options)?;
    let tree = BPlusTree::open(store, U32Codec, U64Codec)?;
    tree.verify()?;

    println!("Entries:       {}", tree.len());
    println!("Leaf level:    {}", tree.leaf_level());
    println!("Index blocks:  {}", tree.store().allocated_count(Pool::Index));
    println!("Leaf blocks:   {}", tree.store().allocated_count(Pool::Leaf));
    println!("1234^2 =       {:?}", tree.get(&1234)?);

    if let Some(key) = tree.get_key(150_000)? {
        println!("Entry 150000 has key {}", key);
    }

    Ok(())
}
