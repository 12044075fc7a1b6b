//! Basic usage example for blocktree
//!
//! This example demonstrates the fundamental operations:
//! - Opening a tree in a block file
//! - Writing key-value pairs
//! - Reading values and scanning ranges
//! - Deleting keys

use blocktree::codec::{StringCodec, U64Codec};
use blocktree::{BPlusTree, BlockFile, Options};
use std::ops::Bound;

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    // Configure block file options
    let options = Options::default().block_size(4096).max_blocks(16 * 1024);

    // Open the tree (the file is created if it doesn't exist)
    let store = BlockFile::open("./example_tree.blk", options)?;
    let mut tree = BPlusTree::open(store, StringCodec, U64Codec)?;

    println!("Tree opened with {} entries", tree.len());

    // Write some key-value pairs
    println!("Writing data...");
    for (i, fruit) in ["apple", "banana", "cherry", "date", "elderberry", "fig"].iter().enumerate() {
        tree.put(&fruit.to_string(), &(i as u64 * 10))?;
    }

    // Read values
    println!("Reading data...");
    if let Some(value) = tree.get(&"cherry".to_string())? {
        println!("cherry => {}", value);
    }

    // Scan a range in both directions
    println!("Fruits from banana up to (not including) fig:");
    for entry in tree.range("banana".to_string().."fig".to_string())? {
        let (key, value) = entry?;
        println!("  {} => {}", key, value);
    }
    println!("Same range, descending:");
    let descending = tree.iterator(true, Bound::Included("banana".to_string()), Bound::Excluded("fig".to_string()))?;
    for entry in descending {
        let (key, value) = entry?;
        println!("  {} => {}", key, value);
    }

    // Rank queries
    if let Some(position) = tree.get_position(&"date".to_string())? {
        println!("date is entry {} of {}", position.smaller_global, position.total_elements);
    }

    // Delete a key
    println!("Deleting banana...");
    tree.remove(&"banana".to_string())?;
    match tree.get(&"banana".to_string())? {
        Some(_) => println!("banana still exists (unexpected)"),
        None => println!("banana was successfully deleted"),
    }

    // Close the tree, persisting its descriptor
    tree.close()?;
    println!("Tree closed");

    Ok(())
}
