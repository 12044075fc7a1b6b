// End-to-End Integration Tests for blocktree
// These tests verify complete CRUD flows over the file-backed stores

use blocktree::codec::{BincodeCodec, StringCodec, U32Codec, U64Codec};
use blocktree::{BPlusTree, BlockFile, BlockStore, Options, Pool, SplitBlockFile};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

fn small_blocks() -> Options {
    Options::new()
        .block_size(256)
        .max_blocks(8192)
        .region_block_size(128)
        .region_max_blocks(4096)
}

/// Test complete CRUD flow
#[test]
fn test_e2e_complete_crud() {
    let dir = TempDir::new().unwrap();
    let store = BlockFile::open(dir.path().join("crud.blk"), Options::default()).unwrap();
    let mut tree = BPlusTree::open(store, StringCodec, StringCodec).unwrap();

    // Create
    tree.put(&"user:1".to_string(), &"Alice".to_string()).unwrap();
    tree.put(&"user:2".to_string(), &"Bob".to_string()).unwrap();
    tree.put(&"user:3".to_string(), &"Charlie".to_string()).unwrap();

    // Read
    assert_eq!(tree.get(&"user:1".to_string()).unwrap(), Some("Alice".to_string()));
    assert_eq!(tree.get(&"user:2".to_string()).unwrap(), Some("Bob".to_string()));

    // Update
    let previous = tree.put(&"user:2".to_string(), &"Bob_Updated".to_string()).unwrap();
    assert_eq!(previous, Some("Bob".to_string()));
    assert_eq!(tree.get(&"user:2".to_string()).unwrap(), Some("Bob_Updated".to_string()));

    // Delete
    assert_eq!(tree.remove(&"user:1".to_string()).unwrap(), Some("Alice".to_string()));
    assert_eq!(tree.get(&"user:1".to_string()).unwrap(), None);
    assert_eq!(tree.len(), 2);
    tree.verify().unwrap();
}

/// Test data survives close and reopen of a plain file
#[test]
fn test_e2e_plain_file_persistence() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.blk");

    {
        let store = BlockFile::open(&path, small_blocks()).unwrap();
        let mut tree = BPlusTree::open(store, U32Codec, U64Codec).unwrap();
        for i in 0..5000u32 {
            tree.put(&i, &(i as u64 * 3)).unwrap();
        }
        for i in (0..5000u32).step_by(3) {
            tree.remove(&i).unwrap();
        }
        tree.close().unwrap();
    }

    let store = BlockFile::open(&path, small_blocks()).unwrap();
    let tree = BPlusTree::open(store, U32Codec, U64Codec).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.len(), 5000 - 1667);
    for i in 0..5000u32 {
        let expected = if i % 3 == 0 { None } else { Some(i as u64 * 3) };
        assert_eq!(tree.get(&i).unwrap(), expected);
    }
}

/// Test that a split file keeps index blocks in the region pool
#[test]
fn test_e2e_split_file_persistence() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("split.blk");

    {
        let store = SplitBlockFile::open(&path, small_blocks()).unwrap();
        let mut tree = BPlusTree::open(store, StringCodec, U32Codec).unwrap();
        for i in 0..3000u32 {
            tree.put(&format!("key{:06}", i), &i).unwrap();
        }
        assert!(tree.leaf_level() >= 1);
        assert!(tree.store().allocated_count(Pool::Index) > 0);
        assert_eq!(tree.store().block_size(Pool::Index), 128);
        tree.close().unwrap();
    }

    let store = SplitBlockFile::open(&path, small_blocks()).unwrap();
    let tree = BPlusTree::open(store, StringCodec, U32Codec).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.len(), 3000);
    assert_eq!(tree.get(&"key001234".to_string()).unwrap(), Some(1234));

    let keys: Vec<String> = tree
        .range("key000100".to_string().."key000105".to_string())
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, (100..105).map(|i| format!("key{:06}", i)).collect::<Vec<_>>());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
    tags: Vec<String>,
}

/// Test serde values through the bincode codec
#[test]
fn test_e2e_serialized_values() {
    let dir = TempDir::new().unwrap();
    let store = BlockFile::open(dir.path().join("accounts.blk"), Options::default()).unwrap();
    let mut tree = BPlusTree::open(store, U64Codec, BincodeCodec::<Account>::new()).unwrap();

    for id in 0..200u64 {
        let account = Account {
            owner: format!("owner-{}", id),
            balance: id as i64 * 100 - 5000,
            tags: vec!["active".to_string(); (id % 3) as usize],
        };
        tree.put(&id, &account).unwrap();
    }

    let account = tree.get(&42).unwrap().unwrap();
    assert_eq!(account.owner, "owner-42");
    assert_eq!(account.balance, -800);
    assert!(account.tags.is_empty());
}

/// Test bulk loading, rank queries and truncation together
#[test]
fn test_e2e_bulk_load_and_rank() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let store = BlockFile::open(dir.path().join("bulk.blk"), small_blocks()).unwrap();
    let mut tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();

    tree.create_index((0..10_000u32).map(|i| (i * 2, i))).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.len(), 10_000);

    let snapshot = tree.get_position(&4000).unwrap().unwrap();
    assert_eq!(snapshot.smaller_global, 2000);
    assert_eq!(snapshot.total_elements, 10_000);
    assert_eq!(tree.get_position(&4001).unwrap(), None);
    assert_eq!(tree.get_position_with_missing(&4001).unwrap().smaller_global, 2001);
    assert_eq!(tree.get_key(2000).unwrap(), Some(4000));

    tree.truncate().unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.store().allocated_count(Pool::Leaf), 1);
    tree.verify().unwrap();
}

/// Test descending iteration over a file tree
#[test]
fn test_e2e_descending_scan() {
    let dir = TempDir::new().unwrap();
    let store = BlockFile::open(dir.path().join("desc.blk"), small_blocks()).unwrap();
    let mut tree = BPlusTree::open(store, U32Codec, U32Codec).unwrap();
    for i in 0..1000u32 {
        tree.put(&i, &i).unwrap();
    }

    use std::ops::Bound;
    let keys: Vec<u32> = tree
        .iterator(true, Bound::Included(100), Bound::Included(900))
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(keys, (100..=900).rev().collect::<Vec<_>>());
}
