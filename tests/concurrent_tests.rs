// Concurrent Access Tests for blocktree
// A tree is shared across threads behind Arc<parking_lot::RwLock<_>>

use blocktree::codec::{U32Codec, U64Codec};
use blocktree::{BPlusTree, BlockFile, FileTree, Options};
use parking_lot::RwLock;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn shared_tree(dir: &TempDir) -> Arc<RwLock<FileTree<U32Codec, U64Codec>>> {
    let options = Options::new().block_size(256).max_blocks(1 << 16).sync_on_save(false);
    let store = BlockFile::open(dir.path().join("shared.blk"), options).unwrap();
    Arc::new(RwLock::new(BPlusTree::open(store, U32Codec, U64Codec).unwrap()))
}

/// Test concurrent readers over a stable tree
#[test]
fn test_concurrent_reads() {
    let dir = TempDir::new().unwrap();
    let tree = shared_tree(&dir);
    {
        let mut tree = tree.write();
        for i in 0..5_000u32 {
            tree.put(&i, &(i as u64 * 7)).unwrap();
        }
    }

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let mut handles = vec![];

    for thread_id in 0..num_threads {
        let tree = Arc::clone(&tree);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let tree = tree.read();
            for i in (thread_id as u32..5_000).step_by(num_threads) {
                assert_eq!(tree.get(&i).unwrap(), Some(i as u64 * 7));
            }
            let count = tree.range(1_000..2_000).unwrap().count();
            assert_eq!(count, 1_000);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Test writers taking turns with readers
#[test]
fn test_concurrent_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let tree = shared_tree(&dir);

    let writers = 4;
    let writes_per_thread = 500u32;
    let mut handles = vec![];

    for thread_id in 0..writers {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..writes_per_thread {
                let key = thread_id * writes_per_thread + i;
                tree.write().put(&key, &(key as u64)).unwrap();
                if i % 50 == 0 {
                    // Readers see a consistent tree between writes.
                    let tree = tree.read();
                    assert_eq!(tree.get(&key).unwrap(), Some(key as u64));
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let tree = tree.read();
    assert_eq!(tree.len(), (writers * writes_per_thread) as usize);
    tree.verify().unwrap();
}
