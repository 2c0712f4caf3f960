//! B+ tree integration tests.
//!
//! Covers the end-to-end behavior of the index over a real buffer pool:
//! structural shape after splits and merges, ordered iteration under
//! shuffled workloads, concurrent disjoint inserts, and the structural
//! invariants (size bounds, in-node ordering, separator partitioning,
//! uniform leaf depth) after mutation storms.

use marrow_buffer::{BufferPool, BufferPoolConfig, MemoryDiskManager};
use marrow_common::page::{PageId, Rid};
use marrow_common::MarrowError;
use marrow_storage::{BPlusTree, BTreeInternalPage, BTreeLeafPage, BTreePage, FileDiskManager};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;

fn rid(n: i64) -> Rid {
    Rid::new(PageId(n as i32), n as u32)
}

fn create_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> (Arc<BufferPool>, BPlusTree) {
    let pool = Arc::new(BufferPool::new(
        BufferPoolConfig {
            pool_size,
            replacer_k: 2,
        },
        Arc::new(MemoryDiskManager::new()),
    ));
    let (header_id, guard) = pool.new_page().unwrap();
    drop(guard);
    let tree = BPlusTree::new(
        "test_index",
        header_id,
        Arc::clone(&pool),
        leaf_max,
        internal_max,
    )
    .unwrap();
    (pool, tree)
}

fn collect_keys(tree: &BPlusTree) -> Vec<i64> {
    tree.iter()
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect()
}

/// Recursively validates a subtree and returns its leaf depth.
///
/// `low`/`high` bound the keys the subtree may contain: every key `k`
/// must satisfy `low <= k < high`.
fn check_subtree(
    pool: &BufferPool,
    page_id: PageId,
    low: Option<i64>,
    high: Option<i64>,
    is_root: bool,
) -> usize {
    let guard = pool.fetch_page_read(page_id).unwrap();
    let page = BTreePage::new(guard.data());
    let size = page.size();

    assert!(size <= page.max_size(), "node {page_id} over max size");
    if !is_root {
        assert!(size >= page.min_size(), "node {page_id} under min size");
    }

    if page.is_leaf() {
        let leaf = BTreeLeafPage::new(guard.data());
        for i in 0..size as usize {
            let key = leaf.key_at(i);
            if i > 0 {
                assert!(leaf.key_at(i - 1) < key, "leaf {page_id} out of order");
            }
            if let Some(lo) = low {
                assert!(key >= lo, "leaf {page_id} key {key} below bound {lo}");
            }
            if let Some(hi) = high {
                assert!(key < hi, "leaf {page_id} key {key} above bound {hi}");
            }
        }
        return 1;
    }

    assert!(size >= 2, "internal {page_id} with fewer than two children");
    let node = BTreeInternalPage::new(guard.data());
    for i in 2..size as usize {
        assert!(
            node.key_at(i - 1) < node.key_at(i),
            "internal {page_id} separators out of order"
        );
    }

    let mut depth = None;
    for i in 0..size as usize {
        let child_low = if i == 0 { low } else { Some(node.key_at(i)) };
        let child_high = if i + 1 < size as usize {
            Some(node.key_at(i + 1))
        } else {
            high
        };
        let child_depth = check_subtree(pool, node.child_at(i), child_low, child_high, false);
        match depth {
            None => depth = Some(child_depth),
            Some(previous) => assert_eq!(previous, child_depth, "uneven leaf depth"),
        }
    }
    depth.unwrap() + 1
}

fn check_tree(pool: &BufferPool, tree: &BPlusTree) {
    let root = tree.root_page_id().unwrap();
    if root.is_valid() {
        check_subtree(pool, root, None, None, true);
    }
}

#[test]
fn test_two_level_shape_after_sequential_inserts() {
    // Inserting 1..=5 with leaf_max=4 splits once: root separator 3,
    // leaves [1,2] and [3,4,5].
    let (pool, tree) = create_tree(50, 4, 4);
    for k in 1..=5 {
        assert!(tree.insert(k, rid(k)).unwrap());
    }

    let root_id = tree.root_page_id().unwrap();
    let root_guard = pool.fetch_page_read(root_id).unwrap();
    assert!(!BTreePage::new(root_guard.data()).is_leaf());
    let root = BTreeInternalPage::new(root_guard.data());
    assert_eq!(root.size(), 2);
    assert_eq!(root.key_at(1), 3);

    let left_id = root.child_at(0);
    let right_id = root.child_at(1);

    let left_guard = pool.fetch_page_read(left_id).unwrap();
    let left = BTreeLeafPage::new(left_guard.data());
    assert_eq!(left.size(), 2);
    assert_eq!((left.key_at(0), left.key_at(1)), (1, 2));
    assert_eq!(left.next_page_id(), right_id);

    let right_guard = pool.fetch_page_read(right_id).unwrap();
    let right = BTreeLeafPage::new(right_guard.data());
    assert_eq!(right.size(), 3);
    assert_eq!((right.key_at(0), right.key_at(2)), (3, 5));
    assert_eq!(right.next_page_id(), PageId::INVALID);
}

#[test]
fn test_remove_merges_and_collapses_root() {
    // After 1..=5, removing 1 leaves [2] underfull; it merges with its
    // right sibling and the root collapses back to a single leaf.
    let (pool, tree) = create_tree(50, 4, 4);
    for k in 1..=5 {
        tree.insert(k, rid(k)).unwrap();
    }
    tree.remove(1).unwrap();

    let root_id = tree.root_page_id().unwrap();
    {
        let guard = pool.fetch_page_read(root_id).unwrap();
        assert!(BTreePage::new(guard.data()).is_leaf());
        let leaf = BTreeLeafPage::new(guard.data());
        assert_eq!(leaf.size(), 4);
        let keys: Vec<_> = (0..4).map(|i| leaf.key_at(i)).collect();
        assert_eq!(keys, vec![2, 3, 4, 5]);
        assert_eq!(leaf.next_page_id(), PageId::INVALID);
    }
    check_tree(&pool, &tree);
}

#[test]
fn test_shuffled_insert_ordered_iteration() {
    let (pool, tree) = create_tree(50, 4, 4);
    let mut keys: Vec<i64> = (1..=100).collect();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    keys.shuffle(&mut rng);

    for &k in &keys {
        assert!(tree.insert(k, rid(k)).unwrap());
    }
    check_tree(&pool, &tree);
    assert_eq!(collect_keys(&tree), (1..=100).collect::<Vec<_>>());

    for k in (2..=100).step_by(2) {
        tree.remove(k).unwrap();
    }
    check_tree(&pool, &tree);
    assert_eq!(
        collect_keys(&tree),
        (1..=99).step_by(2).collect::<Vec<_>>()
    );
    for k in (1..=99).step_by(2) {
        assert_eq!(tree.get_value(k).unwrap(), Some(rid(k)));
    }
    for k in (2..=100).step_by(2) {
        assert_eq!(tree.get_value(k).unwrap(), None);
    }
}

#[test]
fn test_concurrent_disjoint_inserts() {
    // Two threads insert disjoint ranges over a 50-frame pool; after
    // joining, iteration yields every key exactly once, in order.
    let (pool, tree) = create_tree(50, 16, 16);
    let tree_ref = &tree;

    std::thread::scope(|s| {
        s.spawn(move || {
            for k in 0..10_000i64 {
                assert!(tree_ref.insert(k, rid(k)).unwrap());
            }
        });
        s.spawn(move || {
            for k in 10_000..20_000i64 {
                assert!(tree_ref.insert(k, rid(k)).unwrap());
            }
        });
    });

    check_tree(&pool, &tree);
    let keys = collect_keys(&tree);
    assert_eq!(keys.len(), 20_000);
    assert_eq!(keys, (0..20_000).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (_pool, tree) = create_tree(50, 8, 8);
    for k in 0..1_000i64 {
        tree.insert(k, rid(k)).unwrap();
    }

    let tree_ref = &tree;
    std::thread::scope(|s| {
        s.spawn(move || {
            for k in 1_000..2_000i64 {
                assert!(tree_ref.insert(k, rid(k)).unwrap());
            }
        });
        s.spawn(move || {
            // Keys written before the writer started must stay visible.
            for _ in 0..10 {
                for k in (0..1_000i64).step_by(97) {
                    assert_eq!(tree_ref.get_value(k).unwrap(), Some(rid(k)));
                }
            }
        });
    });

    for k in 0..2_000i64 {
        assert_eq!(tree.get_value(k).unwrap(), Some(rid(k)));
    }
}

#[test]
fn test_mutation_storm_preserves_invariants() {
    let (pool, tree) = create_tree(50, 4, 5);
    let mut rng = StdRng::seed_from_u64(42);
    let mut reference = BTreeSet::new();
    let mut keys: Vec<i64> = (0..300).collect();

    for _ in 0..3 {
        keys.shuffle(&mut rng);
        for &k in &keys[..200] {
            assert_eq!(tree.insert(k, rid(k)).unwrap(), reference.insert(k));
        }
        check_tree(&pool, &tree);

        keys.shuffle(&mut rng);
        for &k in &keys[..150] {
            tree.remove(k).unwrap();
            reference.remove(&k);
        }
        check_tree(&pool, &tree);

        assert_eq!(
            collect_keys(&tree),
            reference.iter().copied().collect::<Vec<_>>()
        );
    }
}

#[test]
fn test_iter_empty_tree() {
    let (_pool, tree) = create_tree(16, 4, 4);
    assert!(tree.iter().unwrap().next().is_none());
    assert!(tree.iter_from(5).unwrap().next().is_none());
}

#[test]
fn test_iter_single_leaf() {
    let (_pool, tree) = create_tree(16, 4, 4);
    for k in [3, 1, 2] {
        tree.insert(k, rid(k)).unwrap();
    }

    let pairs: Vec<(i64, Rid)> = tree.iter().unwrap().map(|item| item.unwrap()).collect();
    assert_eq!(pairs, vec![(1, rid(1)), (2, rid(2)), (3, rid(3))]);
}

#[test]
fn test_iter_from_positions() {
    // Leaves after the split: [10, 20] and [30, 40, 50].
    let (_pool, tree) = create_tree(50, 4, 4);
    for k in [10, 20, 30, 40, 50] {
        tree.insert(k, rid(k)).unwrap();
    }

    let keys: Vec<i64> = tree
        .iter_from(15)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(keys, vec![20, 30, 40, 50]);

    let keys: Vec<i64> = tree
        .iter_from(30)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(keys, vec![30, 40, 50]);

    // No slot >= 25 exists on the leaf the probe lands in.
    assert!(tree.iter_from(25).unwrap().next().is_none());
    // Past the largest key entirely.
    assert!(tree.iter_from(60).unwrap().next().is_none());
}

#[test]
fn test_corrupted_node_type_surfaces_as_error() {
    let (pool, tree) = create_tree(16, 4, 4);
    for k in 1..=3 {
        tree.insert(k, rid(k)).unwrap();
    }

    // Scribble over the root's type tag; descents must reject the page
    // instead of walking it as an internal node.
    let root_id = tree.root_page_id().unwrap();
    {
        let mut guard = pool.fetch_page_write(root_id).unwrap();
        guard.data_mut()[0..4].copy_from_slice(&9u32.to_le_bytes());
    }

    assert!(matches!(
        tree.get_value(1),
        Err(MarrowError::InvalidNodeType(9))
    ));
    assert!(matches!(
        tree.iter(),
        Err(MarrowError::InvalidNodeType(9))
    ));
}

#[test]
fn test_tree_over_file_disk_manager() {
    // A small pool forces constant eviction, so every page cycles
    // through the data file and back.
    let dir = tempdir().unwrap();
    let disk = Arc::new(FileDiskManager::open(dir.path().join("marrow.db"), false).unwrap());
    let pool = Arc::new(BufferPool::new(
        BufferPoolConfig {
            pool_size: 16,
            replacer_k: 2,
        },
        disk,
    ));
    let (header_id, guard) = pool.new_page().unwrap();
    drop(guard);
    let tree = BPlusTree::new("file_index", header_id, Arc::clone(&pool), 4, 4).unwrap();

    for k in 1..=200 {
        assert!(tree.insert(k, rid(k)).unwrap());
    }
    check_tree(&pool, &tree);
    for k in 1..=200 {
        assert_eq!(tree.get_value(k).unwrap(), Some(rid(k)), "key {k}");
    }
    assert_eq!(collect_keys(&tree), (1..=200).collect::<Vec<_>>());
}
