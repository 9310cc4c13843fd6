use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

mod common;
use common::create_test_buffer_pool;

use stratumdb::common::{PageId, Rid, INVALID_PAGE_ID};
use stratumdb::index::btree::{codec, BTreeNode, BPlusTree};
use stratumdb::BufferPoolManager;

fn rid_for(key: i64) -> Rid {
    Rid::new(0, key as u32)
}

/// Build a tree with small node sizes so splits and merges trigger early.
fn small_tree(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, BPlusTree<i64>, tempfile::NamedTempFile)> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(pool_size)?;
    let (_, header_page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(header_page_id, true);
    let tree = BPlusTree::new(Arc::clone(&buffer_pool), header_page_id, 5, 3)?;
    Ok((buffer_pool, tree, temp_file))
}

fn tree_height(buffer_pool: &Arc<BufferPoolManager>, tree: &BPlusTree<i64>) -> Result<usize> {
    let mut pid = tree.root_page_id()?;
    assert_ne!(pid, INVALID_PAGE_ID);
    let mut height = 1;
    loop {
        let page = buffer_pool.fetch_page(pid)?;
        let node: BTreeNode<i64> = codec::decode_node(&page.read())?;
        buffer_pool.unpin_page(pid, false);
        if node.is_leaf() {
            return Ok(height);
        }
        pid = node.child_at(0);
        height += 1;
    }
}

fn leftmost_leaf_keys(buffer_pool: &Arc<BufferPoolManager>, tree: &BPlusTree<i64>) -> Result<Vec<i64>> {
    let mut pid = tree.root_page_id()?;
    loop {
        let page = buffer_pool.fetch_page(pid)?;
        let node: BTreeNode<i64> = codec::decode_node(&page.read())?;
        buffer_pool.unpin_page(pid, false);
        if node.is_leaf() {
            return Ok(node.keys);
        }
        pid = node.child_at(0);
    }
}

/// Walk the whole tree checking the structural invariants: parent pointers
/// match, non-root nodes stay near the minimum fill, all leaves sit at the
/// same depth.
fn check_invariants(buffer_pool: &Arc<BufferPoolManager>, tree: &BPlusTree<i64>) -> Result<()> {
    let root = tree.root_page_id()?;
    if root == INVALID_PAGE_ID {
        return Ok(());
    }
    let mut leaf_depths = Vec::new();
    check_subtree(buffer_pool, root, INVALID_PAGE_ID, 1, &mut leaf_depths)?;
    assert!(leaf_depths.windows(2).all(|w| w[0] == w[1]), "ragged leaves");
    Ok(())
}

fn check_subtree(
    buffer_pool: &Arc<BufferPoolManager>,
    pid: PageId,
    expected_parent: PageId,
    depth: usize,
    leaf_depths: &mut Vec<usize>,
) -> Result<()> {
    let page = buffer_pool.fetch_page(pid)?;
    let node: BTreeNode<i64> = codec::decode_node(&page.read())?;
    buffer_pool.unpin_page(pid, false);

    assert_eq!(node.page_id, pid);
    assert_eq!(node.parent_page_id, expected_parent, "bad parent on page {}", pid);
    if expected_parent != INVALID_PAGE_ID {
        // Fresh split halves may sit one entry under the coalesce
        // threshold; deletion never lets a node fall further.
        assert!(
            node.size() + 1 >= node.min_size(),
            "page {} below minimum fill",
            pid
        );
    }
    if node.is_leaf() {
        assert!(node.keys.windows(2).all(|w| w[0] < w[1]));
        leaf_depths.push(depth);
    } else {
        for i in 0..node.size() {
            check_subtree(buffer_pool, node.child_at(i), pid, depth + 1, leaf_depths)?;
        }
    }
    Ok(())
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (_buffer_pool, tree, _temp_file) = small_tree(20)?;
    assert!(tree.is_empty()?);

    let mut result = Vec::new();
    assert!(!tree.get_value(&42, &mut result)?);
    assert!(result.is_empty());

    // Removing from an empty tree is a no-op.
    tree.remove(&42)?;
    assert!(tree.iter()?.next().is_none());
    Ok(())
}

#[test]
fn test_single_key_lifecycle() -> Result<()> {
    let (buffer_pool, tree, _temp_file) = small_tree(20)?;

    assert!(tree.insert(7, rid_for(7))?);
    let mut result = Vec::new();
    assert!(tree.get_value(&7, &mut result)?);
    assert_eq!(result, vec![rid_for(7)]);

    // A second insert of the same key fails and changes nothing.
    assert!(!tree.insert(7, Rid::new(9, 9))?);
    result.clear();
    assert!(tree.get_value(&7, &mut result)?);
    assert_eq!(result, vec![rid_for(7)]);

    // Insert then remove of a lone key leaves the empty tree.
    tree.remove(&7)?;
    assert!(tree.is_empty()?);
    assert_eq!(tree.root_page_id()?, INVALID_PAGE_ID);
    result.clear();
    assert!(!tree.get_value(&7, &mut result)?);
    check_invariants(&buffer_pool, &tree)?;
    Ok(())
}

#[test]
fn test_sequential_insert_and_splits() -> Result<()> {
    let (buffer_pool, tree, _temp_file) = small_tree(30)?;

    for key in 1..=15i64 {
        assert!(tree.insert(key, rid_for(key))?);
    }

    for key in 1..=15i64 {
        let mut result = Vec::new();
        assert!(tree.get_value(&key, &mut result)?, "key {} missing", key);
        assert_eq!(result, vec![rid_for(key)]);
    }

    // With leaf max 5 and internal max 3, fifteen keys make a three-level
    // tree whose leftmost leaf still holds the two smallest keys.
    assert_eq!(tree_height(&buffer_pool, &tree)?, 3);
    assert_eq!(leftmost_leaf_keys(&buffer_pool, &tree)?, vec![1, 2]);

    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=15).collect::<Vec<_>>());

    check_invariants(&buffer_pool, &tree)?;
    Ok(())
}

#[test]
fn test_delete_with_coalesce_and_redistribute() -> Result<()> {
    let (buffer_pool, tree, _temp_file) = small_tree(30)?;

    for key in 1..=15i64 {
        tree.insert(key, rid_for(key))?;
    }
    for key in [1i64, 5, 3, 7, 10, 14] {
        tree.remove(&key)?;
        check_invariants(&buffer_pool, &tree)?;
    }

    let remaining: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(remaining, vec![2, 4, 6, 8, 9, 11, 12, 13, 15]);

    for key in [1i64, 5, 3, 7, 10, 14] {
        let mut result = Vec::new();
        assert!(!tree.get_value(&key, &mut result)?);
    }
    Ok(())
}

#[test]
fn test_delete_everything_collapses_the_root() -> Result<()> {
    let (buffer_pool, tree, _temp_file) = small_tree(30)?;

    for key in 1..=20i64 {
        tree.insert(key, rid_for(key))?;
    }
    // Remove in an order that exercises both siblings of most nodes.
    for key in (1..=20i64).rev() {
        tree.remove(&key)?;
        check_invariants(&buffer_pool, &tree)?;
    }
    assert!(tree.is_empty()?);
    assert!(tree.iter()?.next().is_none());
    Ok(())
}

#[test]
fn test_iter_from_positions_at_first_key_geq() -> Result<()> {
    let (_buffer_pool, tree, _temp_file) = small_tree(30)?;

    for key in (2..=20i64).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    // Exact hit.
    let from_eight: Vec<i64> = tree.iter_from(&8)?.map(|(k, _)| k).collect();
    assert_eq!(from_eight, (8..=20).step_by(2).collect::<Vec<_>>());

    // Between keys: starts at the next larger one.
    let from_nine: Vec<i64> = tree.iter_from(&9)?.map(|(k, _)| k).collect();
    assert_eq!(from_nine, (10..=20).step_by(2).collect::<Vec<_>>());

    // Past the end.
    assert!(tree.iter_from(&21)?.next().is_none());
    Ok(())
}

#[test]
fn test_iterator_crosses_leaf_boundaries() -> Result<()> {
    let (_buffer_pool, tree, _temp_file) = small_tree(30)?;

    for key in 1..=40i64 {
        tree.insert(key, rid_for(key))?;
    }
    let mut iter = tree.iter()?;
    for expected in 1..=40i64 {
        let (key, rid) = iter.next().expect("iterator ended early");
        assert_eq!(key, expected);
        assert_eq!(rid, rid_for(expected));
    }
    assert!(iter.next().is_none());
    assert!(iter.is_end());
    Ok(())
}

#[test]
fn test_shuffled_workload_keeps_invariants() -> Result<()> {
    // A modest pool keeps pressure on pin bookkeeping: leaked pins would
    // exhaust the frames long before the workload ends.
    let (buffer_pool, tree, _temp_file) = small_tree(30)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);

    let mut keys: Vec<i64> = (1..=200).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?);
    }
    check_invariants(&buffer_pool, &tree)?;

    let mut to_remove = keys.clone();
    to_remove.shuffle(&mut rng);
    let (removed, kept) = to_remove.split_at(120);
    for &key in removed {
        tree.remove(&key)?;
    }
    check_invariants(&buffer_pool, &tree)?;

    let mut expected: Vec<i64> = kept.to_vec();
    expected.sort_unstable();
    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, expected);

    for &key in removed {
        let mut result = Vec::new();
        assert!(!tree.get_value(&key, &mut result)?);
    }
    for &key in kept {
        let mut result = Vec::new();
        assert!(tree.get_value(&key, &mut result)?);
        assert_eq!(result, vec![rid_for(key)]);
    }
    Ok(())
}

#[test]
fn test_default_sizes_hold_a_large_ordered_set() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let (_, header_page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(header_page_id, true);
    let tree: BPlusTree<i64> = BPlusTree::with_default_sizes(Arc::clone(&buffer_pool), header_page_id)?;

    for key in 0..1000i64 {
        assert!(tree.insert(key, rid_for(key))?);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..1000).collect::<Vec<_>>());
    Ok(())
}
