use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use crate::common::config::{PageId, INVALID_PAGE_ID};
use crate::common::rid::Rid;
use crate::index::btree::codec;
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::{BasicPageGuard, BufferPoolManager};

/// B+ tree index over buffer-pool pages.
///
/// A dedicated header page stores the root page id (`INVALID_PAGE_ID`
/// meaning the tree is empty). One tree-level reader-writer latch
/// serialises structural operations; individual page accesses additionally
/// go through the page latches inside the buffer pool. Every page is
/// reached through a pin guard, so pins are released on all exit paths.
pub struct BPlusTree<K> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    latch: RwLock<()>,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Initialise a tree whose header lives on `header_page_id` (an
    /// already-allocated page). The header is reset to the empty state.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf_max_size too small");
        assert!(internal_max_size >= 3, "internal_max_size too small");
        debug!(
            "new BPlusTree: header page {} leaf_max {} internal_max {}",
            header_page_id, leaf_max_size, internal_max_size
        );
        {
            let mut header = bpm.fetch_page_basic(header_page_id)?;
            codec::write_root_page_id(&mut header.write(), INVALID_PAGE_ID);
        }
        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    /// Initialise a tree with node sizes derived from the page capacity for
    /// the key type.
    pub fn with_default_sizes(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
    ) -> Result<Self, BTreeError> {
        let leaf_max = codec::leaf_capacity::<K>();
        let internal_max = codec::internal_capacity::<K>();
        Self::new(bpm, header_page_id, leaf_max, internal_max)
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    /// Current root page id, read off the header page.
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let header = self.bpm.fetch_page_basic(self.header_page_id)?;
        let guard = header.read();
        Ok(codec::read_root_page_id(&guard))
    }

    fn set_root_page_id(&self, root: PageId) -> Result<(), BTreeError> {
        let mut header = self.bpm.fetch_page_basic(self.header_page_id)?;
        codec::write_root_page_id(&mut header.write(), root);
        trace!("root page id set to {}", root);
        Ok(())
    }

    // -------------------------------------------------------------- search

    /// Collect every rid stored under `key` into `result`; reports whether
    /// anything was found.
    pub fn get_value(&self, key: &K, result: &mut Vec<Rid>) -> Result<bool, BTreeError> {
        let _tree = self.latch.read();
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(false);
        }
        let (guard, node) = self.find_leaf(root, key)?;
        drop(guard);

        match node.leaf_lookup(key) {
            Some(rid) => {
                result.push(rid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Walk from `root` down to the leaf that should contain `key`; the
    /// returned leaf stays pinned through its guard.
    fn find_leaf(&self, root: PageId, key: &K) -> Result<(BasicPageGuard, BTreeNode<K>), BTreeError> {
        let mut pid = root;
        loop {
            let guard = self.bpm.fetch_page_basic(pid)?;
            let node: BTreeNode<K> = codec::decode_node(&guard.read())?;
            if node.is_leaf() {
                return Ok((guard, node));
            }
            pid = node.lookup(key);
        }
    }

    /// Walk from `root` down the leftmost spine to the first leaf.
    fn find_leftmost_leaf(&self, root: PageId) -> Result<(BasicPageGuard, BTreeNode<K>), BTreeError> {
        let mut pid = root;
        loop {
            let guard = self.bpm.fetch_page_basic(pid)?;
            let node: BTreeNode<K> = codec::decode_node(&guard.read())?;
            if node.is_leaf() {
                return Ok((guard, node));
            }
            pid = node.child_at(0);
        }
    }

    // -------------------------------------------------------------- insert

    /// Insert a key/rid pair. Returns `false` when the key already exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let _tree = self.latch.write();
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(root, key, rid)
    }

    fn start_new_tree(&self, key: K, rid: Rid) -> Result<(), BTreeError> {
        let mut guard = self.bpm.new_page_guarded()?;
        let pid = guard.page_id();
        let mut node = BTreeNode::new_leaf(pid, INVALID_PAGE_ID, self.leaf_max_size);
        node.leaf_insert(key, rid);
        self.write_node(&mut guard, &node)?;
        drop(guard);
        self.set_root_page_id(pid)?;
        debug!("started new tree with root leaf {}", pid);
        Ok(())
    }

    fn insert_into_leaf(&self, root: PageId, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let (mut guard, mut node) = self.find_leaf(root, &key)?;
        let leaf_pid = guard.page_id();

        if !node.leaf_insert(key, rid) {
            return Ok(false);
        }
        if node.size() < self.leaf_max_size - 1 {
            self.write_node(&mut guard, &node)?;
            return Ok(true);
        }

        // Leaf is full: split and hand the separator to the parent.
        let mut new_guard = self.bpm.new_page_guarded()?;
        let new_pid = new_guard.page_id();
        let new_node = node.split_leaf(new_pid);
        let separator = new_node.first_key();
        self.write_node(&mut guard, &node)?;
        self.write_node(&mut new_guard, &new_node)?;
        trace!("leaf {} split, new right sibling {}", leaf_pid, new_pid);

        self.insert_into_parent(leaf_pid, node.parent_page_id, separator, new_pid)?;
        Ok(true)
    }

    /// After `old_pid` split off `new_pid`, thread the separator key into
    /// the tree above them. Both split halves are already serialized and
    /// still pinned by the caller; parent-pointer fixups happen by patching
    /// page bytes in place.
    fn insert_into_parent(
        &self,
        old_pid: PageId,
        parent_pid: PageId,
        key: K,
        new_pid: PageId,
    ) -> Result<(), BTreeError> {
        if parent_pid == INVALID_PAGE_ID {
            // The split node was the root: grow the tree by one level.
            let mut root_guard = self.bpm.new_page_guarded()?;
            let root_pid = root_guard.page_id();
            let mut root =
                BTreeNode::<K>::new_internal(root_pid, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(old_pid, key, new_pid);
            self.write_node(&mut root_guard, &root)?;
            drop(root_guard);
            self.update_parent(old_pid, root_pid)?;
            self.update_parent(new_pid, root_pid)?;
            self.set_root_page_id(root_pid)?;
            debug!("tree grew: new root {}", root_pid);
            return Ok(());
        }

        let mut parent_guard = self.bpm.fetch_page_basic(parent_pid)?;
        let mut parent: BTreeNode<K> = codec::decode_node(&parent_guard.read())?;
        parent.insert_node_after(old_pid, key, new_pid);

        if parent.size() <= self.internal_max_size {
            self.write_node(&mut parent_guard, &parent)?;
            return Ok(());
        }

        // Parent overflowed in turn.
        let mut new_parent_guard = self.bpm.new_page_guarded()?;
        let new_parent_pid = new_parent_guard.page_id();
        let new_parent = parent.split_internal(new_parent_pid);
        self.write_node(&mut parent_guard, &parent)?;
        self.write_node(&mut new_parent_guard, &new_parent)?;
        for &child in &new_parent.children {
            self.update_parent(child, new_parent_pid)?;
        }
        trace!(
            "internal {} split, new right sibling {}",
            parent_pid,
            new_parent_pid
        );

        let separator = new_parent.key_at(0);
        self.insert_into_parent(parent_pid, parent.parent_page_id, separator, new_parent_pid)
    }

    // -------------------------------------------------------------- remove

    /// Remove `key` if present. Absent keys are a silent no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let _tree = self.latch.write();
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(());
        }

        let (mut guard, mut node) = self.find_leaf(root, key)?;
        if !node.leaf_remove(key) {
            return Ok(());
        }

        if !node.is_root() && node.size() >= node.min_size() {
            self.write_node(&mut guard, &node)?;
            return Ok(());
        }

        let delete_self = self.coalesce_or_redistribute(&mut node)?;
        if delete_self {
            let pid = guard.page_id();
            guard.drop_guard();
            self.bpm.delete_page(pid);
        } else {
            self.write_node(&mut guard, &node)?;
        }
        Ok(())
    }

    /// Restore the minimum-fill invariant for an underflowing `node`.
    ///
    /// The caller keeps `node` pinned and writes it back afterwards; the
    /// return value tells the caller to instead free the node's page (the
    /// node was merged away, or it was a root that got collapsed).
    fn coalesce_or_redistribute(&self, node: &mut BTreeNode<K>) -> Result<bool, BTreeError> {
        if node.is_root() {
            if !node.is_leaf() && node.size() == 1 {
                // Shrink the tree by one level.
                let only_child = node.child_at(0);
                self.update_parent(only_child, INVALID_PAGE_ID)?;
                self.set_root_page_id(only_child)?;
                debug!("tree shrank: new root {}", only_child);
                return Ok(true);
            }
            if node.is_leaf() && node.size() == 0 {
                self.set_root_page_id(INVALID_PAGE_ID)?;
                debug!("tree is now empty");
                return Ok(true);
            }
            return Ok(false);
        }

        let parent_pid = node.parent_page_id;
        let mut parent_guard = self.bpm.fetch_page_basic(parent_pid)?;
        let mut parent: BTreeNode<K> = codec::decode_node(&parent_guard.read())?;
        let node_index = parent
            .value_index(node.page_id)
            .ok_or(BTreeError::ChildNotFound {
                parent: parent_pid,
                child: node.page_id,
            })?;

        // Prefer the left sibling, except for the leftmost child.
        let node_is_leftmost = node_index == 0;
        let sibling_index = if node_is_leftmost { 1 } else { node_index - 1 };
        let sibling_pid = parent.child_at(sibling_index);
        let mut sibling_guard = self.bpm.fetch_page_basic(sibling_pid)?;
        let mut sibling: BTreeNode<K> = codec::decode_node(&sibling_guard.read())?;

        if sibling.size() >= sibling.min_size() + 1 {
            self.redistribute(node, &mut sibling, &mut parent, node_index, node_is_leftmost)?;
            self.write_node(&mut sibling_guard, &sibling)?;
            self.write_node(&mut parent_guard, &parent)?;
            return Ok(false);
        }

        // Merge the right node of the pair into the left one.
        let node_deleted = if node_is_leftmost {
            if !sibling.is_leaf() {
                for &child in &sibling.children {
                    self.update_parent(child, node.page_id)?;
                }
            }
            if sibling.is_leaf() {
                sibling.leaf_merge_into(node);
            } else {
                sibling.internal_merge_into(node);
            }
            parent.remove_at(sibling_index);
            sibling_guard.drop_guard();
            self.bpm.delete_page(sibling_pid);
            trace!("merged page {} into {}", sibling_pid, node.page_id);
            false
        } else {
            if !node.is_leaf() {
                for &child in &node.children {
                    self.update_parent(child, sibling_pid)?;
                }
            }
            if node.is_leaf() {
                node.leaf_merge_into(&mut sibling);
            } else {
                node.internal_merge_into(&mut sibling);
            }
            parent.remove_at(node_index);
            self.write_node(&mut sibling_guard, &sibling)?;
            trace!("merged page {} into {}", node.page_id, sibling_pid);
            true
        };

        // The parent lost an entry and may underflow (or be a collapsible
        // root) in turn.
        if parent.is_root() || parent.size() < parent.min_size() {
            let delete_parent = self.coalesce_or_redistribute(&mut parent)?;
            if delete_parent {
                parent_guard.drop_guard();
                self.bpm.delete_page(parent_pid);
            } else {
                self.write_node(&mut parent_guard, &parent)?;
            }
        } else {
            self.write_node(&mut parent_guard, &parent)?;
        }
        Ok(node_deleted)
    }

    /// Borrow one entry from a sibling that can spare it, then refresh the
    /// separator in the parent with the right-hand node's new first key.
    fn redistribute(
        &self,
        node: &mut BTreeNode<K>,
        sibling: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        node_index: usize,
        node_is_leftmost: bool,
    ) -> Result<(), BTreeError> {
        if node_is_leftmost {
            // Right sibling lends its first entry.
            if sibling.is_leaf() {
                sibling.leaf_move_first_to(node);
            } else {
                let moved_child = sibling.child_at(0);
                sibling.internal_move_first_to(node);
                self.update_parent(moved_child, node.page_id)?;
            }
            parent.set_key_at(node_index + 1, sibling.key_at(0));
        } else {
            // Left sibling lends its last entry.
            if sibling.is_leaf() {
                sibling.leaf_move_last_to(node);
            } else {
                let moved_child = sibling.child_at(sibling.size() - 1);
                sibling.internal_move_last_to(node);
                self.update_parent(moved_child, node.page_id)?;
            }
            parent.set_key_at(node_index, node.key_at(0));
        }
        trace!(
            "redistributed one entry between pages {} and {}",
            sibling.page_id,
            node.page_id
        );
        Ok(())
    }

    // ------------------------------------------------------------ iterator

    /// Iterator over every entry in key order.
    pub fn iter(&self) -> Result<TreeIterator<K>, BTreeError> {
        let _tree = self.latch.read();
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(Arc::clone(&self.bpm)));
        }
        let (guard, node) = self.find_leftmost_leaf(root)?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), guard, node, 0))
    }

    /// Iterator starting at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>, BTreeError> {
        let _tree = self.latch.read();
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(Arc::clone(&self.bpm)));
        }
        let (guard, node) = self.find_leaf(root, key)?;
        let index = node.key_index(key);
        Ok(TreeIterator::new(Arc::clone(&self.bpm), guard, node, index))
    }

    // ------------------------------------------------------------- helpers

    /// Serialize `node` into its pinned page.
    fn write_node(&self, guard: &mut BasicPageGuard, node: &BTreeNode<K>) -> Result<(), BTreeError> {
        codec::encode_node(node, &mut guard.write())
    }

    /// Rewrite one page's parent pointer in place.
    fn update_parent(&self, child_pid: PageId, parent_pid: PageId) -> Result<(), BTreeError> {
        let mut guard = self.bpm.fetch_page_basic(child_pid)?;
        codec::write_parent_page_id(&mut guard.write(), parent_pid);
        Ok(())
    }
}
