use std::sync::Arc;

use crate::common::config::INVALID_PAGE_ID;
use crate::common::rid::Rid;
use crate::index::btree::codec;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::{BasicPageGuard, BufferPoolManager};

/// Forward iterator over the leaf chain, yielding entries in key order.
///
/// The current leaf stays pinned through its guard; advancing past the end
/// of a leaf releases it and pins the next one. The exhausted iterator is
/// the end sentinel and holds no page.
pub struct TreeIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    current: Option<(BasicPageGuard, BTreeNode<K>)>,
    index: usize,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: BasicPageGuard,
        node: BTreeNode<K>,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            current: Some((guard, node)),
            index,
        }
    }

    /// The end sentinel: already exhausted.
    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            current: None,
            index: 0,
        }
    }

    /// Whether the iterator has run off the last leaf.
    pub fn is_end(&self) -> bool {
        match &self.current {
            None => true,
            Some((_, node)) => self.index >= node.size() && node.next_page_id == INVALID_PAGE_ID,
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, node) = self.current.as_ref()?;
            if self.index < node.size() {
                let item = (node.keys[self.index], node.rids[self.index]);
                self.index += 1;
                return Some(item);
            }

            // This leaf is exhausted: unpin it and hop the chain.
            let next_pid = node.next_page_id;
            self.current = None;
            if next_pid == INVALID_PAGE_ID {
                return None;
            }
            let guard = self.bpm.fetch_page_basic(next_pid).ok()?;
            let node: BTreeNode<K> = codec::decode_node(&guard.read()).ok()?;
            self.current = Some((guard, node));
            self.index = 0;
        }
    }
}
