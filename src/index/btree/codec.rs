use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{PageId, PAGE_SIZE};
use crate::common::rid::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, BTreePageType};
use crate::storage::page::Page;

// Common tree page header:
//   0..4   page_type: u32 (0 = leaf, 1 = internal)
//   4..8   size: i32
//   8..12  max_size: i32
//   12..16 parent_page_id: i32
//   16..20 page_id: i32
//   20..24 leaf: next_page_id / internal: reserved
// Leaf entries start at 28 as (key_bytes, rid page_id: i32, rid slot: u32);
// internal entries start at 24 as (key_bytes, child_page_id: i32), the
// slot-0 key bytes being present but ignored.
pub const PAGE_TYPE_OFFSET: usize = 0;
pub const SIZE_OFFSET: usize = 4;
pub const MAX_SIZE_OFFSET: usize = 8;
pub const PARENT_PAGE_ID_OFFSET: usize = 12;
pub const PAGE_ID_OFFSET: usize = 16;
pub const NEXT_PAGE_ID_OFFSET: usize = 24;
pub const LEAF_HEADER_SIZE: usize = 28;
pub const INTERNAL_HEADER_SIZE: usize = 24;

const LEAF_PAGE_TYPE: u32 = 0;
const INTERNAL_PAGE_TYPE: u32 = 1;

/// Encoded width of a record id: page id then slot number.
pub const RID_ENCODED_LEN: usize = 8;

/// How many entries a leaf page can physically hold for key type `K`.
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_LEN + RID_ENCODED_LEN)
}

/// How many entries an internal page can physically hold for key type `K`.
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_LEN + 4)
}

/// Serialize a node into its page, clearing stale bytes first.
pub fn encode_node<K: IndexKey>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError> {
    let entry_len = match node.page_type {
        BTreePageType::Leaf => K::ENCODED_LEN + RID_ENCODED_LEN,
        BTreePageType::Internal => K::ENCODED_LEN + 4,
    };
    let header_len = match node.page_type {
        BTreePageType::Leaf => LEAF_HEADER_SIZE,
        BTreePageType::Internal => INTERNAL_HEADER_SIZE,
    };
    if header_len + node.size() * entry_len > PAGE_SIZE {
        return Err(BTreeError::NodeOverflow(node.page_id));
    }

    page.data.fill(0);
    let type_tag = match node.page_type {
        BTreePageType::Leaf => LEAF_PAGE_TYPE,
        BTreePageType::Internal => INTERNAL_PAGE_TYPE,
    };
    LittleEndian::write_u32(&mut page.data[PAGE_TYPE_OFFSET..], type_tag);
    LittleEndian::write_i32(&mut page.data[SIZE_OFFSET..], node.size() as i32);
    LittleEndian::write_i32(&mut page.data[MAX_SIZE_OFFSET..], node.max_size as i32);
    LittleEndian::write_i32(&mut page.data[PARENT_PAGE_ID_OFFSET..], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[PAGE_ID_OFFSET..], node.page_id);

    let mut offset = header_len;
    match node.page_type {
        BTreePageType::Leaf => {
            LittleEndian::write_i32(&mut page.data[NEXT_PAGE_ID_OFFSET..], node.next_page_id);
            for (key, rid) in node.keys.iter().zip(node.rids.iter()) {
                key.encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
                offset += K::ENCODED_LEN;
                LittleEndian::write_i32(&mut page.data[offset..], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..], rid.slot_num);
                offset += RID_ENCODED_LEN;
            }
        }
        BTreePageType::Internal => {
            for (key, child) in node.keys.iter().zip(node.children.iter()) {
                key.encode(&mut page.data[offset..offset + K::ENCODED_LEN]);
                offset += K::ENCODED_LEN;
                LittleEndian::write_i32(&mut page.data[offset..], *child);
                offset += 4;
            }
        }
    }
    Ok(())
}

/// Deserialize a node from its page.
pub fn decode_node<K: IndexKey>(page: &Page) -> Result<BTreeNode<K>, BTreeError> {
    let type_tag = LittleEndian::read_u32(&page.data[PAGE_TYPE_OFFSET..]);
    let size = LittleEndian::read_i32(&page.data[SIZE_OFFSET..]) as usize;
    let max_size = LittleEndian::read_i32(&page.data[MAX_SIZE_OFFSET..]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[PARENT_PAGE_ID_OFFSET..]);
    let page_id = LittleEndian::read_i32(&page.data[PAGE_ID_OFFSET..]);

    match type_tag {
        LEAF_PAGE_TYPE => {
            let mut node = BTreeNode::new_leaf(page_id, parent_page_id, max_size);
            node.next_page_id = LittleEndian::read_i32(&page.data[NEXT_PAGE_ID_OFFSET..]);
            let mut offset = LEAF_HEADER_SIZE;
            node.keys.reserve(size);
            node.rids.reserve(size);
            for _ in 0..size {
                node.keys.push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                offset += K::ENCODED_LEN;
                let rid_page = LittleEndian::read_i32(&page.data[offset..]);
                let rid_slot = LittleEndian::read_u32(&page.data[offset + 4..]);
                node.rids.push(Rid::new(rid_page, rid_slot));
                offset += RID_ENCODED_LEN;
            }
            Ok(node)
        }
        INTERNAL_PAGE_TYPE => {
            let mut node = BTreeNode::new_internal(page_id, parent_page_id, max_size);
            let mut offset = INTERNAL_HEADER_SIZE;
            node.keys.reserve(size);
            node.children.reserve(size);
            for _ in 0..size {
                node.keys.push(K::decode(&page.data[offset..offset + K::ENCODED_LEN]));
                offset += K::ENCODED_LEN;
                node.children.push(LittleEndian::read_i32(&page.data[offset..]));
                offset += 4;
            }
            Ok(node)
        }
        other => Err(BTreeError::InvalidPageType {
            page_id: page.page_id,
            page_type: other,
        }),
    }
}

/// Patch just the parent pointer in a serialized node.
pub fn write_parent_page_id(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_i32(&mut page.data[PARENT_PAGE_ID_OFFSET..], parent_page_id);
}

/// Read the root page id off the tree's header page.
pub fn read_root_page_id(page: &Page) -> PageId {
    LittleEndian::read_i32(&page.data[0..4])
}

/// Store the root page id on the tree's header page.
pub fn write_root_page_id(page: &mut Page, root_page_id: PageId) {
    LittleEndian::write_i32(&mut page.data[0..4], root_page_id);
}
