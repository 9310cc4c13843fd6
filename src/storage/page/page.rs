use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// In-memory image of an on-disk page.
///
/// The `RwLock` wrapped around it by `PagePtr` is the page latch: shared
/// acquisition for readers, exclusive for writers. Pin counts and dirty
/// flags live in the buffer pool's frame bookkeeping, not here.
#[derive(Clone)]
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Zero the payload and drop the page identity.
    pub fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data.fill(0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(INVALID_PAGE_ID)
    }
}

/// Shared handle to a latched page.
pub type PagePtr = Arc<RwLock<Page>>;
