use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::config::PageId;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::page::{Page, PagePtr};

/// Scoped pin on a buffer-pool page.
///
/// Dropping the guard unpins the page with whatever dirty flag was observed
/// through it. A guard that has been moved out of (or explicitly dropped)
/// holds nothing and its drop is a no-op.
pub struct BasicPageGuard {
    bpm: Option<Arc<BufferPoolManager>>,
    page: Option<PagePtr>,
    page_id: PageId,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            bpm: Some(bpm),
            page: Some(page),
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Briefly latch the page for reading.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Page> {
        self.page.as_ref().expect("guard is empty").read()
    }

    /// Briefly latch the page for writing; the guard remembers the page is
    /// now dirty.
    pub fn write(&mut self) -> parking_lot::RwLockWriteGuard<'_, Page> {
        self.is_dirty = true;
        self.page.as_ref().expect("guard is empty").write()
    }

    /// Unpin now instead of waiting for scope exit.
    pub fn drop_guard(&mut self) {
        if let (Some(bpm), Some(_page)) = (self.bpm.take(), self.page.take()) {
            bpm.unpin_page(self.page_id, self.is_dirty);
            self.is_dirty = false;
        }
    }

    /// Trade the plain pin for a pinned shared latch.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let bpm = self.bpm.take().expect("guard is empty");
        let page = self.page.take().expect("guard is empty");
        ReadPageGuard::new_with_dirty(bpm, page, self.page_id, self.is_dirty)
    }

    /// Trade the plain pin for a pinned exclusive latch.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let bpm = self.bpm.take().expect("guard is empty");
        let page = self.page.take().expect("guard is empty");
        WritePageGuard::new_with_dirty(bpm, page, self.page_id, self.is_dirty)
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Pin plus shared page latch, both released on drop (latch first).
pub struct ReadPageGuard {
    bpm: Option<Arc<BufferPoolManager>>,
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
    page_id: PageId,
    is_dirty: bool,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self::new_with_dirty(bpm, page, page_id, false)
    }

    fn new_with_dirty(
        bpm: Arc<BufferPoolManager>,
        page: PagePtr,
        page_id: PageId,
        is_dirty: bool,
    ) -> Self {
        let latch = RwLock::read_arc(&page);
        Self {
            bpm: Some(bpm),
            latch: Some(latch),
            page_id,
            is_dirty,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &Page {
        self.latch.as_ref().expect("guard is empty")
    }

    /// Unlatch and unpin now instead of waiting for scope exit.
    pub fn drop_guard(&mut self) {
        if let Some(latch) = self.latch.take() {
            drop(latch);
        }
        if let Some(bpm) = self.bpm.take() {
            bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Pin plus exclusive page latch, both released on drop (latch first).
///
/// The page is unpinned dirty whenever it was written through the guard.
pub struct WritePageGuard {
    bpm: Option<Arc<BufferPoolManager>>,
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    page_id: PageId,
    is_dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self::new_with_dirty(bpm, page, page_id, false)
    }

    fn new_with_dirty(
        bpm: Arc<BufferPoolManager>,
        page: PagePtr,
        page_id: PageId,
        is_dirty: bool,
    ) -> Self {
        let latch = RwLock::write_arc(&page);
        Self {
            bpm: Some(bpm),
            latch: Some(latch),
            page_id,
            is_dirty,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &Page {
        self.latch.as_ref().expect("guard is empty")
    }

    pub fn data_mut(&mut self) -> &mut Page {
        self.is_dirty = true;
        self.latch.as_mut().expect("guard is empty")
    }

    /// Unlatch and unpin now instead of waiting for scope exit.
    pub fn drop_guard(&mut self) {
        if let Some(latch) = self.latch.take() {
            drop(latch);
        }
        if let Some(bpm) = self.bpm.take() {
            bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.drop_guard();
    }
}
