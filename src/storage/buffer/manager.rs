use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::PagePtr;

/// Per-frame bookkeeping, protected by the pool mutex.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    metas: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// Buffer pool manager: caches disk pages in a fixed set of frames.
///
/// All bookkeeping (page table, free list, pin counts, dirty flags) sits
/// behind one pool mutex, held for the whole of every operation. After any
/// call returns, a frame is evictable exactly when its pin count is zero.
/// Page bytes are reached through `PagePtr`, whose `RwLock` doubles as the
/// page latch and is never required while the pool mutex is wanted.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    replacer: LruKReplacer,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        debug!(
            "new BufferPoolManager: pool_size {} replacer_k {}",
            pool_size, replacer_k
        );
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(PagePtr::default());
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            replacer: LruKReplacer::new(pool_size, replacer_k),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                metas,
                next_page_id: 0,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id and pin it into a frame.
    ///
    /// Fails with `NoAvailableFrame` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = state.next_page_id;
        state.next_page_id += 1;

        {
            let mut page = self.frames[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }
        state.metas[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        trace!("new_page: page {} placed in frame {}", page_id, frame_id);
        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident, and pin it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            trace!("fetch_page: page {} hit in frame {}", page_id, frame_id);
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;
        {
            let mut page = self.frames[frame_id].write();
            page.page_id = page_id;
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }
        state.metas[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        trace!("fetch_page: page {} loaded into frame {}", page_id, frame_id);
        Ok(self.frames[frame_id].clone())
    }

    /// Drop one pin on a page, folding in the caller's dirty flag.
    ///
    /// Returns `false` when the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        trace!(
            "unpin_page: page {} now has pin count {}",
            page_id,
            state.metas[frame_id].pin_count
        );
        true
    }

    /// Write a resident page back to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };
        {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        state.metas[frame_id].is_dirty = false;
        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        for (page_id, frame_id) in resident {
            {
                let page = self.frames[frame_id].read();
                self.disk_manager.write_page(page_id, &page.data)?;
            }
            state.metas[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool and return its frame to the free list.
    ///
    /// Returns `true` when the page is absent (nothing to do) or was
    /// removed; `false` when it is still pinned. Unflushed changes are
    /// discarded.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        if state.metas[frame_id].pin_count != 0 {
            return false;
        }

        self.frames[frame_id].write().reset();
        state.metas[frame_id] = FrameMeta {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        };
        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        debug!("delete_page: page {} removed from frame {}", page_id, frame_id);
        true
    }

    /// Fetch a page wrapped in a pin-releasing guard.
    pub fn fetch_page_basic(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<BasicPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Fetch a page, take its shared latch, and wrap both in a guard.
    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<ReadPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Fetch a page, take its exclusive latch, and wrap both in a guard.
    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<WritePageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Allocate a fresh page wrapped in a pin-releasing guard.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<BasicPageGuard, BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok(BasicPageGuard::new(Arc::clone(self), page, page_id))
    }

    /// Pick a frame for reuse: free list first, then eviction. A dirty
    /// victim is written back before the frame is handed out.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(BufferPoolError::NoAvailableFrame);
        };
        let old_page_id = state.metas[frame_id].page_id;
        debug_assert_eq!(state.metas[frame_id].pin_count, 0);
        if state.metas[frame_id].is_dirty {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(old_page_id, &page.data)?;
        }
        state.page_table.remove(&old_page_id);
        self.frames[frame_id].write().reset();
        state.metas[frame_id] = FrameMeta {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        };
        debug!("acquire_frame: evicted page {} from frame {}", old_page_id, frame_id);
        Ok(frame_id)
    }

    #[cfg(test)]
    pub(crate) fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.metas[frame_id].pin_count)
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.metas[frame_id].is_dirty)
    }
}
