use thiserror::Error;

use crate::common::config::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found in buffer pool")]
    PageNotFound(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("All frames are pinned, no page can be evicted")]
    NoAvailableFrame,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
