use thiserror::Error;

use crate::common::config::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Page {page_id} has invalid tree page type {page_type}")]
    InvalidPageType { page_id: PageId, page_type: u32 },

    #[error("Node on page {0} does not fit in a page")]
    NodeOverflow(PageId),

    #[error("Page {child} not found among the children of page {parent}")]
    ChildNotFound { parent: PageId, child: PageId },

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
