pub mod config;
pub mod rid;

pub use config::{
    FrameId, PageId, TableOid, TxnId, DEADLOCK_DETECTION_INTERVAL, INVALID_PAGE_ID, PAGE_SIZE,
};
pub use rid::Rid;
