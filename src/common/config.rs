use std::time::Duration;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Stored as a 32-bit signed integer on disk.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Table object ID type
pub type TableOid = u32;

/// How often the background deadlock detector wakes up.
pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
