// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager, LruKReplacer};
pub use transaction::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionManager, TransactionState,
};
