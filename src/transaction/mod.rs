pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    AbortReason, IndexStore, IndexWriteRecord, IsolationLevel, Transaction, TransactionAbort,
    TransactionState, TableWriteRecord, TupleStore, WriteOp,
};
pub use transaction_manager::TransactionManager;
