use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::config::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState, WriteOp};

/// Creates and tracks transactions, and drives commit/abort.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new transaction in the growing phase.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions
            .lock()
            .insert(txn_id, Arc::clone(&txn));
        debug!("txn {} begun at {:?}", txn_id, isolation_level);
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release every lock, then mark committed.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());
    }

    /// Abort: revive the write sets, release every lock, mark aborted.
    ///
    /// Index writes are undone newest-first, replaying the inverse
    /// operation; table writes are neutralised by flagging the tuples
    /// deleted through their table's hook.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        let mut index_writes = txn.take_index_write_set();
        while let Some(record) = index_writes.pop() {
            match record.op {
                WriteOp::Insert => record.index.delete_entry(&record.tuple, record.rid),
                WriteOp::Delete => record.index.insert_entry(&record.tuple, record.rid),
                WriteOp::Update => {
                    record.index.delete_entry(&record.tuple, record.rid);
                    if let Some(old_tuple) = &record.old_tuple {
                        record.index.insert_entry(old_tuple, record.rid);
                    }
                }
            }
        }

        let mut table_writes = txn.take_table_write_set();
        while let Some(record) = table_writes.pop() {
            record.table.set_tuple_deleted(record.rid, true);
        }

        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());
    }
}
