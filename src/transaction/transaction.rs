use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::config::{TableOid, TxnId};
use crate::common::rid::Rid;
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    UpgradeConflict,
    IncompatibleUpgrade,
    Deadlock,
}

/// Error surfaced by lock operations after they have marked the
/// transaction aborted. The caller is expected to run the transaction
/// manager's abort to undo the write sets and release locks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
    Update,
}

/// Table mutation hook, implemented by the table heap owner. Abort flips
/// tuples back to deleted through it.
pub trait TupleStore: Send + Sync {
    fn set_tuple_deleted(&self, rid: Rid, deleted: bool);
}

/// Index mutation hook, implemented by the index owner. Abort replays the
/// inverse operation through it.
pub trait IndexStore: Send + Sync {
    fn insert_entry(&self, tuple: &[u8], rid: Rid);
    fn delete_entry(&self, tuple: &[u8], rid: Rid);
}

/// One table mutation performed by a transaction.
pub struct TableWriteRecord {
    pub oid: TableOid,
    pub rid: Rid,
    pub table: Arc<dyn TupleStore>,
}

/// One index mutation performed by a transaction.
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub oid: TableOid,
    pub op: WriteOp,
    pub tuple: Vec<u8>,
    pub old_tuple: Option<Vec<u8>>,
    pub index: Arc<dyn IndexStore>,
}

/// Locks held by a transaction, grouped the way the lock manager needs
/// them: one set per table mode, one rid map per row mode.
#[derive(Default)]
pub(crate) struct LockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    pub fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    pub fn row_map_mut(&mut self, mode: LockMode) -> &mut HashMap<TableOid, HashSet<Rid>> {
        match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("row locks are only S or X"),
        }
    }
}

/// An active database transaction: identity, 2PL phase, and everything it
/// currently holds or has written.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    pub(crate) lock_sets: Mutex<LockSets>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Whether this transaction holds a table lock of exactly `mode`.
    pub fn holds_table_lock(&self, mode: LockMode, oid: TableOid) -> bool {
        let mut sets = self.lock_sets.lock();
        sets.table_set_mut(mode).contains(&oid)
    }

    /// Whether this transaction holds a row lock of exactly `mode`.
    pub fn holds_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) -> bool {
        let mut sets = self.lock_sets.lock();
        sets.row_map_mut(mode)
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
    }

    /// Whether this transaction still holds any row lock on `oid`.
    pub fn holds_any_row_lock_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&oid).is_some_and(|r| !r.is_empty())
            || sets.exclusive_rows.get(&oid).is_some_and(|r| !r.is_empty())
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub fn take_table_write_set(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut self.table_write_set.lock())
    }

    pub fn take_index_write_set(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut self.index_write_set.lock())
    }
}
