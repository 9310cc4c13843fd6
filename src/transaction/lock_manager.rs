use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::config::{TableOid, TxnId, DEADLOCK_DETECTION_INTERVAL};
use crate::common::rid::Rid;
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};

/// The five multi-granularity lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Compatibility matrix, `self` held and `other` requested:
    ///
    /// ```text
    ///       IS   IX   S    SIX  X
    /// IS    y    y    y    y    n
    /// IX    y    y    n    n    n
    /// S     y    n    y    n    n
    /// SIX   y    n    n    n    n
    /// X     n    n    n    n    n
    /// ```
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => other != Exclusive,
            IntentionExclusive => matches!(other, IntentionShared | IntentionExclusive),
            Shared => matches!(other, IntentionShared | Shared),
            SharedIntentionExclusive => other == IntentionShared,
            Exclusive => false,
        }
    }

    /// Upgrade partial order. Same-mode "upgrades" are allowed (and treated
    /// as no-ops by the lock manager).
    pub fn can_upgrade_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        if self == requested {
            return true;
        }
        match self {
            IntentionShared => true,
            Shared | IntentionExclusive => {
                matches!(requested, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }
}

/// What a lock request is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Resource {
    Table(TableOid),
    Row(TableOid, Rid),
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    /// FIFO request list: granted requests first, then waiters in arrival
    /// order. Upgrades re-enter at the granted/waiting boundary.
    requests: Vec<LockRequest>,
    /// The one transaction allowed to be mid-upgrade on this queue.
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// Directed txn -> txn graph of who waits on whom. Adjacency lists are kept
/// sorted and duplicate-free so detection is deterministic.
#[derive(Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    pub fn add_edge(&mut self, t1: TxnId, t2: TxnId) {
        let targets = self.edges.entry(t1).or_default();
        if let Err(pos) = targets.binary_search(&t2) {
            targets.insert(pos, t2);
        }
    }

    pub fn remove_edge(&mut self, t1: TxnId, t2: TxnId) {
        if let Some(targets) = self.edges.get_mut(&t1) {
            if let Ok(pos) = targets.binary_search(&t2) {
                targets.remove(pos);
            }
            if targets.is_empty() {
                self.edges.remove(&t1);
            }
        }
    }

    /// All edges, sorted by source then target.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&t1, targets)| targets.iter().map(move |&t2| (t1, t2)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Drop every edge touching `txn_id`.
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        self.edges.retain(|_, targets| {
            if let Ok(pos) = targets.binary_search(&txn_id) {
                targets.remove(pos);
            }
            !targets.is_empty()
        });
    }

    /// Deterministic cycle search: DFS from each vertex in ascending id
    /// order, neighbours visited in ascending order. Returns the youngest
    /// (largest id) transaction on the first cycle found.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        for &start in self.edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            if let Some(victim) = self.dfs(start, &mut visited, &mut path, &mut on_path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if on_path.contains(&next) {
                    let start = path.iter().position(|&t| t == next).unwrap();
                    return path[start..].iter().copied().max();
                }
                if !visited.contains(&next) {
                    if let Some(victim) = self.dfs(next, visited, path, on_path) {
                        return Some(victim);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}

/// Multi-granularity lock manager with FIFO request queues and background
/// waits-for deadlock detection.
///
/// Latches are always taken map latch -> queue latch, and the map latch is
/// released before any wait. The detector takes waits-for latch -> table
/// map latch -> row map latch.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    detector_running: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::default()),
            detector_running: AtomicBool::new(false),
            detector: Mutex::new(None),
        }
    }

    // --------------------------------------------------------- acquisition

    /// Take a table lock, blocking until it can be granted.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionAbort> {
        trace!("txn {} requests {:?} on table {}", txn.id(), mode, oid);
        self.check_isolation(txn, mode)?;
        let queue = {
            let mut map = self.table_lock_map.lock();
            Arc::clone(map.entry(oid).or_default())
        };
        self.acquire(txn, &queue, mode, Resource::Table(oid))
    }

    /// Take a row lock, blocking until it can be granted. Row locks are S
    /// or X only and require a covering table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbort> {
        trace!("txn {} requests {:?} on row {}/{}", txn.id(), mode, oid, rid);
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow);
        }
        self.check_isolation(txn, mode)?;

        let table_lock_ok = match mode {
            LockMode::Exclusive => {
                txn.holds_table_lock(LockMode::Exclusive, oid)
                    || txn.holds_table_lock(LockMode::IntentionExclusive, oid)
                    || txn.holds_table_lock(LockMode::SharedIntentionExclusive, oid)
            }
            _ => {
                txn.holds_table_lock(LockMode::IntentionShared, oid)
                    || txn.holds_table_lock(LockMode::Shared, oid)
                    || txn.holds_table_lock(LockMode::IntentionExclusive, oid)
                    || txn.holds_table_lock(LockMode::SharedIntentionExclusive, oid)
                    || txn.holds_table_lock(LockMode::Exclusive, oid)
            }
        };
        if !table_lock_ok {
            return self.abort_txn(txn, AbortReason::TableLockNotPresent);
        }

        let queue = {
            let mut map = self.row_lock_map.lock();
            Arc::clone(map.entry(rid).or_default())
        };
        self.acquire(txn, &queue, mode, Resource::Row(oid, rid))
    }

    /// Queue discipline shared by table and row locks: append (or re-enter
    /// as an upgrade at the granted/waiting boundary), then wait until the
    /// FIFO grant predicate holds.
    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        resource: Resource,
    ) -> Result<(), TransactionAbort> {
        let txn_id = txn.id();
        let mut state = queue.state.lock();

        if let Some(pos) = state.requests.iter().position(|r| r.txn.id() == txn_id) {
            // Already holds a lock here: this is an upgrade.
            let held_mode = state.requests[pos].mode;
            if held_mode == mode {
                return Ok(());
            }
            if state.upgrading.is_some() {
                drop(state);
                return self.abort_txn(txn, AbortReason::UpgradeConflict);
            }
            if !held_mode.can_upgrade_to(mode) {
                drop(state);
                return self.abort_txn(txn, AbortReason::IncompatibleUpgrade);
            }

            state.requests.remove(pos);
            self.remove_lock_record(txn, held_mode, resource);
            let boundary = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                boundary,
                LockRequest {
                    txn: Arc::clone(txn),
                    mode,
                    granted: false,
                },
            );
            state.upgrading = Some(txn_id);

            self.wait_for_grant(txn, queue, &mut state, mode)?;

            state.upgrading = None;
            if let Some(req) = state.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
                req.granted = true;
            }
            self.insert_lock_record(txn, mode, resource);
            drop(state);
            queue.cv.notify_all();
            trace!("txn {} upgraded to {:?} on {:?}", txn_id, mode, resource);
            return Ok(());
        }

        state.requests.push(LockRequest {
            txn: Arc::clone(txn),
            mode,
            granted: false,
        });

        self.wait_for_grant(txn, queue, &mut state, mode)?;

        if let Some(req) = state.requests.iter_mut().find(|r| r.txn.id() == txn_id) {
            req.granted = true;
        }
        self.insert_lock_record(txn, mode, resource);
        drop(state);
        queue.cv.notify_all();
        trace!("txn {} granted {:?} on {:?}", txn_id, mode, resource);
        Ok(())
    }

    /// Block on the queue's condition variable until the grant predicate
    /// holds. Wakes re-check the abort flag first: a transaction killed by
    /// the deadlock detector withdraws its request and fails fast.
    fn wait_for_grant(
        &self,
        txn: &Transaction,
        queue: &LockRequestQueue,
        state: &mut MutexGuard<'_, QueueState>,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        let txn_id = txn.id();
        loop {
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn.id() != txn_id);
                if state.upgrading == Some(txn_id) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Err(TransactionAbort {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }
            if Self::can_grant(state, txn_id, mode) {
                return Ok(());
            }
            queue.cv.wait(state);
        }
    }

    /// FIFO-strict grant check: walk the queue in order; any earlier
    /// incompatible granted request or any earlier waiter blocks the grant.
    fn can_grant(state: &QueueState, txn_id: TxnId, mode: LockMode) -> bool {
        for req in &state.requests {
            if req.txn.id() == txn_id {
                return true;
            }
            if !req.granted {
                return false;
            }
            if !req.mode.compatible_with(mode) {
                return false;
            }
        }
        false
    }

    // ------------------------------------------------------------- release

    /// Release a held table lock, possibly moving the transaction into its
    /// shrinking phase.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<(), TransactionAbort> {
        self.unlock_table_impl(txn, oid, false)
    }

    fn unlock_table_impl(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        skip_transition: bool,
    ) -> Result<(), TransactionAbort> {
        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&oid).cloned()
        };
        let Some(queue) = queue else {
            return self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld);
        };
        if txn.holds_any_row_lock_on(oid) {
            return self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows);
        }

        let mode = {
            let mut state = queue.state.lock();
            let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn.id() == txn.id() && r.granted)
            else {
                drop(state);
                return self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld);
            };
            let mode = state.requests[pos].mode;
            state.requests.remove(pos);
            mode
        };

        self.remove_lock_record(txn, mode, Resource::Table(oid));
        if !skip_transition {
            self.maybe_begin_shrinking(txn, mode);
        }
        queue.cv.notify_all();
        trace!("txn {} released {:?} on table {}", txn.id(), mode, oid);
        Ok(())
    }

    /// Release a held row lock. `force` suppresses the phase transition
    /// (used while cleaning up deleted tuples during an abort scan).
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<(), TransactionAbort> {
        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&rid).cloned()
        };
        let Some(queue) = queue else {
            return self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld);
        };

        let mode = {
            let mut state = queue.state.lock();
            let Some(pos) = state
                .requests
                .iter()
                .position(|r| r.txn.id() == txn.id() && r.granted)
            else {
                drop(state);
                return self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld);
            };
            let mode = state.requests[pos].mode;
            state.requests.remove(pos);
            mode
        };

        self.remove_lock_record(txn, mode, Resource::Row(oid, rid));
        if !force {
            self.maybe_begin_shrinking(txn, mode);
        }
        queue.cv.notify_all();
        trace!("txn {} released {:?} on row {}/{}", txn.id(), mode, oid, rid);
        Ok(())
    }

    /// Release everything a transaction still holds. Used by commit and
    /// abort, so no phase transitions happen here.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let (rows, tables) = {
            let sets = txn.lock_sets.lock();
            let mut rows: Vec<(TableOid, Rid)> = Vec::new();
            for (oid, rids) in sets.shared_rows.iter().chain(sets.exclusive_rows.iter()) {
                rows.extend(rids.iter().map(|&rid| (*oid, rid)));
            }
            let mut tables: Vec<TableOid> = Vec::new();
            for set in [
                &sets.shared_tables,
                &sets.exclusive_tables,
                &sets.intention_shared_tables,
                &sets.intention_exclusive_tables,
                &sets.shared_intention_exclusive_tables,
            ] {
                tables.extend(set.iter().copied());
            }
            (rows, tables)
        };
        for (oid, rid) in rows {
            let _ = self.unlock_row(txn, oid, rid, true);
        }
        for oid in tables {
            let _ = self.unlock_table_impl(txn, oid, true);
        }
        debug!("txn {} released all locks", txn.id());
    }

    // --------------------------------------------------- isolation and 2PL

    /// Reject lock requests the transaction's isolation level and phase do
    /// not allow.
    fn check_isolation(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionAbort> {
        use LockMode::*;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return self.abort_txn(txn, AbortReason::LockOnShrinking);
                }
            }
            IsolationLevel::ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && !matches!(mode, IntentionShared | Shared)
                {
                    return self.abort_txn(txn, AbortReason::LockOnShrinking);
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted);
                }
                if txn.state() == TransactionState::Shrinking {
                    return self.abort_txn(txn, AbortReason::LockOnShrinking);
                }
            }
        }
        Ok(())
    }

    /// Releasing certain locks ends the growing phase, depending on the
    /// isolation level.
    fn maybe_begin_shrinking(&self, txn: &Transaction, released: LockMode) {
        let transitions = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                released == LockMode::Exclusive
            }
        };
        if transitions
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort_txn(&self, txn: &Arc<Transaction>, reason: AbortReason) -> Result<(), TransactionAbort> {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {:?}", txn.id(), reason);
        Err(TransactionAbort {
            txn_id: txn.id(),
            reason,
        })
    }

    fn insert_lock_record(&self, txn: &Transaction, mode: LockMode, resource: Resource) {
        let mut sets = txn.lock_sets.lock();
        match resource {
            Resource::Table(oid) => {
                sets.table_set_mut(mode).insert(oid);
            }
            Resource::Row(oid, rid) => {
                sets.row_map_mut(mode).entry(oid).or_default().insert(rid);
            }
        }
    }

    fn remove_lock_record(&self, txn: &Transaction, mode: LockMode, resource: Resource) {
        let mut sets = txn.lock_sets.lock();
        match resource {
            Resource::Table(oid) => {
                sets.table_set_mut(mode).remove(&oid);
            }
            Resource::Row(oid, rid) => {
                if let Some(rids) = sets.row_map_mut(mode).get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
        }
    }

    // ------------------------------------------------- deadlock detection

    /// Spawn the background detector. Idempotent.
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        if self.detector_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = std::thread::spawn(move || loop {
            std::thread::sleep(DEADLOCK_DETECTION_INTERVAL);
            let Some(this) = weak.upgrade() else { break };
            if !this.detector_running.load(Ordering::SeqCst) {
                break;
            }
            this.run_cycle_detection();
        });
        *self.detector.lock() = Some(handle);
    }

    /// Stop and join the background detector.
    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detector tick: rebuild the waits-for graph from every queue,
    /// then abort the youngest transaction of each cycle until none remain.
    pub fn run_cycle_detection(&self) {
        let mut graph = self.waits_for.lock();
        graph.clear();
        let mut waiting_on: HashMap<TxnId, Arc<LockRequestQueue>> = HashMap::new();
        let mut handles: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        {
            let table_map = self.table_lock_map.lock();
            let row_map = self.row_lock_map.lock();
            for queue in table_map.values().chain(row_map.values()) {
                let state = queue.state.lock();
                for waiter in state.requests.iter().filter(|r| !r.granted) {
                    handles.insert(waiter.txn.id(), Arc::clone(&waiter.txn));
                    waiting_on.insert(waiter.txn.id(), Arc::clone(queue));
                    for holder in state.requests.iter().filter(|r| r.granted) {
                        if holder.txn.id() != waiter.txn.id() {
                            graph.add_edge(waiter.txn.id(), holder.txn.id());
                        }
                    }
                }
            }
        }

        while let Some(victim) = graph.find_cycle_victim() {
            debug!("deadlock detected, aborting youngest txn {}", victim);
            if let Some(txn) = handles.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove_txn(victim);
            if let Some(queue) = waiting_on.get(&victim) {
                queue.cv.notify_all();
            }
        }
    }

    // Direct graph access, mostly exercised by tests.

    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        self.waits_for.lock().add_edge(t1, t2);
    }

    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        self.waits_for.lock().remove_edge(t1, t2);
    }

    pub fn get_edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edge_list()
    }

    pub fn has_cycle(&self) -> Option<TxnId> {
        self.waits_for.lock().find_cycle_victim()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}
