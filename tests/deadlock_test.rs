use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stratumdb::common::Rid;
use stratumdb::transaction::{IsolationLevel, TransactionState};
use stratumdb::{LockManager, LockMode, TransactionManager};

#[test]
fn edge_list_round_trips_through_the_manager() {
    let lm = Arc::new(LockManager::new());

    lm.add_edge(3, 1);
    lm.add_edge(0, 2);
    lm.add_edge(0, 2);
    lm.add_edge(0, 1);
    assert_eq!(lm.get_edge_list(), vec![(0, 1), (0, 2), (3, 1)]);

    lm.remove_edge(0, 2);
    assert_eq!(lm.get_edge_list(), vec![(0, 1), (3, 1)]);
    assert_eq!(lm.has_cycle(), None);

    lm.add_edge(1, 3);
    assert_eq!(lm.has_cycle(), Some(3));
}

#[test]
fn two_transaction_row_deadlock_kills_the_youngest() {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(Arc::clone(&lm)));
    lm.start_deadlock_detection();

    let toid = 0;
    let rid0 = Rid::new(0, 0);
    let rid1 = Rid::new(1, 1);

    let a = tm.begin(IsolationLevel::RepeatableRead);
    let b = tm.begin(IsolationLevel::RepeatableRead);
    assert_eq!(a.id(), 0);
    assert_eq!(b.id(), 1);

    let lm0 = Arc::clone(&lm);
    let tm0 = Arc::clone(&tm);
    let a0 = Arc::clone(&a);
    let t0 = thread::spawn(move || {
        lm0.lock_table(&a0, LockMode::IntentionExclusive, toid).unwrap();
        lm0.lock_row(&a0, LockMode::Exclusive, toid, rid0).unwrap();
        thread::sleep(Duration::from_millis(100));

        // Blocks on B's lock; granted once B is chosen as the victim and
        // its locks are released.
        lm0.lock_row(&a0, LockMode::Exclusive, toid, rid1).unwrap();

        lm0.unlock_row(&a0, toid, rid1, false).unwrap();
        lm0.unlock_row(&a0, toid, rid0, false).unwrap();
        lm0.unlock_table(&a0, toid).unwrap();
        tm0.commit(&a0);
    });

    let lm1 = Arc::clone(&lm);
    let tm1 = Arc::clone(&tm);
    let b1 = Arc::clone(&b);
    let t1 = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        lm1.lock_table(&b1, LockMode::IntentionExclusive, toid).unwrap();
        lm1.lock_row(&b1, LockMode::Exclusive, toid, rid1).unwrap();
        thread::sleep(Duration::from_millis(100));

        // Completes the cycle; the detector aborts B (the younger txn).
        let result = lm1.lock_row(&b1, LockMode::Exclusive, toid, rid0);
        assert!(result.is_err());
        assert_eq!(b1.state(), TransactionState::Aborted);
        tm1.abort(&b1);
    });

    t0.join().unwrap();
    t1.join().unwrap();

    assert_eq!(a.state(), TransactionState::Committed);
    assert_eq!(b.state(), TransactionState::Aborted);
    lm.stop_deadlock_detection();
}

#[test]
fn three_way_cycle_breaks_within_detection_ticks() {
    let lm = Arc::new(LockManager::new());
    let tm = Arc::new(TransactionManager::new(Arc::clone(&lm)));
    lm.start_deadlock_detection();

    let toid = 0;
    let rids = [Rid::new(0, 0), Rid::new(1, 1), Rid::new(2, 2)];
    let txns: Vec<_> = (0..3).map(|_| tm.begin(IsolationLevel::RepeatableRead)).collect();

    let mut handles = Vec::new();
    for i in 0..3 {
        let lm = Arc::clone(&lm);
        let tm = Arc::clone(&tm);
        let txn = Arc::clone(&txns[i]);
        let mine = rids[i];
        let wanted = rids[(i + 1) % 3];
        handles.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(20 * i as u64));
            lm.lock_table(&txn, LockMode::IntentionExclusive, toid).unwrap();
            lm.lock_row(&txn, LockMode::Exclusive, toid, mine).unwrap();
            thread::sleep(Duration::from_millis(150));

            match lm.lock_row(&txn, LockMode::Exclusive, toid, wanted) {
                Ok(()) => {
                    lm.unlock_row(&txn, toid, wanted, false).unwrap();
                    lm.unlock_row(&txn, toid, mine, false).unwrap();
                    lm.unlock_table(&txn, toid).unwrap();
                    tm.commit(&txn);
                }
                Err(_) => {
                    assert_eq!(txn.state(), TransactionState::Aborted);
                    tm.abort(&txn);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let aborted: Vec<_> = txns
        .iter()
        .filter(|t| t.state() == TransactionState::Aborted)
        .collect();
    let committed: Vec<_> = txns
        .iter()
        .filter(|t| t.state() == TransactionState::Committed)
        .collect();
    assert_eq!(aborted.len() + committed.len(), 3);
    assert!(!aborted.is_empty(), "the cycle must be broken");
    assert!(!committed.is_empty(), "not everyone may die");
    lm.stop_deadlock_detection();
}
