use pagevault::{
    common::{EngineError, PageId, TransactionId},
    lock::{LockManager, LockMode},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const P0: PageId = PageId::new(1, 0);
const P1: PageId = PageId::new(1, 1);

#[test]
fn exclusive_is_mutually_exclusive() {
    let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
    let in_critical = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for i in 0..4u64 {
        let lm = lm.clone();
        let in_critical = in_critical.clone();
        handles.push(thread::spawn(move || {
            let tid = TransactionId(i + 1);
            lm.acquire(tid, P0, LockMode::Exclusive).unwrap();
            assert!(!in_critical.swap(true, Ordering::SeqCst));
            thread::sleep(Duration::from_millis(20));
            in_critical.store(false, Ordering::SeqCst);
            lm.release_all(tid);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn shared_holders_overlap() {
    let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..3u64 {
        let lm = lm.clone();
        let holders = holders.clone();
        let peak = peak.clone();
        handles.push(thread::spawn(move || {
            let tid = TransactionId(i + 1);
            lm.acquire(tid, P0, LockMode::Shared).unwrap();
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            holders.fetch_sub(1, Ordering::SeqCst);
            lm.release_all(tid);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) > 1);
}

#[test]
fn writer_waits_for_release() {
    let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
    let t1 = TransactionId(1);
    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();

    let lm2 = lm.clone();
    let waiter = thread::spawn(move || {
        let t2 = TransactionId(2);
        lm2.acquire(t2, P0, LockMode::Exclusive).unwrap();
        lm2.release_all(t2);
    });

    thread::sleep(Duration::from_millis(50));
    lm.release_all(t1);
    waiter.join().unwrap();
}

#[test]
fn upgrade_beats_queued_writer() {
    let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
    let t1 = TransactionId(1);
    lm.acquire(t1, P0, LockMode::Shared).unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let lm2 = lm.clone();
    let acquired2 = acquired.clone();
    let waiter = thread::spawn(move || {
        let t2 = TransactionId(2);
        lm2.acquire(t2, P0, LockMode::Exclusive).unwrap();
        acquired2.store(true, Ordering::SeqCst);
        lm2.release_all(t2);
    });

    // give the writer time to queue up behind us
    thread::sleep(Duration::from_millis(50));

    // the sole-holder upgrade is granted in place, ahead of the writer
    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();
    assert!(!acquired.load(Ordering::SeqCst));

    lm.release_all(t1);
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn lock_timeout_reports_aborted() {
    let lm = Arc::new(LockManager::new(Duration::from_millis(100)));
    let t1 = TransactionId(1);
    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();

    let t2 = TransactionId(2);
    match lm.acquire(t2, P0, LockMode::Exclusive) {
        Err(EngineError::Aborted(aborted)) => assert_eq!(aborted, t2),
        other => panic!("expected Aborted, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn aborted_transaction_can_retry_after_release() {
    let lm = Arc::new(LockManager::new(Duration::from_millis(100)));
    let t1 = TransactionId(1);
    let t2 = TransactionId(2);

    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();
    assert!(lm.acquire(t2, P0, LockMode::Exclusive).is_err());

    lm.release_all(t2); // caller rolls the whole transaction back
    lm.release_all(t1);
    lm.acquire(t2, P0, LockMode::Exclusive).unwrap();
    assert!(lm.holds(t2, P0));
}

#[test]
fn crossed_requests_break_by_timeout() {
    let lm = Arc::new(LockManager::new(Duration::from_millis(150)));
    let t1 = TransactionId(1);
    let t2 = TransactionId(2);
    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();
    lm.acquire(t2, P1, LockMode::Exclusive).unwrap();

    let lm1 = lm.clone();
    let h1 = thread::spawn(move || {
        let r = lm1.acquire(t1, P1, LockMode::Exclusive);
        if r.is_err() {
            lm1.release_all(t1);
        }
        r.is_err()
    });
    let lm2 = lm.clone();
    let h2 = thread::spawn(move || {
        let r = lm2.acquire(t2, P0, LockMode::Exclusive);
        if r.is_err() {
            lm2.release_all(t2);
        }
        r.is_err()
    });

    let aborted1 = h1.join().unwrap();
    let aborted2 = h2.join().unwrap();
    assert!(aborted1 || aborted2);
}

#[test]
fn release_all_covers_held_and_queued() {
    let lm = Arc::new(LockManager::new(Duration::from_secs(5)));
    let t1 = TransactionId(1);
    let t2 = TransactionId(2);
    lm.acquire(t1, P0, LockMode::Exclusive).unwrap();
    lm.acquire(t1, P1, LockMode::Shared).unwrap();

    let lm2 = lm.clone();
    let waiter = thread::spawn(move || {
        lm2.acquire(t2, P0, LockMode::Exclusive).unwrap();
        assert!(lm2.holds(t2, P0));
        lm2.release_all(t2);
    });

    thread::sleep(Duration::from_millis(50));
    lm.release_all(t1);
    assert!(!lm.holds(t1, P0));
    assert!(!lm.holds(t1, P1));
    waiter.join().unwrap();
}
