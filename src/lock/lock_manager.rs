use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::common::{EngineError, PageId, Permissions, Result, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether a lock held in `self` already satisfies a request for
    /// `requested`.
    fn covers(self, requested: LockMode) -> bool {
        self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Lock state for one page. Entries are created on first request and kept
/// around afterwards; a released entry just reverts to no holders.
struct LockEntry {
    holders: Vec<TransactionId>,
    queue: VecDeque<TransactionId>,
    mode: LockMode,
    cond: Arc<Condvar>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            holders: Vec::new(),
            queue: VecDeque::new(),
            mode: LockMode::Shared,
            cond: Arc::new(Condvar::new()),
        }
    }

    fn drop_txn(&mut self, tid: TransactionId) {
        self.holders.retain(|t| *t != tid);
        self.queue.retain(|t| *t != tid);
        if self.holders.is_empty() {
            self.mode = LockMode::Shared;
        }
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct TxnEntry {
    held: HashSet<PageId>,
    waiting: HashSet<PageId>,
    /// Fixed the first time this transaction has to wait for any lock.
    /// Expiry while still waiting is treated as a deadlock.
    deadline: Option<Instant>,
}

#[derive(Default)]
struct LockState {
    locks: HashMap<PageId, LockEntry>,
    txns: HashMap<TransactionId, TxnEntry>,
}

/// Per-page shared/exclusive locks with FIFO queueing, in-place upgrades,
/// and timeout-based deadlock breaking. One mutex guards all entries;
/// waiters sleep on the page's condvar until a release wakes them or
/// their deadline passes.
pub struct LockManager {
    state: Mutex<LockState>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            timeout,
        }
    }

    /// Blocks until the lock is granted or the transaction's deadline
    /// passes, in which case the request fails with `Aborted` and the
    /// caller must roll the whole transaction back. The timeout
    /// deliberately over-approximates deadlock: a merely slow competitor
    /// can get us aborted too.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if Self::try_acquire(&mut state, tid, pid, mode) {
                trace!("{} acquired {:?} on page {}", tid, mode, pid);
                return Ok(());
            }

            let deadline = {
                let txn = state.txns.entry(tid).or_default();
                txn.waiting.insert(pid);
                *txn
                    .deadline
                    .get_or_insert_with(|| Instant::now() + self.timeout)
            };
            let cond = match state.locks.get(&pid) {
                Some(entry) => entry.cond.clone(),
                None => continue,
            };

            let timed_out = cond.wait_until(&mut state, deadline).timed_out();
            if timed_out {
                // a release may have raced the deadline
                if Self::try_acquire(&mut state, tid, pid, mode) {
                    trace!("{} acquired {:?} on page {} at deadline", tid, mode, pid);
                    return Ok(());
                }
                if let Some(entry) = state.locks.get_mut(&pid) {
                    entry.queue.retain(|t| *t != tid);
                    // whoever is behind us in line may be grantable now
                    entry.cond.notify_all();
                }
                if let Some(txn) = state.txns.get_mut(&tid) {
                    txn.waiting.remove(&pid);
                }
                debug!("{} presumed deadlocked waiting for page {}", tid, pid);
                return Err(EngineError::Aborted(tid));
            }
        }
    }

    /// Grant rules, run under the state mutex:
    /// - a holder whose mode covers the request succeeds immediately;
    /// - a sole shared holder wanting exclusive upgrades in place;
    /// - a shared holder wanting exclusive alongside other holders waits
    ///   at the head of the queue, ahead of ordinary waiters;
    /// - otherwise the lock is granted when compatible with the current
    ///   holders and the requester is first in line, else it queues at
    ///   the tail.
    fn try_acquire(state: &mut LockState, tid: TransactionId, pid: PageId, mode: LockMode) -> bool {
        let LockState { locks, txns } = state;
        let entry = locks.entry(pid).or_insert_with(LockEntry::new);

        let granted = if entry.holders.contains(&tid) {
            if entry.mode.covers(mode) {
                true
            } else if entry.holders.len() == 1 {
                entry.mode = LockMode::Exclusive;
                entry.queue.retain(|t| *t != tid);
                true
            } else {
                if !entry.queue.contains(&tid) {
                    entry.queue.push_front(tid);
                }
                false
            }
        } else {
            let compatible = entry.holders.is_empty()
                || (entry.mode == LockMode::Shared && mode == LockMode::Shared);
            let first_in_line = entry.queue.front().map_or(true, |t| *t == tid);
            if compatible && first_in_line {
                if entry.holders.is_empty() {
                    entry.mode = mode;
                }
                entry.holders.push(tid);
                entry.queue.retain(|t| *t != tid);
                true
            } else {
                if !entry.queue.contains(&tid) {
                    entry.queue.push_back(tid);
                }
                false
            }
        };

        if granted {
            if !entry.queue.is_empty() {
                // the new head may be a compatible shared waiter
                entry.cond.notify_all();
            }
            let txn = txns.entry(tid).or_default();
            txn.held.insert(pid);
            txn.waiting.remove(&pid);
        }
        granted
    }

    /// Drops `tid`'s hold on (or pending request for) the page. Releasing
    /// a lock the transaction does not hold is a no-op; releasing a page
    /// no transaction ever requested is a contract violation.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut state = self.state.lock();
        let LockState { locks, txns } = &mut *state;
        let Some(entry) = locks.get_mut(&pid) else {
            panic!("released lock on page {} that was never requested", pid);
        };
        entry.drop_txn(tid);
        if let Some(txn) = txns.get_mut(&tid) {
            txn.held.remove(&pid);
            txn.waiting.remove(&pid);
        }
        trace!("{} released page {}", tid, pid);
    }

    /// Releases every lock the transaction holds and withdraws every
    /// request it has queued, then forgets the transaction. Used for both
    /// commit and abort; the difference between the two lives in the log
    /// and the buffer pool, not here.
    pub fn release_all(&self, tid: TransactionId) {
        let mut state = self.state.lock();
        let LockState { locks, txns } = &mut *state;
        let Some(txn) = txns.remove(&tid) else {
            return;
        };
        for pid in txn.held.iter().chain(txn.waiting.iter()) {
            if let Some(entry) = locks.get_mut(pid) {
                entry.drop_txn(tid);
            }
        }
        trace!(
            "{} released {} held and {} pending lock(s)",
            tid,
            txn.held.len(),
            txn.waiting.len()
        );
    }

    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.state
            .lock()
            .locks
            .get(&pid)
            .map_or(false, |e| e.holders.contains(&tid))
    }
}
