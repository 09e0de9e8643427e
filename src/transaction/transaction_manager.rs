use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::BufferPool;
use crate::common::{Result, TransactionId};
use crate::wal::LogFile;

/// Hands out transaction ids and drives the begin/commit/abort lifecycle.
/// The id counter starts past the log's high-water mark so ids are never
/// reused across restarts. The active set makes completing a transaction
/// twice a harmless no-op.
pub struct TransactionManager {
    next_tid: AtomicU64,
    active: Mutex<HashSet<TransactionId>>,
    log: Arc<LogFile>,
    pool: Arc<BufferPool>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogFile>, pool: Arc<BufferPool>) -> Self {
        let next_tid = AtomicU64::new(log.last_tid() + 1);
        Self {
            next_tid,
            active: Mutex::new(HashSet::new()),
            log,
            pool,
        }
    }

    pub fn begin(&self) -> Result<TransactionId> {
        let tid = TransactionId(self.next_tid.fetch_add(1, Ordering::SeqCst));
        self.log.log_begin(tid)?;
        self.active.lock().insert(tid);
        debug!("{} began", tid);
        Ok(tid)
    }

    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.complete(tid, true)
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.complete(tid, false)
    }

    fn complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        if !self.active.lock().remove(&tid) {
            debug!("{} already completed, ignoring", tid);
            return Ok(());
        }
        self.pool.transaction_complete(tid, commit)?;
        debug!("{} {}", tid, if commit { "committed" } else { "aborted" });
        Ok(())
    }

    /// Transactions currently in flight; the checkpoint record carries
    /// these as its loser candidates.
    pub fn active_ids(&self) -> Vec<TransactionId> {
        self.active.lock().iter().copied().collect()
    }
}
