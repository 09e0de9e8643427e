use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::common::{EngineError, PageId, Permissions, Result, TransactionId};
use crate::lock::LockManager;
use crate::storage::{PageHandle, TableRegistry, Tuple};
use crate::wal::{LogFile, LogRecovery, PageImage};

#[derive(Default)]
struct PoolState {
    pages: HashMap<PageId, PageHandle>,
    /// Most recently used at the front; eviction scans from the back.
    recency: VecDeque<PageId>,
}

impl PoolState {
    fn touch(&mut self, pid: PageId) {
        self.recency.retain(|p| *p != pid);
        self.recency.push_front(pid);
    }

    /// Drops the least recently used clean page. Dirty pages are never
    /// evicted (no-steal), so a pool full of dirty pages is exhausted.
    fn evict(&mut self) -> Result<()> {
        let mut victim = None;
        for pid in self.recency.iter().rev() {
            if let Some(page) = self.pages.get(pid) {
                if page.lock().dirtier().is_none() {
                    victim = Some(*pid);
                    break;
                }
            }
        }
        let Some(pid) = victim else {
            debug!("eviction failed: every cached page is dirty");
            return Err(EngineError::BufferExhausted);
        };
        trace!("evicting clean page {}", pid);
        self.pages.remove(&pid);
        self.recency.retain(|p| *p != pid);
        Ok(())
    }
}

/// Bounded cache of heap pages. Responsible for locking too: fetching a
/// page acquires the matching lock first, and completing a transaction
/// releases everything it held. Durability is the log's job (steal at
/// checkpoint, no force at commit); the pool only promises never to evict
/// a dirty page and never to flush one whose update is not yet logged.
pub struct BufferPool {
    capacity: usize,
    lock_manager: Arc<LockManager>,
    tables: Arc<TableRegistry>,
    log: Arc<LogFile>,
    recovery: LogRecovery,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        lock_manager: Arc<LockManager>,
        tables: Arc<TableRegistry>,
        log: Arc<LogFile>,
    ) -> Self {
        let recovery = LogRecovery::new(log.clone(), tables.clone());
        Self {
            capacity,
            lock_manager,
            tables,
            log,
            recovery,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Fetches a page on behalf of a transaction, blocking until the
    /// matching lock is granted (or failing with `Aborted` when the wait
    /// times out). Cache hits move the page to the most recently used
    /// spot; misses load through the table file, evicting first if full.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageHandle> {
        self.lock_manager.acquire(tid, pid, perm.into())?;

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&pid).cloned() {
            state.touch(pid);
            return Ok(page);
        }

        let page = self.tables.get(pid.table)?.read_page(pid)?;
        if state.pages.len() >= self.capacity {
            state.evict()?;
        }
        let handle = Arc::new(Mutex::new(page));
        state.pages.insert(pid, handle.clone());
        state.recency.push_front(pid);
        Ok(handle)
    }

    /// Adds a tuple to the given table, write-locking the page it lands
    /// on. The dirtied pages are logged, marked, and re-cached so future
    /// requests see the new contents.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, t: Tuple) -> Result<()> {
        let table = self.tables.get(table_id)?;
        let dirtied = table.insert_tuple(tid, t, self)?;
        self.record_mutations(tid, &dirtied)
    }

    /// Removes the tuple named by its record id, symmetric with
    /// `insert_tuple`.
    pub fn delete_tuple(&self, tid: TransactionId, t: &Tuple) -> Result<()> {
        let rid = t.record_id.ok_or(EngineError::MissingRecordId)?;
        let table = self.tables.get(rid.pid.table)?;
        let dirtied = table.delete_tuple(tid, t, self)?;
        self.record_mutations(tid, &dirtied)
    }

    /// Dirty-page propagation: logs each mutated page (before/after
    /// image), advances its before-image snapshot, marks it dirty, and
    /// makes sure it is cached. Logging and flagging happen under the
    /// page mutex, so a concurrent flush can never see a dirty page whose
    /// update record is not yet durable.
    fn record_mutations(&self, tid: TransactionId, pages: &[PageHandle]) -> Result<()> {
        for handle in pages {
            let pid = {
                let mut page = handle.lock();
                let pid = page.id();
                let before = page.before_image().to_vec();
                let after = page.serialize();
                self.log.log_update(
                    tid,
                    PageImage::new(pid, before),
                    PageImage::new(pid, after.clone()),
                )?;
                page.set_before_image(after);
                page.mark_dirty(tid);
                pid
            };

            let mut state = self.state.lock();
            if state.pages.contains_key(&pid) {
                state.touch(pid);
            } else {
                if state.pages.len() >= self.capacity {
                    state.evict()?;
                }
                state.pages.insert(pid, handle.clone());
                state.recency.push_front(pid);
            }
        }
        Ok(())
    }

    /// Gives back a single page lock early. Risky by design: only sound
    /// for pages the transaction has not modified.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds(tid, pid)
    }

    /// Commits or aborts. Commit is no-force: the durable COMMIT record
    /// alone carries it, and the transaction's dirty pages stay cached
    /// until a checkpoint or eviction-time flush of a later life. Abort
    /// rolls the log back, restoring before-images and discarding the
    /// transaction's pages from cache. Either way every lock is released.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        if commit {
            self.log.log_commit(tid)?;
        } else {
            self.recovery.rollback(tid, self)?;
        }
        self.lock_manager.release_all(tid);
        Ok(())
    }

    /// Writes a cached dirty page through to its table file and clears
    /// the flag. Absent or clean pages are left alone.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let handle = { self.state.lock().pages.get(&pid).cloned() };
        let Some(handle) = handle else {
            return Ok(());
        };
        let mut page = handle.lock();
        if page.dirtier().is_none() {
            return Ok(());
        }
        self.tables.get(pid.table)?.write_page(&page)?;
        page.mark_clean();
        trace!("flushed page {}", pid);
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let pids: Vec<PageId> = { self.state.lock().pages.keys().copied().collect() };
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Forgets a page without writing it, dirty or not. Rollback uses
    /// this so a restored page cannot be shadowed by a stale cached copy.
    pub fn discard_page(&self, pid: PageId) {
        let mut state = self.state.lock();
        state.pages.remove(&pid);
        state.recency.retain(|p| *p != pid);
    }

    /// Whether the page is currently resident.
    pub fn is_cached(&self, pid: PageId) -> bool {
        self.state.lock().pages.contains_key(&pid)
    }
}
