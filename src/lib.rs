pub mod buffer;
pub mod common;
pub mod lock;
pub mod storage;
pub mod transaction;
pub mod wal;

pub use buffer::BufferPool;
pub use common::{EngineConfig, EngineError, PageId, Permissions, Result, TransactionId};
pub use lock::{LockManager, LockMode};
pub use storage::{DbFiles, TableFile, TableRegistry, Tuple};
pub use transaction::TransactionManager;
pub use wal::{LogFile, LogRecord, LogRecovery, PageImage};

use std::path::Path;
use std::sync::Arc;

use log::info;

/// The assembled engine: table registry, write-ahead log, lock manager,
/// buffer pool and transaction manager, constructed once and owned here
/// rather than reachable through any global. Opening a database runs
/// crash recovery before anything else may touch the tables.
pub struct Database {
    files: DbFiles,
    tables: Arc<TableRegistry>,
    log: Arc<LogFile>,
    pool: Arc<BufferPool>,
    txns: TransactionManager,
}

impl Database {
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        let files = DbFiles::new(path)?;
        let log = Arc::new(LogFile::open(&files.log_path(), config.page_size)?);
        let tables = Arc::new(TableRegistry::open(
            files.data_dir(),
            files.catalog_path(),
            config.page_size,
        )?);

        // Replay the log before any transaction can run: committed work
        // reappears, loser work is undone.
        LogRecovery::new(log.clone(), tables.clone()).recover()?;
        info!("recovery finished, database at {:?} is open", path);

        let lock_manager = Arc::new(LockManager::new(config.lock_timeout));
        let pool = Arc::new(BufferPool::new(
            config.pool_capacity,
            lock_manager,
            tables.clone(),
            log.clone(),
        ));
        let txns = TransactionManager::new(log.clone(), pool.clone());

        Ok(Self {
            files,
            tables,
            log,
            pool,
            txns,
        })
    }

    pub fn begin(&self) -> Result<TransactionId> {
        self.txns.begin()
    }

    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.txns.commit(tid)
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.txns.abort(tid)
    }

    /// Flushes every dirty page, then logs a checkpoint naming the
    /// transactions still in flight. Redo after a crash starts here.
    pub fn checkpoint(&self) -> Result<()> {
        self.pool.flush_all_pages()?;
        self.log.log_checkpoint(&self.txns.active_ids())?;
        info!("checkpoint taken");
        Ok(())
    }

    pub fn create_table(&self, name: &str, tuple_size: usize) -> Result<u32> {
        self.tables.create_table(name, tuple_size)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn tables(&self) -> &TableRegistry {
        &self.tables
    }

    pub fn log(&self) -> &LogFile {
        &self.log
    }

    pub fn files(&self) -> &DbFiles {
        &self.files
    }

    /// Writes everything through. Not required for durability (the log
    /// carries that), but it lets the next open skip most of redo.
    pub fn close(&self) -> Result<()> {
        self.pool.flush_all_pages()
    }
}
