use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::buffer::BufferPool;
use crate::common::{EngineError, Result, TransactionId};
use crate::storage::TableRegistry;
use crate::wal::log_file::{LogFile, LogRecord, HEADER_SIZE};

/// The two recovery algorithms: single-transaction rollback while the
/// engine is live, and full redo/undo crash recovery at startup. Both
/// hold the log exclusively for their whole run.
pub struct LogRecovery {
    log: Arc<LogFile>,
    tables: Arc<TableRegistry>,
}

impl LogRecovery {
    pub fn new(log: Arc<LogFile>, tables: Arc<TableRegistry>) -> Self {
        Self { log, tables }
    }

    /// Undoes everything `tid` wrote: walks the back-pointers from the
    /// tail, installing the before-image of each of the transaction's
    /// updates (with a CLR logged first) and dropping the page from the
    /// cache so no stale dirty copy survives. Meeting the transaction's
    /// COMMIT on the way is a contract violation. Finishes with an ABORT
    /// record.
    pub fn rollback(&self, tid: TransactionId, pool: &BufferPool) -> Result<()> {
        let mut log = self.log.lock_inner();
        debug!("rolling back {}", tid);

        let end = log.current_offset;
        let mut pos = end;
        while pos > HEADER_SIZE {
            let start = log.back_pointer_before(pos)?;
            if start < HEADER_SIZE || start >= pos {
                return Err(EngineError::CorruptLog(format!(
                    "back-pointer before offset {} points at {}",
                    pos, start
                )));
            }
            let (record, _) = log.read_record_at(start)?;
            match record {
                LogRecord::Commit { tid: t } if t == tid => {
                    return Err(EngineError::IllegalRollback(tid));
                }
                LogRecord::Update { tid: t, before, .. } if t == tid => {
                    log.append(&LogRecord::Clr {
                        tid,
                        after: before.clone(),
                    })?;
                    self.tables.get(before.pid.table)?.write_image(&before)?;
                    pool.discard_page(before.pid);
                }
                _ => {}
            }
            pos = start;
        }

        log.append(&LogRecord::Abort { tid })?;
        Ok(())
    }

    /// Crash recovery, run once at startup before any transaction:
    /// installs the updates of committed transactions and erases those of
    /// losers. Redo runs first so undo works against exactly the state
    /// the log's last writes imply.
    pub fn recover(&self) -> Result<()> {
        let mut log = self.log.lock_inner();
        let end = log.current_offset;
        if end <= HEADER_SIZE {
            return Ok(());
        }

        // Walk backward for the most recent checkpoint: its active list
        // seeds the losers and its position bounds the redo pass.
        let mut losers: HashSet<TransactionId> = HashSet::new();
        let mut redo_from = HEADER_SIZE;
        let mut pos = end;
        while pos > HEADER_SIZE {
            let start = log.back_pointer_before(pos)?;
            if start < HEADER_SIZE || start >= pos {
                return Err(EngineError::CorruptLog(format!(
                    "back-pointer before offset {} points at {}",
                    pos, start
                )));
            }
            let (record, next) = log.read_record_at(start)?;
            if let LogRecord::Checkpoint { active } = record {
                losers = active.into_iter().collect();
                redo_from = next;
                break;
            }
            pos = start;
        }
        info!(
            "recovery: redo from offset {} with {} checkpointed loser(s)",
            redo_from,
            losers.len()
        );

        // Redo: reapply every logged image, committed or not, while
        // tracking which transactions never resolved.
        let mut pos = redo_from;
        while pos < end {
            let (record, next) = log.read_record_at(pos)?;
            match record {
                LogRecord::Begin { tid } => {
                    losers.insert(tid);
                }
                LogRecord::Commit { tid } | LogRecord::Abort { tid } => {
                    losers.remove(&tid);
                }
                LogRecord::Update { after, .. } | LogRecord::Clr { after, .. } => {
                    self.tables.get(after.pid.table)?.write_image(&after)?;
                }
                LogRecord::Checkpoint { .. } => {
                    return Err(EngineError::CorruptLog(format!(
                        "checkpoint at offset {} after the redo start point",
                        pos
                    )));
                }
            }
            pos = next;
        }
        info!("recovery: undoing {} loser transaction(s)", losers.len());

        // Undo: walk backward installing loser before-images, logging a
        // CLR for each so a repeated crash does not re-undo them. A loser
        // is done once its BEGIN is reached.
        let mut undone = Vec::new();
        let mut pos = end;
        while !losers.is_empty() && pos > HEADER_SIZE {
            let start = log.back_pointer_before(pos)?;
            let (record, _) = log.read_record_at(start)?;
            match record {
                LogRecord::Update { tid, before, .. } if losers.contains(&tid) => {
                    log.append(&LogRecord::Clr {
                        tid,
                        after: before.clone(),
                    })?;
                    self.tables.get(before.pid.table)?.write_image(&before)?;
                }
                LogRecord::Begin { tid } => {
                    if losers.remove(&tid) {
                        undone.push(tid);
                    }
                }
                _ => {}
            }
            pos = start;
        }

        for tid in undone {
            log.append(&LogRecord::Abort { tid })?;
        }
        Ok(())
    }
}
