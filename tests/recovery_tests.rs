use pagevault::{
    buffer::BufferPool,
    common::{EngineError, PageId, TransactionId},
    lock::LockManager,
    storage::{HeapPage, TableFile, TableRegistry, Tuple},
    wal::{LogFile, LogRecord, LogRecovery, PageImage},
};
use std::sync::Arc;
use std::time::Duration;

const PAGE: usize = 128;
const TUPLE: usize = 16;
const TABLE: u32 = 1;

struct Rig {
    _dir: tempfile::TempDir,
    log: Arc<LogFile>,
    tables: Arc<TableRegistry>,
    pool: Arc<BufferPool>,
    recovery: LogRecovery,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LogFile::open(&dir.path().join("wal.log"), PAGE).unwrap());
    let tables = Arc::new(TableRegistry::in_memory(PAGE));
    tables.register(TableFile::in_memory(TABLE, "t", TUPLE, PAGE).unwrap());
    let locks = Arc::new(LockManager::new(Duration::from_millis(200)));
    let pool = Arc::new(BufferPool::new(8, locks, tables.clone(), log.clone()));
    let recovery = LogRecovery::new(log.clone(), tables.clone());
    Rig {
        _dir: dir,
        log,
        tables,
        pool,
        recovery,
    }
}

fn pid(page_no: u32) -> PageId {
    PageId::new(TABLE, page_no)
}

/// A well-formed page image holding `tuples` copies of the fill byte.
fn image(page_no: u32, tuples: usize, fill: u8) -> PageImage {
    let mut page = HeapPage::empty(pid(page_no), PAGE, TUPLE);
    for _ in 0..tuples {
        let mut t = Tuple::new(vec![fill; TUPLE]);
        page.insert(&mut t).unwrap();
    }
    PageImage::new(pid(page_no), page.serialize())
}

fn disk_image(r: &Rig, page_no: u32) -> PageImage {
    r.tables.get(TABLE).unwrap().read_image(pid(page_no)).unwrap()
}

#[test]
fn rollback_restores_the_before_image() {
    let r = rig();
    let t1 = TransactionId(1);
    let before = image(0, 0, 0);
    let after = image(0, 1, 7);

    r.tables.get(TABLE).unwrap().write_image(&after).unwrap(); // already flushed
    r.log.log_begin(t1).unwrap();
    r.log.log_update(t1, before.clone(), after.clone()).unwrap();

    r.recovery.rollback(t1, &r.pool).unwrap();

    assert_eq!(disk_image(&r, 0), before);
    let records = r.log.records().unwrap();
    let n = records.len();
    assert_eq!(
        records[n - 2],
        LogRecord::Clr {
            tid: t1,
            after: before,
        }
    );
    assert_eq!(records[n - 1], LogRecord::Abort { tid: t1 });
}

#[test]
fn rollback_of_a_committed_transaction_is_refused() {
    let r = rig();
    let t1 = TransactionId(1);
    r.log.log_begin(t1).unwrap();
    r.log
        .log_update(t1, image(0, 0, 0), image(0, 1, 7))
        .unwrap();
    r.log.log_commit(t1).unwrap();

    assert!(matches!(
        r.recovery.rollback(t1, &r.pool),
        Err(EngineError::IllegalRollback(_))
    ));
}

#[test]
fn crash_after_commit_redoes_the_update() {
    let r = rig();
    let t1 = TransactionId(1);
    let before = image(0, 0, 0);
    let after = image(0, 1, 7);

    // page never flushed: disk still holds the before image
    r.tables.get(TABLE).unwrap().write_image(&before).unwrap();
    r.log.log_begin(t1).unwrap();
    r.log.log_update(t1, before, after.clone()).unwrap();
    r.log.log_commit(t1).unwrap();

    r.recovery.recover().unwrap();
    assert_eq!(disk_image(&r, 0), after);
}

#[test]
fn crash_before_commit_undoes_and_logs_clr_plus_abort() {
    let r = rig();
    let t1 = TransactionId(1);
    let before = image(0, 0, 0);
    let after = image(0, 1, 7);

    // the dirty page made it to disk, then the process died
    r.tables.get(TABLE).unwrap().write_image(&after).unwrap();
    r.log.log_begin(t1).unwrap();
    r.log.log_update(t1, before.clone(), after).unwrap();

    r.recovery.recover().unwrap();

    assert_eq!(disk_image(&r, 0), before);
    let records = r.log.records().unwrap();
    let n = records.len();
    assert_eq!(
        records[n - 2],
        LogRecord::Clr {
            tid: t1,
            after: before,
        }
    );
    assert_eq!(records[n - 1], LogRecord::Abort { tid: t1 });
}

#[test]
fn recovery_is_idempotent() {
    let r = rig();
    let t1 = TransactionId(1);
    r.tables
        .get(TABLE)
        .unwrap()
        .write_image(&image(0, 1, 7))
        .unwrap();
    r.log.log_begin(t1).unwrap();
    r.log
        .log_update(t1, image(0, 0, 0), image(0, 1, 7))
        .unwrap();

    r.recovery.recover().unwrap();
    let first = disk_image(&r, 0);
    r.recovery.recover().unwrap();
    let second = disk_image(&r, 0);

    assert_eq!(first, second);
    assert_eq!(first, image(0, 0, 0));
}

#[test]
fn checkpoint_bounds_redo_without_changing_the_outcome() {
    let r = rig();
    let t1 = TransactionId(1);
    let t2 = TransactionId(2);

    // t1's update is flushed, then a checkpoint names t1 as still active
    r.log.log_begin(t1).unwrap();
    r.log
        .log_update(t1, image(0, 0, 0), image(0, 1, 1))
        .unwrap();
    r.tables
        .get(TABLE)
        .unwrap()
        .write_image(&image(0, 1, 1))
        .unwrap();
    r.log.log_checkpoint(&[t1]).unwrap();

    // after the checkpoint: t1 commits, t2 runs and commits, crash before
    // t2's page reaches disk
    r.log.log_commit(t1).unwrap();
    r.log.log_begin(t2).unwrap();
    r.log
        .log_update(t2, image(1, 0, 0), image(1, 2, 2))
        .unwrap();
    r.tables
        .get(TABLE)
        .unwrap()
        .write_image(&image(1, 0, 0))
        .unwrap();
    r.log.log_commit(t2).unwrap();

    r.recovery.recover().unwrap();

    // same state a full-log replay would produce
    assert_eq!(disk_image(&r, 0), image(0, 1, 1));
    assert_eq!(disk_image(&r, 1), image(1, 2, 2));
    // nobody was a loser, so no new abort records
    let records = r.log.records().unwrap();
    assert_eq!(records.last(), Some(&LogRecord::Commit { tid: t2 }));
}

#[test]
fn undo_reaches_losers_that_began_before_the_checkpoint() {
    let r = rig();
    let t1 = TransactionId(1);

    r.log.log_begin(t1).unwrap();
    r.log
        .log_update(t1, image(0, 0, 0), image(0, 1, 9))
        .unwrap();
    r.tables
        .get(TABLE)
        .unwrap()
        .write_image(&image(0, 1, 9))
        .unwrap();
    r.log.log_checkpoint(&[t1]).unwrap();
    // crash: t1 never resolves

    r.recovery.recover().unwrap();

    assert_eq!(disk_image(&r, 0), image(0, 0, 0));
    let records = r.log.records().unwrap();
    assert_eq!(records.last(), Some(&LogRecord::Abort { tid: t1 }));
}

#[test]
fn recovery_on_an_empty_log_is_a_noop() {
    let r = rig();
    r.recovery.recover().unwrap();
    assert!(r.log.records().unwrap().is_empty());
}
