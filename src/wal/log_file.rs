use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::{Mutex, MutexGuard};

use crate::common::{EngineError, PageId, Result, TransactionId};

/// Offset stored in the header when no checkpoint has been taken yet.
const NO_CHECKPOINT: i64 = -1;
/// The first 8 bytes of the file hold the offset of the latest checkpoint.
pub(crate) const HEADER_SIZE: u64 = 8;
/// Every record is followed by an 8-byte pointer back to its own start;
/// it is the only structure backward scans have.
const TRAILER_SIZE: u64 = 8;

const BEGIN_RECORD: u32 = 1;
const COMMIT_RECORD: u32 = 2;
const ABORT_RECORD: u32 = 3;
const UPDATE_RECORD: u32 = 4;
const CLR_RECORD: u32 = 5;
const CHECKPOINT_RECORD: u32 = 6;

/// Full copy of a page's bytes, tagged with the page it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub pid: PageId,
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn new(pid: PageId, data: Vec<u8>) -> Self {
        Self { pid, data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin {
        tid: TransactionId,
    },
    Commit {
        tid: TransactionId,
    },
    Abort {
        tid: TransactionId,
    },
    Update {
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    },
    /// Compensation record: an undo happened and installed `after`.
    /// Replaying it on a repeated crash must not be re-undone, so only
    /// the installed image is kept.
    Clr {
        tid: TransactionId,
        after: PageImage,
    },
    Checkpoint {
        active: Vec<TransactionId>,
    },
}

impl LogRecord {
    fn type_code(&self) -> u32 {
        match self {
            LogRecord::Begin { .. } => BEGIN_RECORD,
            LogRecord::Commit { .. } => COMMIT_RECORD,
            LogRecord::Abort { .. } => ABORT_RECORD,
            LogRecord::Update { .. } => UPDATE_RECORD,
            LogRecord::Clr { .. } => CLR_RECORD,
            LogRecord::Checkpoint { .. } => CHECKPOINT_RECORD,
        }
    }

    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            LogRecord::Begin { tid }
            | LogRecord::Commit { tid }
            | LogRecord::Abort { tid }
            | LogRecord::Update { tid, .. }
            | LogRecord::Clr { tid, .. } => Some(*tid),
            LogRecord::Checkpoint { .. } => None,
        }
    }
}

/// Append-only write-ahead log. Record framing, byte-exact:
/// `[type: u32][tid: u64]<payload>[record start offset: u64]`, big-endian.
/// Update payloads carry a before and an after page image, CLRs an after
/// image only, checkpoints a count followed by the active transaction
/// ids. Every append is fsync'd before it returns.
pub struct LogFile {
    pub(crate) inner: Mutex<LogInner>,
}

pub(crate) struct LogInner {
    file: File,
    page_size: usize,
    pub(crate) current_offset: u64,
    last_checkpoint: i64,
    last_tid: u64,
}

impl LogFile {
    /// Opens (or creates) the log and walks it once: the walk validates
    /// the framing end to end and recovers the transaction-id high-water
    /// mark for the allocator.
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut inner = LogInner {
            file,
            page_size,
            current_offset: HEADER_SIZE,
            last_checkpoint: NO_CHECKPOINT,
            last_tid: 0,
        };

        if len == 0 {
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.write_i64::<BigEndian>(NO_CHECKPOINT)?;
            inner.file.sync_data()?;
        } else if len < HEADER_SIZE {
            return Err(EngineError::CorruptLog(
                "file shorter than its header".to_string(),
            ));
        } else {
            inner.file.seek(SeekFrom::Start(0))?;
            inner.last_checkpoint = read_i64(&mut inner.file)?;
            let mut pos = HEADER_SIZE;
            while pos < len {
                let (record, next) = inner.read_record_at(pos)?;
                if let Some(tid) = record.tid() {
                    inner.last_tid = inner.last_tid.max(tid.0);
                }
                pos = next;
            }
            inner.current_offset = len;
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn log_begin(&self, tid: TransactionId) -> Result<()> {
        self.inner.lock().append(&LogRecord::Begin { tid })?;
        Ok(())
    }

    pub fn log_commit(&self, tid: TransactionId) -> Result<()> {
        self.inner.lock().append(&LogRecord::Commit { tid })?;
        Ok(())
    }

    pub fn log_abort(&self, tid: TransactionId) -> Result<()> {
        self.inner.lock().append(&LogRecord::Abort { tid })?;
        Ok(())
    }

    pub fn log_update(
        &self,
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    ) -> Result<()> {
        self.inner
            .lock()
            .append(&LogRecord::Update { tid, before, after })?;
        Ok(())
    }

    pub fn log_clr(&self, tid: TransactionId, after: PageImage) -> Result<()> {
        self.inner.lock().append(&LogRecord::Clr { tid, after })?;
        Ok(())
    }

    pub fn log_checkpoint(&self, active: &[TransactionId]) -> Result<()> {
        self.inner.lock().append(&LogRecord::Checkpoint {
            active: active.to_vec(),
        })?;
        Ok(())
    }

    /// Every record, oldest first. Recovery does its own offset-aware
    /// scans; this is for tests and debugging.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let mut inner = self.inner.lock();
        let end = inner.current_offset;
        let mut records = Vec::new();
        let mut pos = HEADER_SIZE;
        while pos < end {
            let (record, next) = inner.read_record_at(pos)?;
            records.push(record);
            pos = next;
        }
        Ok(records)
    }

    /// Highest transaction id that appears anywhere in the log.
    pub fn last_tid(&self) -> u64 {
        self.inner.lock().last_tid
    }

    /// Start offset of the latest checkpoint record, if one exists. The
    /// same value lives in the file header.
    pub fn last_checkpoint_offset(&self) -> Option<u64> {
        let inner = self.inner.lock();
        (inner.last_checkpoint >= 0).then(|| inner.last_checkpoint as u64)
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock()
    }
}

impl LogInner {
    /// Appends one record plus its back-pointer and fsyncs. A checkpoint
    /// additionally rewrites the header to point at itself.
    pub(crate) fn append(&mut self, record: &LogRecord) -> Result<u64> {
        let start = self.current_offset;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_u32::<BigEndian>(record.type_code())?;
        self.file
            .write_u64::<BigEndian>(record.tid().map_or(0, |t| t.0))?;
        match record {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => {}
            LogRecord::Update { before, after, .. } => {
                self.write_image(before)?;
                self.write_image(after)?;
            }
            LogRecord::Clr { after, .. } => {
                self.write_image(after)?;
            }
            LogRecord::Checkpoint { active } => {
                self.file.write_u32::<BigEndian>(active.len() as u32)?;
                for tid in active {
                    self.file.write_u64::<BigEndian>(tid.0)?;
                }
            }
        }
        self.file.write_u64::<BigEndian>(start)?;
        self.file.sync_data()?;
        self.current_offset = self.file.stream_position()?;

        if let Some(tid) = record.tid() {
            self.last_tid = self.last_tid.max(tid.0);
        }
        if matches!(record, LogRecord::Checkpoint { .. }) {
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_i64::<BigEndian>(start as i64)?;
            self.file.sync_data()?;
            self.last_checkpoint = start as i64;
        }
        Ok(start)
    }

    /// Reads the record starting at `offset`; returns it together with
    /// the offset just past its back-pointer. The back-pointer must point
    /// at `offset` itself or the log is corrupt.
    pub(crate) fn read_record_at(&mut self, offset: u64) -> Result<(LogRecord, u64)> {
        self.file.seek(SeekFrom::Start(offset))?;
        let code = read_u32(&mut self.file)?;
        let tid = TransactionId(read_u64(&mut self.file)?);
        let record = match code {
            BEGIN_RECORD => LogRecord::Begin { tid },
            COMMIT_RECORD => LogRecord::Commit { tid },
            ABORT_RECORD => LogRecord::Abort { tid },
            UPDATE_RECORD => {
                let before = self.read_image()?;
                let after = self.read_image()?;
                LogRecord::Update { tid, before, after }
            }
            CLR_RECORD => LogRecord::Clr {
                tid,
                after: self.read_image()?,
            },
            CHECKPOINT_RECORD => {
                let count = read_u32(&mut self.file)?;
                let mut active = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    active.push(TransactionId(read_u64(&mut self.file)?));
                }
                LogRecord::Checkpoint { active }
            }
            other => {
                return Err(EngineError::CorruptLog(format!(
                    "unexpected record type {} at offset {}",
                    other, offset
                )))
            }
        };
        let back = read_u64(&mut self.file)?;
        if back != offset {
            return Err(EngineError::CorruptLog(format!(
                "back-pointer at end of record {} points at {}",
                offset, back
            )));
        }
        Ok((record, self.file.stream_position()?))
    }

    /// Follows the back-pointer that sits just before `trailer_end`,
    /// yielding the start offset of the record it terminates.
    pub(crate) fn back_pointer_before(&mut self, trailer_end: u64) -> Result<u64> {
        self.file
            .seek(SeekFrom::Start(trailer_end - TRAILER_SIZE))?;
        read_u64(&mut self.file)
    }

    fn write_image(&mut self, image: &PageImage) -> Result<()> {
        debug_assert_eq!(image.data.len(), self.page_size);
        self.file.write_u32::<BigEndian>(image.pid.table)?;
        self.file.write_u32::<BigEndian>(image.pid.page_no)?;
        std::io::Write::write_all(&mut self.file, &image.data)?;
        Ok(())
    }

    fn read_image(&mut self) -> Result<PageImage> {
        let table = read_u32(&mut self.file)?;
        let page_no = read_u32(&mut self.file)?;
        let mut data = vec![0u8; self.page_size];
        self.file.read_exact(&mut data).map_err(corrupt_on_eof)?;
        Ok(PageImage::new(PageId::new(table, page_no), data))
    }
}

fn corrupt_on_eof(e: std::io::Error) -> EngineError {
    if e.kind() == ErrorKind::UnexpectedEof {
        EngineError::CorruptLog("truncated record".to_string())
    } else {
        e.into()
    }
}

fn read_u32(file: &mut File) -> Result<u32> {
    file.read_u32::<BigEndian>().map_err(corrupt_on_eof)
}

fn read_u64(file: &mut File) -> Result<u64> {
    file.read_u64::<BigEndian>().map_err(corrupt_on_eof)
}

fn read_i64(file: &mut File) -> Result<i64> {
    file.read_i64::<BigEndian>().map_err(corrupt_on_eof)
}
