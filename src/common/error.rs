use thiserror::Error;

use crate::common::{PageId, TransactionId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} aborted: lock wait timed out")]
    Aborted(TransactionId),

    #[error("buffer pool exhausted: every cached page is dirty")]
    BufferExhausted,

    #[error("corrupt log: {0}")]
    CorruptLog(String),

    #[error("{0} has already committed, refusing to roll back")]
    IllegalRollback(TransactionId),

    #[error("unknown table {0}")]
    UnknownTable(u32),

    #[error("page {0} does not exist")]
    PageNotFound(PageId),

    #[error("page {0} is full")]
    PageFull(PageId),

    #[error("invalid slot index: {0}")]
    InvalidSlot(usize),

    #[error("slot {0} is empty")]
    EmptySlot(usize),

    #[error("tuple is {got} bytes, table stores {want}-byte tuples")]
    TupleSize { got: usize, want: usize },

    #[error("tuple has no record id")]
    MissingRecordId,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
