mod config;
mod error;

pub use config::EngineConfig;
pub use error::{EngineError, Result};

use std::fmt;

/// Identifies one fixed-size page of one table. Cache key and lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table: u32,
    pub page_no: u32,
}

impl PageId {
    pub const fn new(table: u32, page_no: u32) -> Self {
        Self { table, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.page_no)
    }
}

/// Unique per-transaction id. Never reused for the lifetime of a log file;
/// the allocator is reseeded past the logged high-water mark on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Access level a transaction requests on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}
