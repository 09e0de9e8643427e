mod log_file;
mod recovery;

pub use log_file::{LogFile, LogRecord, PageImage};
pub use recovery::LogRecovery;
