use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes per page, for table files and log images alike.
    pub page_size: usize,
    /// Maximum number of pages the buffer pool keeps resident.
    pub pool_capacity: usize,
    /// How long a transaction may wait on locks before it is presumed
    /// deadlocked and aborted.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            pool_capacity: 50,
            lock_timeout: Duration::from_millis(500),
        }
    }
}
