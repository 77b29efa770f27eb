//! Idle-flush loop (spec.md §4.1, "Rotation"): periodically flushes any
//! table's active partition that has gone quiet for `flush_idle_timeout`,
//! even if it never reached `partition_capacity`. Mirrors the
//! `DiskMonitor`/`Eraser` periodic-task shape used elsewhere in this crate.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::index::Index;

pub struct IdleFlusher {
    index: Arc<Index>,
    idle_timeout: Duration,
    poll_interval: Duration,
}

impl IdleFlusher {
    pub fn new(index: Arc<Index>, idle_timeout: Duration) -> IdleFlusher {
        let poll_interval = (idle_timeout / 4).max(Duration::from_millis(100));
        IdleFlusher { index, idle_timeout, poll_interval }
    }

    /// Runs the poll loop until cancelled.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            for table in self.index.idle_tables(self.idle_timeout).await {
                if let Err(e) = self.index.flush(&table).await {
                    warn!("idle flush of table {table} failed: {e}");
                }
            }
        }
    }
}
