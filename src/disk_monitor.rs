//! Size-triggered purge loop (spec.md §4.8): once the DB directory
//! exceeds a high-water mark, drop whole oldest partitions until back
//! under the low-water mark.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::error::Result;
use crate::index::Index;

/// Clears `purging` on drop, regardless of which exit path `purge` took.
struct PurgingGuard<'a>(&'a AtomicBool);

impl Drop for PurgingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DiskMonitor {
    index: Arc<Index>,
    high_water_mark: u64,
    low_water_mark: u64,
    scan_interval: Duration,
    purging: AtomicBool,
}

impl DiskMonitor {
    pub fn new(index: Arc<Index>, high_water_mark: u64, low_water_mark: u64, scan_interval: Duration) -> DiskMonitor {
        DiskMonitor { index, high_water_mark, low_water_mark, scan_interval, purging: AtomicBool::new(false) }
    }

    /// Runs the scan loop until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.scan_once().await {
                warn!("disk monitor scan failed: {e}");
            }
        }
    }

    /// One scan, spec.md §4.8 steps 1-2.
    pub async fn scan_once(&self) -> Result<()> {
        let size = self.index.filesystem().recursive_size().await?;
        if size > self.high_water_mark && !self.purging.swap(true, Ordering::SeqCst) {
            let _guard = PurgingGuard(&self.purging);
            return self.purge().await;
        }
        Ok(())
    }

    /// Erase loop, spec.md §4.8 steps 3-5: always whole partitions,
    /// oldest first by mtime, until under the low-water mark.
    async fn purge(&self) -> Result<()> {
        loop {
            let mut files = self.index.filesystem().list_partition_files().await?;
            files.sort_by_key(|(_, _, mtime)| *mtime);
            let Some((oldest_id, oldest_size, _)) = files.into_iter().next() else {
                // Nothing left to purge -- stop regardless of water mark.
                return Ok(());
            };

            let removed = self.index.erase(oldest_id).await?;
            info!("disk monitor erased partition {oldest_id} ({oldest_size} bytes, {} rows)", removed.rank());

            let size = self.index.filesystem().recursive_size().await?;
            if size <= self.low_water_mark {
                return Ok(());
            }
        }
    }
}
