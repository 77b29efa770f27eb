use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a single `Index` instance.
///
/// Loading these from YAML/env is the job of the excluded configuration
/// collaborator; this struct only owns the defaults and the types, the way
/// `locustdb::Options` does for the teacher crate.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory of the on-disk `db/` layout. `None` means fully
    /// in-memory (no persistence, no passive partitions).
    pub db_path: Option<PathBuf>,

    /// Rotate the active partition once it holds at least this many events.
    pub partition_capacity: u64,

    /// Cap on the size of an active segment builder's backing buffer.
    pub max_segment_size_bytes: u64,

    /// Flush the active partition after this much idle time even if it
    /// hasn't reached `partition_capacity`.
    pub flush_idle_timeout: Duration,

    /// Grace period a pending `persist` gets before a termination signal is
    /// honored anyway (watchdog in spec.md §4.1/§5).
    pub persist_watchdog_timeout: Duration,

    /// Max number of passive partitions kept resident in the LRU cache.
    pub passive_partition_cache_count: usize,

    /// Max resident bytes across cached passive partitions (best-effort).
    pub passive_partition_cache_bytes: u64,

    /// Disk monitor high water mark: start purging once exceeded.
    pub disk_high_water_mark_bytes: u64,

    /// Disk monitor low water mark: purge until under this.
    pub disk_low_water_mark_bytes: u64,

    /// How often the disk monitor re-checks DB size.
    pub disk_scan_interval: Duration,

    /// How often the eraser re-runs its retention sweep.
    pub eraser_interval: Duration,

    /// Per-request timeout applied by callers that don't supply their own.
    pub default_request_timeout: Duration,

    /// Number of worker threads used for CPU-bound partition work
    /// (indexer builds, segment rewrites). Mirrors
    /// `Options::wal_flush_compaction_threads` in the teacher.
    pub compaction_threads: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            db_path: None,
            partition_capacity: 1_048_576,
            max_segment_size_bytes: 128 * 1024 * 1024,
            flush_idle_timeout: Duration::from_secs(5),
            persist_watchdog_timeout: Duration::from_secs(30),
            passive_partition_cache_count: 64,
            passive_partition_cache_bytes: 1024 * 1024 * 1024,
            disk_high_water_mark_bytes: 100 * 1024 * 1024 * 1024,
            disk_low_water_mark_bytes: 80 * 1024 * 1024 * 1024,
            disk_scan_interval: Duration::from_secs(60),
            eraser_interval: Duration::from_secs(600),
            default_request_timeout: Duration::from_secs(30),
            compaction_threads: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
