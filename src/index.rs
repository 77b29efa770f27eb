//! The index: owns every table's active partition, rotates them on
//! capacity, LRU-caches loaded passive partitions, and routes queries,
//! erases, and transforms (spec.md §4.6).
//!
//! Modeled as a plain struct with internal `tokio::sync::Mutex` guards
//! rather than a literal actor-and-mailbox -- the same simplification
//! already made for `ActivePartition`/`PassivePartition` (SPEC_FULL.md
//! §C, "Concurrency model"): single-consumer access falls out of
//! `&self` plus the mutex rather than a dedicated inbound channel.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use lru::LruCache;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::filesystem::Filesystem;
use crate::ids::RowIdBitmap;
use crate::options::Options;
use crate::partition::{ActivePartition, Partition, PassivePartition, SharedPassivePartition};
use crate::query::{Query, QueryCmd};
use crate::slice::TableSlice;
use crate::store::LookupOutcome;
use crate::transform::TransformStep;

/// Summary of a partition produced by a rotation or transform, the
/// `PartitionInfo` of the control surface (spec.md §6).
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub id: Uuid,
    pub table: String,
    pub events: u64,
}

pub struct Index {
    fs: Filesystem,
    options: Options,
    catalog: Mutex<Catalog>,
    active: Mutex<HashMap<String, ActivePartition>>,
    table_of: Mutex<HashMap<Uuid, String>>,
    passive_cache: Mutex<LruCache<Uuid, SharedPassivePartition>>,
    last_ingest: Mutex<HashMap<String, Instant>>,
}

impl Index {
    pub fn new(fs: Filesystem, options: Options) -> Index {
        let capacity = NonZeroUsize::new(options.passive_partition_cache_count.max(1)).unwrap();
        Index {
            fs,
            options,
            catalog: Mutex::new(Catalog::new()),
            active: Mutex::new(HashMap::new()),
            table_of: Mutex::new(HashMap::new()),
            passive_cache: Mutex::new(LruCache::new(capacity)),
            last_ingest: Mutex::new(HashMap::new()),
        }
    }

    pub fn filesystem(&self) -> &Filesystem {
        &self.fs
    }

    /// `Index.ingest`: appends one slice to `table`'s active partition,
    /// rotating it if `events` now meets `partition_capacity` (spec.md
    /// §4.1, "Rotation").
    pub async fn ingest(&self, table: &str, slice: TableSlice) -> Result<()> {
        self.last_ingest.lock().await.insert(table.to_string(), Instant::now());
        let should_rotate = {
            let mut active = self.active.lock().await;
            let partition =
                active.entry(table.to_string()).or_insert_with(|| ActivePartition::new(table, self.options.max_segment_size_bytes));
            partition.ingest(slice)?;
            partition.events() >= self.options.partition_capacity
        };
        if should_rotate {
            self.rotate(table).await?;
        }
        Ok(())
    }

    /// Tables whose active partition has gone quiet for at least
    /// `timeout` and still holds unpersisted events -- the candidate set
    /// the idle-flush loop rotates out (spec.md §4.1, "Rotation": flush on
    /// idle even below `partition_capacity`).
    pub async fn idle_tables(&self, timeout: Duration) -> Vec<String> {
        let active = self.active.lock().await;
        let last_ingest = self.last_ingest.lock().await;
        active
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .filter_map(|(table, _)| {
                let idle = last_ingest.get(table).map(|t| t.elapsed() >= timeout).unwrap_or(false);
                idle.then(|| table.clone())
            })
            .collect()
    }

    /// Flushes every table's active partition, each bounded by
    /// `persist_watchdog_timeout`, for use on process shutdown (spec.md
    /// §4.1/§5, "Exit semantics"). A table whose persist doesn't finish in
    /// time surfaces `Error::PersistAborted` instead of hanging the
    /// shutdown indefinitely.
    pub async fn shutdown(&self) -> Result<Vec<PartitionInfo>> {
        let tables: Vec<String> = self.active.lock().await.keys().cloned().collect();
        let mut produced = Vec::new();
        for table in tables {
            let watchdog = self.options.persist_watchdog_timeout;
            match tokio::time::timeout(watchdog, self.flush(&table)).await {
                Ok(Ok(Some(info))) => produced.push(info),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(Error::PersistAborted(format!(
                        "persist for table {table} exceeded watchdog timeout of {watchdog:?}"
                    )))
                }
            }
        }
        Ok(produced)
    }

    /// Forces `table`'s active partition through `persist` regardless of
    /// size -- the flush path used on idle timeout or shutdown (spec.md
    /// §4.1, "Rotation" / "Exit semantics").
    pub async fn flush(&self, table: &str) -> Result<Option<PartitionInfo>> {
        self.rotate(table).await
    }

    async fn rotate(&self, table: &str) -> Result<Option<PartitionInfo>> {
        let partition = {
            let mut active = self.active.lock().await;
            active.remove(table)
        };
        let Some(partition) = partition else { return Ok(None) };
        if partition.is_empty() {
            // Nothing accumulated since the last rotation; put it back
            // rather than persisting an empty partition.
            self.active.lock().await.insert(table.to_string(), partition);
            return Ok(None);
        }

        let id = partition.id();
        let events = partition.events();
        let (synopsis, passive) = Partition::persist(partition, &self.fs).await?;
        self.catalog.lock().await.publish(id, table, synopsis);
        self.table_of.lock().await.insert(id, table.to_string());
        self.passive_cache.lock().await.put(id, passive);
        info!("rotated partition {id} for table {table} ({events} events)");
        Ok(Some(PartitionInfo { id, table: table.to_string(), events }))
    }

    /// Candidate partitions for `expr` per the catalog's synopsis pruning,
    /// plus the meta-predicate-tailored expression -- exposed so the
    /// eraser can resolve a retention query the same way a live query
    /// does (spec.md §4.7 step 4).
    pub async fn resolve(&self, expr: &crate::expr::Expression) -> (Vec<Uuid>, crate::expr::Expression) {
        self.catalog.lock().await.resolve(expr)
    }

    async fn passive_handle(&self, id: Uuid) -> Result<SharedPassivePartition> {
        if let Some(p) = self.passive_cache.lock().await.get(&id) {
            return Ok(p.clone());
        }
        let table = self.table_of.lock().await.get(&id).cloned().ok_or_else(|| Error::NotFound(format!("partition {id}")))?;
        let passive: SharedPassivePartition = Arc::new(PassivePartition::new(id, table, &self.fs));
        self.passive_cache.lock().await.put(id, passive.clone());
        Ok(passive)
    }

    /// `Index.query`: resolves candidates via the catalog, evaluates each
    /// one plus the table's live active partition, and streams matches to
    /// `query.cmd`'s sink as a side effect. Returns the aggregate row
    /// count. A single partition's evaluation error is recorded and does
    /// not fail the overall query (spec.md §7, "Propagation policy").
    pub async fn query(&self, table: &str, query: Query) -> Result<u64> {
        let (candidates, tailored_expr) = self.catalog.lock().await.resolve(&query.expr);
        let mut total = 0u64;
        let mut partition_errors = Vec::new();

        {
            let active = self.active.lock().await;
            if let Some(partition) = active.get(table) {
                match partition.query(&query.ids, &query.expr, extract_policy(&query.cmd)) {
                    Ok(outcome) => {
                        crate::store::dispatch(&query.cmd, &outcome);
                        total += outcome_rows(&outcome);
                    }
                    Err(e) => partition_errors.push(e),
                }
            }
        }

        for id in candidates {
            let passive = match self.passive_handle(id).await {
                Ok(p) => p,
                Err(e) => {
                    partition_errors.push(e);
                    continue;
                }
            };
            let per_partition =
                Query { id: query.id, expr: tailored_expr.clone(), ids: query.ids.clone(), cmd: clone_cmd(&query.cmd) };
            match passive.query(&self.fs, &per_partition).await {
                Ok(outcome) => total += outcome_rows(&outcome),
                Err(e) => partition_errors.push(e),
            }
        }

        if !partition_errors.is_empty() {
            warn!("query {} completed with {} partition-level errors", query.id, partition_errors.len());
        }
        Ok(total)
    }

    /// `Index.erase`: deletes a partition wholesale by erasing its full
    /// id range. Used by the disk monitor, which only ever drops whole
    /// partitions (spec.md §4.8, "Policy"); row-granular retention goes
    /// through `apply_transform` instead.
    pub async fn erase(&self, partition_id: Uuid) -> Result<RowIdBitmap> {
        let passive = self.passive_handle(partition_id).await?;
        let xs = passive.ids(&self.fs).await?;
        let removed = passive.erase(&self.fs, &xs).await?;
        self.catalog.lock().await.remove(partition_id);
        self.table_of.lock().await.remove(&partition_id);
        self.passive_cache.lock().await.pop(&partition_id);
        debug!("erased partition {partition_id} wholesale ({} rows)", removed.rank());
        Ok(removed)
    }

    /// `Index.apply_transform`: runs `steps` over every slice of each
    /// listed partition, accumulates the output into a fresh partition,
    /// and swaps it into the catalog. Old partitions stay catalog-visible
    /// until the new one is fully persisted and registered, then one
    /// registry update retires them (spec.md §4.6, "Partition
    /// transformer"; atomicity is per-table, not a single lock across the
    /// whole swap -- acceptable since only one rotation/transform runs per
    /// table at a time given `active`'s per-table mutex section).
    pub async fn apply_transform(
        &self,
        table: &str,
        steps: Vec<Box<dyn TransformStep>>,
        partitions: &[Uuid],
        keep_original: bool,
    ) -> Result<Vec<PartitionInfo>> {
        let mut rebuilt = ActivePartition::new(table, self.options.max_segment_size_bytes);
        for id in partitions {
            let passive = self.passive_handle(*id).await?;
            let slices = passive.slices(&self.fs).await?;
            let transformed = crate::transform::run_pipeline(&steps, slices)?;
            for slice in transformed {
                rebuilt.ingest(slice)?;
            }
        }

        let mut produced = Vec::new();
        if !rebuilt.is_empty() {
            let id = rebuilt.id();
            let events = rebuilt.events();
            let (synopsis, passive) = Partition::persist(rebuilt, &self.fs).await?;
            produced.push((id, events, synopsis, passive));
        }

        {
            let mut catalog = self.catalog.lock().await;
            for (id, _, synopsis, _) in &produced {
                catalog.publish(*id, table, synopsis.clone());
            }
            if !keep_original {
                for id in partitions {
                    catalog.remove(*id);
                }
            }
        }
        {
            let mut table_of = self.table_of.lock().await;
            for (id, ..) in &produced {
                table_of.insert(*id, table.to_string());
            }
            if !keep_original {
                for id in partitions {
                    table_of.remove(id);
                }
            }
        }
        {
            let mut cache = self.passive_cache.lock().await;
            for (id, _, _, passive) in &produced {
                cache.put(*id, passive.clone());
            }
            if !keep_original {
                for id in partitions {
                    cache.pop(id);
                }
            }
        }

        if !keep_original {
            for id in partitions {
                let artifact_path = self.fs.partition_path(*id);
                let segment_path = artifact_path.with_extension("seg");
                let _ = self.fs.erase(&artifact_path).await;
                let _ = self.fs.erase(&segment_path).await;
            }
        }

        Ok(produced.into_iter().map(|(id, events, _, _)| PartitionInfo { id, table: table.to_string(), events }).collect())
    }
}

fn extract_policy(cmd: &QueryCmd) -> Option<bool> {
    match cmd {
        QueryCmd::Count { .. } => None,
        QueryCmd::Extract { policy, .. } => Some(matches!(policy, crate::query::ExtractPolicy::PreserveIds)),
        QueryCmd::Erase => None,
    }
}

fn outcome_rows(outcome: &LookupOutcome) -> u64 {
    match outcome {
        LookupOutcome::Count(n) => *n,
        LookupOutcome::Slices(slices) => slices.iter().map(TableSlice::rows).sum(),
    }
}

/// `QueryCmd` isn't `Clone` (a fresh sink handle per recipient would be
/// meaningless for most fields) -- but fanning the *same* query out to N
/// partitions needs N commands sharing the one sink, which `Sink<T>`
/// itself supports cloning.
fn clone_cmd(cmd: &QueryCmd) -> QueryCmd {
    match cmd {
        QueryCmd::Count { mode, sink } => QueryCmd::Count { mode: *mode, sink: sink.clone() },
        QueryCmd::Extract { policy, sink, requested } => {
            QueryCmd::Extract { policy: *policy, sink: sink.clone(), requested: *requested }
        }
        QueryCmd::Erase => QueryCmd::Erase,
    }
}
