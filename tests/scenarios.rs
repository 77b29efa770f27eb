//! End-to-end scenarios exercising the public `Index`/`Filesystem` API the
//! way an embedding process would, rather than any one module in
//! isolation. Each test below corresponds to one of the worked examples
//! that motivated the partition lifecycle, catalog pruning, extraction,
//! erase, and disk-monitor pieces.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use uuid::Uuid;

use vastcore::expr::Expression;
use vastcore::ids::RowIdBitmap;
use vastcore::query::{CountMode, ExtractPolicy, Query, QueryCmd, Sink};
use vastcore::schema::{Field, RecordSchema, Type};
use vastcore::slice::TableSliceBuilder;
use vastcore::value::{RelOp, Value};
use vastcore::{DiskMonitor, Filesystem, Index, Options};

fn conn_schema() -> RecordSchema {
    RecordSchema::new("conn", vec![Field::new("proto", Type::String)])
}

fn tcp_slice(schema: &RecordSchema, offset: u64, import_time: i64, rows: usize) -> vastcore::slice::TableSlice {
    let mut b = TableSliceBuilder::new(schema.clone(), offset, import_time);
    for _ in 0..rows {
        b.push_row(vec![Value::String("tcp".to_string())]);
    }
    b.finish()
}

/// Rotate-on-capacity: ingesting 250 rows as slices of 100/100/50 against
/// a partition capacity of 100 produces three persisted partitions of
/// exactly those sizes once the final flush runs.
#[tokio::test]
async fn rotate_on_capacity_produces_three_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let index = Index::new(fs, Options { partition_capacity: 100, ..Options::default() });
    let schema = conn_schema();

    index.ingest("conn", tcp_slice(&schema, 0, 0, 100)).await.unwrap();
    index.ingest("conn", tcp_slice(&schema, 100, 0, 100)).await.unwrap();
    index.ingest("conn", tcp_slice(&schema, 200, 0, 50)).await.unwrap();

    let produced = index.shutdown().await.unwrap();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].events, 50);

    let (candidates, _) = index.resolve(&Expression::empty()).await;
    assert_eq!(candidates.len(), 3);

    let (sink, mut rx) = Sink::new();
    let query = Query {
        id: Uuid::new_v4(),
        expr: Expression::empty(),
        ids: RowIdBitmap::new(),
        cmd: QueryCmd::Count { mode: CountMode::Exact, sink },
    };
    let total = index.query("conn", query).await.unwrap();
    assert_eq!(total, 250);
    let mut observed = 0;
    while let Ok(n) = rx.try_recv() {
        observed += n;
    }
    assert_eq!(observed, 250);
}

/// Query short-circuit via catalog: two partitions with disjoint
/// import-time windows; a `#import_time > 25` query resolves to exactly
/// the partition whose window overlaps, and the row count matches only
/// that partition's rows.
#[tokio::test]
async fn catalog_prunes_to_the_overlapping_partition_only() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let index = Index::new(fs, Options { partition_capacity: 1, ..Options::default() });
    let schema = conn_schema();

    // [10, 20] window, rotates immediately at capacity 1.
    index.ingest("conn", tcp_slice(&schema, 0, 10, 1)).await.unwrap();
    index.ingest("conn", tcp_slice(&schema, 1, 20, 1)).await.unwrap();
    // Force the first window to persist as its own partition before the
    // second window's rows arrive by flushing explicitly between windows.
    index.flush("conn").await.unwrap();

    // [30, 40] window, second partition.
    index.ingest("conn", tcp_slice(&schema, 2, 30, 1)).await.unwrap();
    index.ingest("conn", tcp_slice(&schema, 3, 40, 1)).await.unwrap();
    index.flush("conn").await.unwrap();

    let expr = Expression::meta(vastcore::expr::MetaKey::ImportTime, RelOp::Greater, Value::Int(25));
    let (candidates, _) = index.resolve(&expr).await;
    assert_eq!(candidates.len(), 1);

    let (sink, mut rx) = Sink::new();
    let query = Query { id: Uuid::new_v4(), expr, ids: RowIdBitmap::new(), cmd: QueryCmd::Count { mode: CountMode::Exact, sink } };
    let total = index.query("conn", query).await.unwrap();
    assert_eq!(total, 2);
    let mut observed = 0;
    while let Ok(n) = rx.try_recv() {
        observed += n;
    }
    assert_eq!(observed, 2);
}

/// Extract with preserve-ids: ingesting 10 rows with ids 0..9, then
/// querying `proto == "tcp" and id in {2,5,8}` with `PreserveIds` returns
/// slices whose surviving ids are exactly the intersection of the
/// requested set and the rows actually matching the field predicate.
#[tokio::test]
async fn extract_preserve_ids_returns_exact_requested_subset() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let index = Index::new(fs, Options { partition_capacity: 1_000_000, ..Options::default() });
    let schema = RecordSchema::new("conn", vec![Field::new("proto", Type::String)]);

    let mut b = TableSliceBuilder::new(schema.clone(), 0, 0);
    for i in 0..10u64 {
        // Odd ids are "udp", even are "tcp", so the field predicate alone
        // would match {0,2,4,6,8}; intersected with the requested
        // {2,5,8} it should leave exactly {2,8}.
        let proto = if i % 2 == 0 { "tcp" } else { "udp" };
        b.push_row(vec![Value::String(proto.to_string())]);
    }
    index.ingest("conn", b.finish()).await.unwrap();

    let expr = Expression::field("proto", RelOp::Equal, Value::String("tcp".into()));
    let (sink, mut rx) = Sink::new();
    let query = Query {
        id: Uuid::new_v4(),
        expr,
        ids: RowIdBitmap::from_ids([2, 5, 8]),
        cmd: QueryCmd::Extract { policy: ExtractPolicy::PreserveIds, sink, requested: 10 },
    };
    index.query("conn", query).await.unwrap();

    let mut ids = Vec::new();
    while let Ok(slice) = rx.try_recv() {
        for row in 0..slice.rows() as usize {
            ids.push(slice.id_at(row));
        }
    }
    ids.sort();
    assert_eq!(ids, vec![2, 8]);
}

/// Partial erase: a partition holding ids 0..99 erases {10..19} union
/// {50}, leaving 89 ids behind; subsequent lookups against the erased
/// ids return zero, and a lookup against a surviving id still returns one.
#[tokio::test]
async fn partial_erase_removes_exactly_the_requested_ids() {
    use vastcore::partition::{ActivePartition, PassivePartition};

    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let schema = conn_schema();

    let mut active = ActivePartition::new("conn", 1 << 20);
    active.ingest(tcp_slice(&schema, 0, 0, 100)).unwrap();
    let id = active.id();
    active.persist(&fs).await.unwrap();

    let passive = PassivePartition::new(id, "conn", &fs);
    let mut doomed = RowIdBitmap::from_range(10..20);
    doomed.insert(50);
    let removed = passive.erase(&fs, &doomed).await.unwrap();
    assert_eq!(removed.rank(), 11);

    let remaining = passive.ids(&fs).await.unwrap();
    assert_eq!(remaining.rank(), 89);

    let query = |ids: RowIdBitmap, sink: Sink<u64>| Query {
        id: Uuid::new_v4(),
        expr: Expression::empty(),
        ids,
        cmd: QueryCmd::Count { mode: CountMode::Exact, sink },
    };

    let (sink, mut rx) = Sink::new();
    passive.query(&fs, &query(RowIdBitmap::from_ids([15, 50]), sink)).await.unwrap();
    assert_eq!(rx.recv().await, Some(0));

    let (sink, mut rx) = Sink::new();
    passive.query(&fs, &query(RowIdBitmap::from_ids([20]), sink)).await.unwrap();
    assert_eq!(rx.recv().await, Some(1));
}

/// Disk-monitor sweep: three partitions of distinct, increasing sizes,
/// oldest first; once the scan trips the high-water mark, the monitor
/// keeps dropping the oldest partition until the cumulative size is back
/// under the low-water mark.
#[tokio::test]
async fn disk_monitor_drops_oldest_partitions_until_under_low_water_mark() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let index = Arc::new(Index::new(fs, Options { partition_capacity: 1, ..Options::default() }));
    let schema = conn_schema();

    // Three partitions of increasing row count -> increasing on-disk
    // footprint (.part + .seg + sidecar), persisted oldest first. Track
    // each partition's true total footprint as the `recursive_size`
    // delta, since `list_partition_files` only sees the `.part` file and
    // would understate a partition's real weight.
    let mut footprints = Vec::new();
    let mut before = index.filesystem().recursive_size().await.unwrap();
    for rows in [5usize, 20, 50] {
        let mut b = TableSliceBuilder::new(schema.clone(), 0, 0);
        for _ in 0..rows {
            b.push_row(vec![Value::String("tcp".to_string())]);
        }
        index.ingest("conn", b.finish()).await.unwrap();
        // Capacity 1 plus a non-empty slice rotates immediately; sleep a
        // tick so mtimes order strictly oldest-first.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let after = index.filesystem().recursive_size().await.unwrap();
        footprints.push(after - before);
        before = after;
    }

    let mut files = index.filesystem().list_partition_files().await.unwrap();
    files.sort_by_key(|(_, _, mtime)| *mtime);
    assert_eq!(files.len(), 3);
    let total = before;

    // High water mark: anything below the full total trips a purge.
    // Low water mark: set so dropping only the oldest partition isn't
    // enough, forcing the monitor to drop the second-oldest too.
    let high = total - 1;
    let low = footprints[2] + 1;

    let monitor = DiskMonitor::new(index.clone(), high, low, Duration::from_secs(3600));
    monitor.scan_once().await.unwrap();

    let remaining = index.filesystem().list_partition_files().await.unwrap();
    assert_eq!(remaining.len(), 1);
    let final_size = index.filesystem().recursive_size().await.unwrap();
    assert_eq!(final_size, footprints[2]);
    assert!(final_size <= low);
}

/// Persist-on-exit: a termination signal reaches an active partition
/// holding several pending slices; after shutdown's forced persist, the
/// reloaded passive partition's row count equals the total rows pushed
/// before termination.
#[tokio::test]
async fn shutdown_persists_pending_slices_and_reload_matches_total() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(dir.path());
    let index = Index::new(fs, Options { partition_capacity: 1_000_000, ..Options::default() });
    let schema = conn_schema();

    let mut pushed = 0u64;
    for (offset, rows) in [(0u64, 3usize), (3, 4), (7, 2), (9, 5), (14, 1)] {
        let mut b = TableSliceBuilder::new(schema.clone(), offset, 0);
        for _ in 0..rows {
            b.push_row(vec![Value::String("tcp".to_string())]);
        }
        index.ingest("conn", b.finish()).await.unwrap();
        pushed += rows as u64;
    }

    let produced = index.shutdown().await.unwrap();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].events, pushed);

    let (sink, mut rx) = Sink::new();
    let query = Query {
        id: Uuid::new_v4(),
        expr: Expression::empty(),
        ids: RowIdBitmap::new(),
        cmd: QueryCmd::Count { mode: CountMode::Exact, sink },
    };
    let total = index.query("conn", query).await.unwrap();
    assert_eq!(total, pushed);
    assert_eq!(rx.recv().await, Some(pushed));
}
