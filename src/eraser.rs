//! Periodic retention sweep (spec.md §4.7): on each tick, resolve a
//! retention query to candidate partitions and rewrite them to drop
//! everything the query matches.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::error::Result;
use crate::expr::parse;
use crate::index::Index;
use crate::transform::{FilterStep, TransformStep};

/// Drives `retention_query` against `table` every `interval`, dropping
/// matching rows from every resolved partition.
pub struct Eraser {
    index: Arc<Index>,
    table: String,
    retention_query: String,
    interval: Duration,
}

impl Eraser {
    pub fn new(index: Arc<Index>, table: impl Into<String>, retention_query: impl Into<String>, interval: Duration) -> Eraser {
        Eraser { index, table: table.into(), retention_query: retention_query.into(), interval }
    }

    /// Runs the sweep loop until cancelled. Intended to be spawned as its
    /// own task; a parse or apply failure just gets logged and the
    /// eraser tries again next tick (spec.md §4.7 step 1: "reject on
    /// parse error, next interval").
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(removed) => info!("eraser swept table {} ({removed} partitions rewritten or dropped)", self.table),
                Err(e) => warn!("eraser sweep of table {} failed: {e}", self.table),
            }
        }
    }

    /// One sweep: steps 1-6 of spec.md §4.7. Returns the number of
    /// partitions the transform touched.
    pub async fn sweep(&self) -> Result<usize> {
        // 1-2. parse and validate the retention expression.
        let retention_expr = parse::parse(&self.retention_query)?;

        // 3. keep everything NOT matching retention.
        let step: Box<dyn TransformStep> = Box::new(FilterStep::retaining_complement_of(retention_expr.clone()));

        // 4. resolve candidate partitions via the catalog.
        let (candidates, _) = self.index.resolve(&retention_expr).await;
        if candidates.is_empty() {
            return Ok(0);
        }

        // 5. apply via the partition transformer, dropping the originals.
        let produced = self.index.apply_transform(&self.table, vec![step], &candidates, false).await?;
        info!("eraser produced {} replacement partition(s) for table {}", produced.len(), self.table);
        Ok(candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::Filesystem;
    use crate::options::Options;
    use crate::query::{CountMode, Query, QueryCmd, Sink};
    use crate::schema::{Field, RecordSchema, Type};
    use crate::slice::TableSliceBuilder;
    use crate::value::Value;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_drops_matching_rows_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::new(dir.path());
        let index = Arc::new(Index::new(fs, Options { partition_capacity: 1, ..Options::default() }));

        let schema = RecordSchema::new("conn", vec![Field::new("proto", Type::String)]);
        let mut b = TableSliceBuilder::new(schema, 0, 0);
        b.push_row(vec![Value::String("tcp".into())]);
        b.push_row(vec![Value::String("udp".into())]);
        index.ingest("conn", b.finish()).await.unwrap();

        let eraser = Eraser::new(index.clone(), "conn", "proto == \"udp\"", Duration::from_secs(3600));
        eraser.sweep().await.unwrap();

        let (sink, mut rx) = Sink::new();
        let query = Query {
            id: Uuid::new_v4(),
            expr: crate::expr::Expression::empty(),
            ids: crate::ids::RowIdBitmap::new(),
            cmd: QueryCmd::Count { mode: CountMode::Exact, sink },
        };
        let total = index.query("conn", query).await.unwrap();
        assert_eq!(total, 1);
        let mut observed = 0;
        while let Ok(n) = rx.try_recv() {
            observed += n;
        }
        assert_eq!(observed, 1);
    }
}
