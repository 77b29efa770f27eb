//! The active partition: exclusive writer, accepts slices, rotates into
//! a persisted/passive partition (spec.md §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filesystem::Filesystem;
use crate::ids::{Id, RowIdBitmap, TypeIds};
use crate::indexer::ValueIndex;
use crate::schema::{Field, QualifiedField, RecordSchema};
use crate::slice::TableSlice;
use crate::store::{self, LookupOutcome, Segment, SegmentBuilder};
use crate::synopsis::PartitionSynopsis;

use super::artifact::{PartitionArtifact, StoreHeader};

pub struct ActivePartition {
    id: Uuid,
    table: String,
    offset: Id,
    events: u64,
    type_ids: HashMap<String, TypeIds>,
    synopsis: PartitionSynopsis,
    indexers: HashMap<QualifiedField, ValueIndex>,
    fields_seen: Vec<Field>,
    fields_seen_names: std::collections::HashSet<String>,
    segment_builder: SegmentBuilder,
    flush_listeners: Vec<tokio::sync::oneshot::Sender<()>>,
    persisting: AtomicBool,
}

impl ActivePartition {
    pub fn new(table: impl Into<String>, max_segment_bytes: u64) -> ActivePartition {
        ActivePartition {
            id: Uuid::new_v4(),
            table: table.into(),
            offset: Id::MAX,
            events: 0,
            type_ids: HashMap::new(),
            synopsis: PartitionSynopsis::new(),
            indexers: HashMap::new(),
            fields_seen: Vec::new(),
            fields_seen_names: std::collections::HashSet::new(),
            segment_builder: SegmentBuilder::new(max_segment_bytes),
            flush_listeners: Vec::new(),
            persisting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn offset(&self) -> Id {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    pub fn is_persisting(&self) -> bool {
        self.persisting.load(Ordering::SeqCst)
    }

    /// Notified once this partition finishes its current `persist` call
    /// (SPEC_FULL.md §B, "Flush listeners").
    pub fn subscribe_flush(&mut self) -> tokio::sync::oneshot::Receiver<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.flush_listeners.push(tx);
        rx
    }

    fn notify_flush_listeners(&mut self) {
        for listener in self.flush_listeners.drain(..) {
            let _ = listener.send(());
        }
    }

    /// Ingest algorithm, spec.md §4.1 steps 1-6.
    pub fn ingest(&mut self, slice: TableSlice) -> Result<()> {
        if slice.offset() < self.type_ids.get(&slice.schema().name).map(TypeIds::len).unwrap_or(0) {
            return Err(Error::LogicError(format!(
                "slice offset {} precedes current type-ids length for {}",
                slice.offset(),
                slice.schema().name
            )));
        }

        // 1. import-time bounds.
        self.synopsis.observe_import_time(slice.import_time());

        // 2. type-ids: mark this slice's rows (possibly sparse).
        let type_ids = self.type_ids.entry(slice.schema().name.clone()).or_default();
        type_ids.mark_ids((0..slice.rows() as usize).map(|r| slice.id_at(r)));

        // 3. offset/events bookkeeping.
        self.offset = self.offset.min(slice.offset());
        self.events += slice.rows();

        // 4. synopsis.add, per leaf field.
        let leaves: Vec<(QualifiedField, usize)> = slice
            .schema()
            .leaves()
            .into_iter()
            .enumerate()
            .map(|(col, qf)| (qf, col))
            .collect();
        self.synopsis.add(&slice, &leaves);

        // 5. indexers, created lazily per qualified field.
        for (field, col) in &leaves {
            let index = self.indexers.entry(field.clone()).or_insert_with(|| ValueIndex::for_type(&field.ty));
            let ids = (0..slice.rows() as usize).map(|r| slice.id_at(r));
            index.append(ids.zip(slice.column(*col).cloned()));
            if self.fields_seen_names.insert(field.name.clone()) {
                if let Some(f) = slice.schema().find(&field.name) {
                    self.fields_seen.push(f.clone());
                }
            }
        }

        // 6. hand the payload to the segment builder.
        self.segment_builder.add(slice)?;
        Ok(())
    }

    /// Read-only snapshot of the current segment payload for query
    /// evaluation against an active partition (spec.md §4.1, "Concurrent
    /// queries against an active partition").
    fn snapshot_segment(&self) -> Segment {
        Segment::from_slices(self.segment_builder_slices())
    }

    fn segment_builder_slices(&self) -> Vec<TableSlice> {
        // `SegmentBuilder` doesn't expose its slices directly since once
        // frozen it shouldn't be read through; for live queries we peek at
        // them via a dedicated accessor.
        self.segment_builder.peek_slices()
    }

    pub fn ids(&self) -> RowIdBitmap {
        self.snapshot_segment().ids()
    }

    pub fn combined_schema(&self) -> RecordSchema {
        RecordSchema::new(self.table.clone(), self.fields_seen.clone())
    }

    /// Evaluates a query against the current in-memory state, per
    /// spec.md §4.1 "Concurrent queries against an active partition" and
    /// the shared handle-lookup algorithm in §4.4.
    pub fn query(
        &self,
        query_ids: &RowIdBitmap,
        expr: &crate::expr::Expression,
        extract_preserve_ids: Option<bool>,
    ) -> Result<LookupOutcome> {
        let universe = self.ids();
        let effective_ids = if query_ids.is_empty() { universe.clone() } else { query_ids.clone() };
        let segment = self.snapshot_segment();
        store::handle_lookup(&segment, &effective_ids, expr, extract_preserve_ids)
    }

    /// Persist algorithm, spec.md §4.1 steps 1-9 (step 1, draining the
    /// inbound stream, is the caller's responsibility: by construction a
    /// `&mut self` call here already implies no concurrent `ingest` is
    /// in flight).
    pub async fn persist(
        mut self,
        fs: &Filesystem,
    ) -> Result<PartitionSynopsis> {
        self.persisting.store(true, Ordering::SeqCst);
        let result = self.persist_inner(fs).await;
        self.persisting.store(false, Ordering::SeqCst);
        self.notify_flush_listeners();
        result
    }

    async fn persist_inner(&mut self, fs: &Filesystem) -> Result<PartitionSynopsis> {
        // 2. snapshot every indexer.
        let mut indexer_chunks = Vec::with_capacity(self.fields_seen.len());
        for field in &self.fields_seen {
            let key = QualifiedField { table: self.table.clone(), name: field.name.clone(), ty: field.ty.clone() };
            if let Some(index) = self.indexers.get(&key) {
                indexer_chunks.push((field.name.clone(), index.serialize()?));
            }
        }

        // 3. shrink synopsis, stamp offset/events (already tracked live).
        self.synopsis.shrink();

        // 4. combined schema.
        let schema = self.combined_schema();

        // 6. finish segment, write segment file.
        let segment = std::mem::replace(&mut self.segment_builder, SegmentBuilder::new(0)).finish();
        let segment_bytes = encode_segment(&segment)?;
        let store_id = self.id;
        let segment_path = fs.partition_path(store_id).with_extension("seg");
        fs.write(&segment_path, segment_bytes).await?;

        // 5. build and write the partition artifact.
        let artifact = PartitionArtifact {
            id: self.id,
            offset: self.offset,
            events: self.events,
            schema,
            type_ids: self.type_ids.clone(),
            indexer_chunks,
            synopsis: self.synopsis.clone(),
            store_header: StoreHeader::Local(store_id),
        };

        // 7. write the synopsis sidecar; failures are logged, not fatal.
        let sidecar = crate::synopsis::partition_synopsis::SynopsisSidecar::from(&self.synopsis);
        match bincode::serialize(&sidecar) {
            Ok(bytes) => {
                if let Err(e) = fs.write(&fs.synopsis_sidecar_path(self.id), bytes).await {
                    warn!("synopsis sidecar write failed for {}: {e} (non-fatal, rebuildable)", self.id);
                }
            }
            Err(e) => warn!("synopsis sidecar encode failed for {}: {e}", self.id),
        }

        // 8. write the artifact; on success hand the synopsis back.
        let artifact_bytes = artifact.encode()?;
        fs.write(&fs.partition_path(self.id), artifact_bytes).await.map_err(|e| {
            info!("partition persist failed for {}, data retained for retry: {e}", self.id);
            e
        })?;

        debug!("persisted partition {} with {} events", self.id, self.events);
        Ok(self.synopsis.clone())
    }
}

/// A segment's on-disk framing: just its constituent slices, bincode
/// encoded. `TableSlice` itself doesn't derive `Serialize` (it's built
/// for in-process sharing via `Arc`); this wire type is the bridge.
#[derive(serde::Serialize, serde::Deserialize)]
struct SegmentWire {
    rows: Vec<SliceWire>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SliceWire {
    schema: RecordSchema,
    /// Per-row ids, in row order -- not just a base offset, so a slice
    /// that was `select`ed down to a non-contiguous id set survives a
    /// persist/reload round trip without getting silently renumbered.
    ids: Vec<Id>,
    import_time: i64,
    rows: Vec<Vec<crate::value::Value>>,
}

impl SegmentWire {
    fn from_segment(segment: &Segment) -> SegmentWire {
        SegmentWire {
            rows: segment
                .slices()
                .iter()
                .map(|slice| SliceWire {
                    schema: slice.schema().clone(),
                    ids: (0..slice.rows() as usize).map(|r| slice.id_at(r)).collect(),
                    import_time: slice.import_time(),
                    rows: (0..slice.rows() as usize)
                        .map(|r| (0..slice.columns()).map(|c| slice.at(r, c).clone()).collect())
                        .collect(),
                })
                .collect(),
        }
    }

    fn into_segment(self) -> Segment {
        let slices = self
            .rows
            .into_iter()
            .map(|w| crate::slice::TableSlice::from_rows_with_ids(w.schema, w.ids, w.import_time, w.rows))
            .collect();
        Segment::from_slices(slices)
    }
}

pub(crate) fn decode_segment(bytes: &[u8]) -> Result<Segment> {
    let wire: SegmentWire = bincode::deserialize(bytes)?;
    Ok(wire.into_segment())
}

pub(crate) fn encode_segment(segment: &Segment) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&SegmentWire::from_segment(segment))?)
}
