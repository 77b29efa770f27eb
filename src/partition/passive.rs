//! The passive partition: loaded lazily from disk, read-only, can be
//! erased in place (spec.md §4.3).

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::expr::{eval, Expression};
use crate::filesystem::Filesystem;
use crate::ids::RowIdBitmap;
use crate::indexer::ValueIndex;
use crate::query::{CountMode, ExtractPolicy, Query, QueryCmd};
use crate::schema::{QualifiedField, RecordSchema};
use crate::store::{self, LookupOutcome, Segment};
use crate::synopsis::PartitionSynopsis;

use super::active::{decode_segment, encode_segment};
use super::artifact::PartitionArtifact;

struct Loaded {
    schema: RecordSchema,
    indexers: std::collections::HashMap<QualifiedField, ValueIndex>,
    synopsis: PartitionSynopsis,
    segment: Segment,
}

/// A partition reconstituted from disk. Instantiation is cheap (stores
/// only a path); the first access triggers the read + parse and every
/// later access reuses it.
pub struct PassivePartition {
    id: Uuid,
    table: String,
    artifact_path: PathBuf,
    segment_path: PathBuf,
    loaded: OnceCell<Loaded>,
    erase_lock: Mutex<()>,
}

impl PassivePartition {
    pub fn new(id: Uuid, table: impl Into<String>, fs: &Filesystem) -> PassivePartition {
        PassivePartition {
            id,
            table: table.into(),
            artifact_path: fs.partition_path(id),
            segment_path: fs.partition_path(id).with_extension("seg"),
            loaded: OnceCell::new(),
            erase_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn load(&self, fs: &Filesystem) -> Result<&Loaded> {
        self.loaded
            .get_or_try_init(|| async {
                // Reconstitute over mmapped bytes rather than a full read:
                // the OS pages in only what's touched, and the mapping
                // stays valid even across a concurrent rewrite-and-rename
                // (spec.md §4.3, "mmap(path)").
                let artifact_mmap = fs.mmap(&self.artifact_path).await?;
                let artifact = PartitionArtifact::decode(&artifact_mmap[..])?;
                let segment_mmap = fs.mmap(&self.segment_path).await?;
                let segment = decode_segment(&segment_mmap[..])?;

                let mut indexers = std::collections::HashMap::new();
                for (field_name, chunk) in &artifact.indexer_chunks {
                    let key = QualifiedField {
                        table: self.table.clone(),
                        name: field_name.clone(),
                        ty: crate::schema::Type::String,
                    };
                    indexers.insert(key, ValueIndex::deserialize(chunk)?);
                }

                // The sidecar is a fast-path shortcut: try it first, and
                // fall back to the artifact's own embedded copy on any
                // read/parse/version failure (spec.md §4.1 step 7,
                // SPEC_FULL.md §B, Open Question D.2).
                let synopsis = match self.load_sidecar_synopsis(fs).await {
                    Some(synopsis) => synopsis,
                    None => artifact.synopsis.clone(),
                };

                info!("loaded partition {} ({} events)", self.id, artifact.events);
                Ok(Loaded { schema: artifact.schema, indexers, synopsis, segment })
            })
            .await
    }

    /// Attempts the sidecar-first synopsis read; `None` on any missing
    /// file, parse failure, or version mismatch, in which case `load`
    /// falls back to the artifact's embedded copy.
    async fn load_sidecar_synopsis(&self, fs: &Filesystem) -> Option<PartitionSynopsis> {
        use crate::synopsis::partition_synopsis::{SynopsisSidecar, SYNOPSIS_SIDECAR_VERSION};

        let bytes = fs.read(&fs.synopsis_sidecar_path(self.id)).await.ok()?;
        let sidecar: SynopsisSidecar = bincode::deserialize(&bytes).ok()?;
        if sidecar.version != SYNOPSIS_SIDECAR_VERSION {
            return None;
        }
        Some(sidecar.synopsis)
    }

    /// Returns the partition's synopsis, sidecar-first with the embedded
    /// artifact copy as fallback (Open Question D.2).
    pub async fn synopsis(&self, fs: &Filesystem) -> Result<PartitionSynopsis> {
        Ok(self.load(fs).await?.synopsis.clone())
    }

    pub async fn ids(&self, fs: &Filesystem) -> Result<RowIdBitmap> {
        Ok(self.load(fs).await?.segment.ids())
    }

    /// The partition's raw stored slices, used by the partition
    /// transformer to rebuild filtered output (spec.md §4.6).
    pub async fn slices(&self, fs: &Filesystem) -> Result<Vec<crate::slice::TableSlice>> {
        Ok(self.load(fs).await?.segment.slices().to_vec())
    }

    /// Query evaluation, spec.md §4.3 "Query evaluation" steps 1-5.
    pub async fn query(&self, fs: &Filesystem, query: &Query) -> Result<LookupOutcome> {
        let loaded = self.load(fs).await?;
        let universe = loaded.segment.ids();

        if !query.ids.is_empty() {
            // Step 1: bypass indexers, let the store apply the checker
            // directly against the requested rows.
            let checker = eval::tailor(&query.expr, &loaded.schema, true);
            return self.run_store_command(loaded, &query.ids, &checker, &query.cmd);
        }

        // Step 2: tailor to this partition's layout.
        let tailored = eval::tailor(&query.expr, &loaded.schema, true);

        // Step 3: evaluate against indexers.
        let hits = eval::evaluate(&tailored, &self.table, &loaded.indexers, &universe)?;

        match &query.cmd {
            QueryCmd::Count { mode: CountMode::Estimate, .. } => {
                let outcome = LookupOutcome::Count(hits.rank());
                store::dispatch(&query.cmd, &outcome);
                Ok(outcome)
            }
            _ => self.run_store_command(loaded, &hits, &Expression::empty(), &query.cmd),
        }
    }

    fn run_store_command(
        &self,
        loaded: &Loaded,
        ids: &RowIdBitmap,
        checker: &Expression,
        cmd: &QueryCmd,
    ) -> Result<LookupOutcome> {
        match cmd {
            QueryCmd::Count { .. } => {
                let outcome = store::handle_lookup(&loaded.segment, ids, checker, None)?;
                store::dispatch(cmd, &outcome);
                Ok(outcome)
            }
            QueryCmd::Extract { policy, .. } => {
                let preserve = matches!(policy, ExtractPolicy::PreserveIds);
                let outcome = store::handle_lookup(&loaded.segment, ids, checker, Some(preserve))?;
                store::dispatch(cmd, &outcome);
                Ok(outcome)
            }
            QueryCmd::Erase => Err(Error::LogicError("erase must go through PassivePartition::erase".to_string())),
        }
    }

    /// Erase, spec.md §4.3 "Erase": whole-file delete if `xs` is a
    /// superset of the partition, otherwise rewrite-and-rename. Erases
    /// against the same partition are serialized by `erase_lock`
    /// (Open Question D.1).
    pub async fn erase(&self, fs: &Filesystem, xs: &RowIdBitmap) -> Result<RowIdBitmap> {
        let _guard = self.erase_lock.lock().await;
        let loaded = self.load(fs).await?;
        let partition_ids = loaded.segment.ids();
        let removed = partition_ids.intersection(xs);

        if partition_ids.is_subset(xs) {
            fs.erase(&self.artifact_path).await?;
            fs.erase(&self.segment_path).await?;
            return Ok(removed);
        }

        let new_segment = loaded.segment.copy_without(xs);
        let wire = encode_segment(&new_segment)?;
        fs.write_atomic_replace(&self.segment_path, wire).await?;
        Ok(removed)
    }
}

/// Shared handle so the LRU cache in `Index` can hold a cheap clone.
pub type SharedPassivePartition = Arc<PassivePartition>;
