//! Partition lifecycle: active (exclusive writer) -> persisting ->
//! persisted -> passive (read-only, lazily reloaded) (spec.md §4,
//! "Partition lifecycle").
//!
//! `active_partition.cpp` in the original keeps these as distinct actor
//! roles; here `Partition` is the single type the index's table maps a
//! UUID to, so callers don't need to know which phase a partition is in
//! before routing a query or an erase to it.

pub mod active;
pub mod artifact;
pub mod passive;

pub use active::ActivePartition;
pub use artifact::{PartitionArtifact, StoreHeader, PARTITION_ARTIFACT_VERSION};
pub use passive::{PassivePartition, SharedPassivePartition};

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::filesystem::Filesystem;
use crate::ids::RowIdBitmap;
use crate::query::Query;
use crate::store::LookupOutcome;
use crate::synopsis::PartitionSynopsis;

/// Which phase of its lifecycle a partition is currently in. `Active`
/// covers both the ordinary writable state and mid-persist (the active
/// partition's own `is_persisting` flag distinguishes those; from the
/// index's perspective both still answer queries against the in-memory
/// copy until the persisted artifact is in place).
pub enum Partition {
    Active(ActivePartition),
    Passive(SharedPassivePartition),
}

impl Partition {
    pub fn id(&self) -> Uuid {
        match self {
            Partition::Active(p) => p.id(),
            Partition::Passive(p) => p.id(),
        }
    }

    pub async fn query(&self, fs: &Filesystem, query: &Query) -> Result<LookupOutcome> {
        match self {
            Partition::Active(p) => {
                let outcome = p.query(&query.ids, &query.expr, extract_policy(&query.cmd))?;
                crate::store::dispatch(&query.cmd, &outcome);
                Ok(outcome)
            }
            Partition::Passive(p) => p.query(fs, query).await,
        }
    }

    pub async fn erase(&self, fs: &Filesystem, xs: &RowIdBitmap) -> Result<RowIdBitmap> {
        match self {
            Partition::Active(_) => {
                // An active partition is never targeted by erase directly
                // (spec.md §4.7): the eraser only resolves against the
                // catalog, which holds no entry for the still-active
                // partition. Reaching here is a caller bug.
                Err(crate::error::Error::LogicError("cannot erase an active partition in place".to_string()))
            }
            Partition::Passive(p) => p.erase(fs, xs).await,
        }
    }

    /// Completes the active -> persisted transition, handing back the
    /// synopsis the catalog should publish and a passive handle ready to
    /// serve future reads.
    pub async fn persist(active: ActivePartition, fs: &Filesystem) -> Result<(PartitionSynopsis, SharedPassivePartition)> {
        let id = active.id();
        let table = active.combined_schema().name.clone();
        let synopsis = active.persist(fs).await?;
        let passive = Arc::new(PassivePartition::new(id, table, fs));
        Ok((synopsis, passive))
    }
}

fn extract_policy(cmd: &crate::query::QueryCmd) -> Option<bool> {
    match cmd {
        crate::query::QueryCmd::Count { .. } => None,
        crate::query::QueryCmd::Extract { policy, .. } => {
            Some(matches!(policy, crate::query::ExtractPolicy::PreserveIds))
        }
        crate::query::QueryCmd::Erase => None,
    }
}
