//! A whole-partition synopsis: the catalog's candidate-pruning unit.
//!
//! Grounded on spec.md §3 ("Partition" / "synopsis" field) and §4.5
//! (Catalog.resolve).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::Id;
use crate::schema::QualifiedField;
use crate::value::{RelOp, Value};

use super::{ColumnSynopsis, Verdict};

/// Per-column synopses plus the partition-wide metadata the catalog needs
/// to resolve meta-predicates (`#import_time`, `#offset`, ...) without
/// touching the column synopses at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSynopsis {
    pub offset: Id,
    pub events: u64,
    pub min_import_time: Option<i64>,
    pub max_import_time: Option<i64>,
    columns: HashMap<QualifiedField, ColumnSynopsis>,
}

impl PartitionSynopsis {
    pub fn new() -> PartitionSynopsis {
        PartitionSynopsis {
            offset: Id::MAX,
            events: 0,
            min_import_time: None,
            max_import_time: None,
            columns: HashMap::new(),
        }
    }

    pub fn observe_import_time(&mut self, import_time: i64) {
        self.min_import_time = Some(self.min_import_time.map_or(import_time, |m| m.min(import_time)));
        self.max_import_time = Some(self.max_import_time.map_or(import_time, |m| m.max(import_time)));
    }

    pub fn column_mut(&mut self, field: QualifiedField, default: impl FnOnce() -> ColumnSynopsis) -> &mut ColumnSynopsis {
        self.columns.entry(field).or_insert_with(default)
    }

    pub fn column(&self, field: &QualifiedField) -> Option<&ColumnSynopsis> {
        self.columns.get(field)
    }

    /// Feeds one table slice's rows into the relevant column synopses.
    /// `fields` maps each leaf field to its slice column index.
    pub fn add(&mut self, slice: &crate::slice::TableSlice, fields: &[(QualifiedField, usize)]) {
        self.observe_import_time(slice.import_time());
        self.offset = self.offset.min(slice.offset());
        self.events += slice.rows();
        for (field, col) in fields {
            for value in slice.column(*col) {
                if value.is_null() {
                    continue;
                }
                let synopsis = self.column_mut(field.clone(), || default_synopsis(&field.ty));
                synopsis.add(value);
            }
        }
    }

    /// Converts growing per-column synopses to their size-optimal form.
    /// Called once, right before persisting (spec.md §4.1 persist step 3).
    pub fn shrink(&mut self) {
        for synopsis in self.columns.values_mut() {
            synopsis.shrink();
        }
    }

    /// `DefinitelyNo` iff the named column's synopsis says so; absence of a
    /// synopsis for the field (e.g. it never appeared in this partition)
    /// means `DefinitelyNo` too, since the field is provably absent.
    pub fn lookup(&self, field: &QualifiedField, op: RelOp, value: &Value) -> Verdict {
        match self.columns.get(field) {
            Some(synopsis) => synopsis.lookup(op, value),
            None => Verdict::DefinitelyNo,
        }
    }

    pub fn memusage(&self) -> usize {
        self.columns.values().map(ColumnSynopsis::memusage).sum()
    }
}

impl Default for PartitionSynopsis {
    fn default() -> PartitionSynopsis {
        PartitionSynopsis::new()
    }
}

fn default_synopsis(ty: &crate::schema::Type) -> ColumnSynopsis {
    use crate::schema::Type;
    match ty {
        Type::Time | Type::Duration | Type::Int | Type::Count => ColumnSynopsis::new_min_max(),
        Type::Address | Type::Subnet => ColumnSynopsis::new_bloom(4096, 0.01),
        _ => ColumnSynopsis::new_exact(64),
    }
}

/// On-disk framing for the synopsis sidecar file (spec.md persist step 7):
/// the whole `PartitionSynopsis`, including per-column synopses, not just
/// partition-wide metadata -- a reader that only had offset/events/
/// import-time couldn't actually answer `Catalog::resolve`'s per-field
/// questions and would have to treat every field as absent. Purely a
/// fast-path read optimization: on any parse or version mismatch the
/// caller falls back to the partition artifact's own embedded copy
/// (Open Question D.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynopsisSidecar {
    pub version: u32,
    pub synopsis: PartitionSynopsis,
}

pub const SYNOPSIS_SIDECAR_VERSION: u32 = 1;

impl From<&PartitionSynopsis> for SynopsisSidecar {
    fn from(s: &PartitionSynopsis) -> SynopsisSidecar {
        SynopsisSidecar { version: SYNOPSIS_SIDECAR_VERSION, synopsis: s.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, RecordSchema, Type};
    use crate::slice::TableSliceBuilder;

    #[test]
    fn add_updates_offset_events_and_columns() {
        let schema = RecordSchema::new("conn", vec![Field::new("id", Type::Count)]);
        let mut b = TableSliceBuilder::new(schema, 10, 500);
        b.push_row(vec![Value::Count(1)]);
        b.push_row(vec![Value::Count(2)]);
        let slice = b.finish();

        let field = QualifiedField { table: "conn".into(), name: "id".into(), ty: Type::Count };
        let mut synopsis = PartitionSynopsis::new();
        synopsis.add(&slice, &[(field.clone(), 0)]);

        assert_eq!(synopsis.offset, 10);
        assert_eq!(synopsis.events, 2);
        assert_eq!(synopsis.min_import_time, Some(500));
        assert_eq!(synopsis.lookup(&field, RelOp::Less, &Value::Count(1)), Verdict::DefinitelyNo);
    }

    #[test]
    fn sidecar_roundtrips_full_synopsis_including_columns() {
        let schema = RecordSchema::new("conn", vec![Field::new("port", Type::Count)]);
        let mut b = TableSliceBuilder::new(schema, 0, 0);
        b.push_row(vec![Value::Count(80)]);
        let slice = b.finish();
        let field = QualifiedField { table: "conn".into(), name: "port".into(), ty: Type::Count };
        let mut synopsis = PartitionSynopsis::new();
        synopsis.add(&slice, &[(field.clone(), 0)]);

        let sidecar = SynopsisSidecar::from(&synopsis);
        let bytes = bincode::serialize(&sidecar).unwrap();
        let restored: SynopsisSidecar = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.version, SYNOPSIS_SIDECAR_VERSION);
        assert_eq!(restored.synopsis.lookup(&field, RelOp::Equal, &Value::Count(443)), Verdict::DefinitelyNo);
    }

    #[test]
    fn absent_field_is_definitely_no() {
        let synopsis = PartitionSynopsis::new();
        let field = QualifiedField { table: "conn".into(), name: "missing".into(), ty: Type::Count };
        assert_eq!(synopsis.lookup(&field, RelOp::Equal, &Value::Count(1)), Verdict::DefinitelyNo);
    }
}
