//! Partition transform steps: user- or eraser-supplied pipelines applied
//! to a set of partitions, producing replacement partitions that get
//! swapped into the catalog atomically (spec.md §4.6, "Partition
//! transformer").

use crate::error::Result;
use crate::expr::{eval, Expression};
use crate::slice::TableSlice;

/// One stage of a transform pipeline. `FilterStep` is the only stage the
/// core ships (it's what the eraser needs); other stages are a plugin
/// concern excluded by the specification's Non-goals.
pub trait TransformStep: Send + Sync {
    fn apply(&self, slice: &TableSlice) -> Result<Option<TableSlice>>;
}

/// Keeps only the rows in a slice that do NOT match `expr` -- the
/// building block of retention enforcement (spec.md §4.7 step 3: "negates
/// expr; keep everything not matching retention").
pub struct FilterStep {
    expr: Expression,
}

impl FilterStep {
    pub fn new(expr: Expression) -> FilterStep {
        FilterStep { expr }
    }

    /// Builds the step the eraser actually runs: keep rows where the
    /// retention predicate does *not* hold.
    pub fn retaining_complement_of(retention_expr: Expression) -> FilterStep {
        FilterStep { expr: retention_expr.negate() }
    }
}

impl TransformStep for FilterStep {
    fn apply(&self, slice: &TableSlice) -> Result<Option<TableSlice>> {
        if self.expr.is_empty() {
            return Ok(Some(slice.clone()));
        }
        let tailored = eval::tailor(&self.expr, slice.schema(), true);
        let hits = matching_ids(slice, &tailored)?;
        Ok(slice.select(&hits))
    }
}

fn matching_ids(slice: &TableSlice, checker: &Expression) -> Result<crate::ids::RowIdBitmap> {
    use crate::indexer::ValueIndex;
    use crate::schema::QualifiedField;
    use std::collections::HashMap;

    let table = slice.schema().name.clone();
    let mut indexers: HashMap<QualifiedField, ValueIndex> = HashMap::new();
    for (col, field) in slice.schema().fields.iter().enumerate() {
        let key = QualifiedField { table: table.clone(), name: field.name.clone(), ty: field.ty.clone() };
        let mut idx = ValueIndex::for_type(&field.ty);
        let ids = (0..slice.rows() as usize).map(|r| slice.id_at(r));
        idx.append(ids.zip(slice.column(col).cloned()));
        indexers.insert(key, idx);
    }
    let universe = slice.ids();
    eval::evaluate(checker, &table, &indexers, &universe)
}

/// Runs a pipeline of steps over a sequence of slices, dropping slices a
/// step reduces to empty.
pub fn run_pipeline(steps: &[Box<dyn TransformStep>], slices: Vec<TableSlice>) -> Result<Vec<TableSlice>> {
    let mut current = slices;
    for step in steps {
        let mut next = Vec::with_capacity(current.len());
        for slice in &current {
            if let Some(out) = step.apply(slice)? {
                next.push(out);
            }
        }
        current = next;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, RecordSchema, Type};
    use crate::slice::TableSliceBuilder;
    use crate::value::{RelOp, Value};

    #[test]
    fn filter_step_keeps_non_matching_rows() {
        let schema = RecordSchema::new("conn", vec![Field::new("proto", Type::String)]);
        let mut b = TableSliceBuilder::new(schema, 0, 0);
        b.push_row(vec![Value::String("tcp".into())]);
        b.push_row(vec![Value::String("udp".into())]);
        let slice = b.finish();

        let retention = Expression::field("proto", RelOp::Equal, Value::String("udp".into()));
        let step = FilterStep::retaining_complement_of(retention);
        let kept = step.apply(&slice).unwrap().unwrap();
        assert_eq!(kept.rows(), 1);
        assert_eq!(kept.at(0, 0), &Value::String("tcp".into()));
    }

    #[test]
    fn filter_step_drops_slice_entirely() {
        let schema = RecordSchema::new("conn", vec![Field::new("proto", Type::String)]);
        let mut b = TableSliceBuilder::new(schema, 0, 0);
        b.push_row(vec![Value::String("udp".into())]);
        let slice = b.finish();

        let retention = Expression::field("proto", RelOp::Equal, Value::String("udp".into()));
        let step = FilterStep::retaining_complement_of(retention);
        assert!(step.apply(&slice).unwrap().is_none());
    }
}
