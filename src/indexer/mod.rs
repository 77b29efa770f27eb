//! Per-column value indexes.
//!
//! Grounded on spec.md §4.2 and the teacher's single-writer/many-reader
//! column index pattern (`src/scheduler`'s task queues feeding append-only
//! per-column state). `lookup` must satisfy: for every indexed row `r`,
//! `r ∈ lookup(op, v) ⇔ relation(col[r], op, v)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{Id, RowIdBitmap};
use crate::schema::Type;
use crate::value::{RelOp, Value};

/// A column's value index. One concrete representation per family of
/// types; `Exact` (hash-style equality lookup) covers strings/addresses/
/// enums, `Ordered` (sorted map, supports range ops) covers numerics and
/// time.
///
/// The only observable contract is `lookup` correctness and that
/// `serialize()` at time T loads back into an index answering the same
/// questions (spec.md §4.2) -- the wire form is plain bincode of the
/// in-memory maps, not a bespoke byte layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueIndex {
    Exact(ExactIndex),
    Ordered(OrderedIndex),
}

impl ValueIndex {
    pub fn for_type(ty: &Type) -> ValueIndex {
        match ty {
            Type::Int | Type::Count | Type::Real | Type::Time | Type::Duration | Type::Port => {
                ValueIndex::Ordered(OrderedIndex::default())
            }
            _ => ValueIndex::Exact(ExactIndex::default()),
        }
    }

    /// Pushes `(row id, value)` pairs. Ids aren't assumed contiguous or
    /// derived from a base offset -- a caller indexing a slice that has
    /// already gone through `TableSlice::select` must hand back the
    /// slice's *true* retained ids, not a recomputed range.
    pub fn append(&mut self, values: impl Iterator<Item = (Id, Value)>) {
        match self {
            ValueIndex::Exact(idx) => idx.append(values),
            ValueIndex::Ordered(idx) => idx.append(values),
        }
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> RowIdBitmap {
        match self {
            ValueIndex::Exact(idx) => idx.lookup(op, value),
            ValueIndex::Ordered(idx) => idx.lookup(op, value),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<ValueIndex> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn memusage(&self) -> usize {
        match self {
            ValueIndex::Exact(idx) => idx.memusage(),
            ValueIndex::Ordered(idx) => idx.memusage(),
        }
    }
}

fn encode_key(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) | Value::Pattern(s) => s.as_bytes().to_vec(),
        Value::Bool(b) => vec![*b as u8],
        Value::Address(a) => match a {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        },
        Value::Subnet(a, prefix) => {
            let mut bytes = match a {
                std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
                std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
            };
            bytes.push(*prefix);
            bytes
        }
        Value::Enumeration(e) => e.to_le_bytes().to_vec(),
        other => format!("{other:?}").into_bytes(),
    }
}

/// Equality-only index: bytes-key → bitmap of rows holding that key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExactIndex {
    buckets: BTreeMap<Vec<u8>, RowIdBitmap>,
    len: Id,
}

impl ExactIndex {
    fn append(&mut self, values: impl Iterator<Item = (Id, Value)>) {
        for (row, value) in values {
            if value.is_null() {
                continue;
            }
            self.buckets.entry(encode_key(&value)).or_default().insert(row);
            self.len = self.len.max(row + 1);
        }
    }

    fn lookup(&self, op: RelOp, value: &Value) -> RowIdBitmap {
        let key = encode_key(value);
        match op {
            RelOp::Equal => self.buckets.get(&key).cloned().unwrap_or_default(),
            RelOp::NotEqual => {
                let all = RowIdBitmap::from_range(0..self.len);
                all.difference(&self.buckets.get(&key).cloned().unwrap_or_default())
            }
            _ => RowIdBitmap::new(),
        }
    }

    fn memusage(&self) -> usize {
        self.buckets.iter().map(|(k, v)| k.len() + v.serialized_size()).sum()
    }
}

fn numeric_key(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) | Value::Duration(v) | Value::Time(v) => Some(*v),
        Value::Count(v) => i64::try_from(*v).ok(),
        Value::Port(v) => Some(*v as i64),
        Value::Real(v) => Some(v.0 as i64),
        _ => None,
    }
}

/// Ordered index over numeric/time-like columns, supporting range
/// operators in addition to equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderedIndex {
    values: BTreeMap<i64, RowIdBitmap>,
    len: Id,
}

impl OrderedIndex {
    fn append(&mut self, values: impl Iterator<Item = (Id, Value)>) {
        for (row, value) in values {
            if let Some(n) = numeric_key(&value) {
                self.values.entry(n).or_default().insert(row);
            }
            self.len = self.len.max(row + 1);
        }
    }

    fn lookup(&self, op: RelOp, value: &Value) -> RowIdBitmap {
        let Some(n) = numeric_key(value) else { return RowIdBitmap::new() };
        let mut result = RowIdBitmap::new();
        let matches: Box<dyn Iterator<Item = &RowIdBitmap>> = match op {
            RelOp::Equal => Box::new(self.values.get(&n).into_iter()),
            RelOp::NotEqual => Box::new(self.values.iter().filter(move |(k, _)| **k != n).map(|(_, v)| v)),
            RelOp::Less => Box::new(self.values.range(..n).map(|(_, v)| v)),
            RelOp::LessEqual => Box::new(self.values.range(..=n).map(|(_, v)| v)),
            RelOp::Greater => Box::new(self.values.range(n + 1..).map(|(_, v)| v)),
            RelOp::GreaterEqual => Box::new(self.values.range(n..).map(|(_, v)| v)),
            _ => Box::new(std::iter::empty()),
        };
        for bitmap in matches {
            result = result.union(bitmap);
        }
        result
    }

    fn memusage(&self) -> usize {
        self.values.values().map(RowIdBitmap::serialized_size).sum::<usize>() + self.values.len() * 8
    }
}

/// Zips a base offset with a value iterator to produce the `(id, value)`
/// pairs `append` expects, for the common case of a contiguous slice.
pub fn from_offset(base_offset: Id, values: impl Iterator<Item = Value>) -> impl Iterator<Item = (Id, Value)> {
    (base_offset..).zip(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_index_equal_and_not_equal() {
        let mut idx = ExactIndex::default();
        idx.append(from_offset(
            0,
            vec![Value::String("a".into()), Value::String("b".into()), Value::String("a".into())].into_iter(),
        ));
        assert_eq!(idx.lookup(RelOp::Equal, &Value::String("a".into())).rank(), 2);
        assert_eq!(idx.lookup(RelOp::NotEqual, &Value::String("a".into())).rank(), 1);
    }

    #[test]
    fn ordered_index_range_ops() {
        let mut idx = OrderedIndex::default();
        idx.append(from_offset(0, vec![Value::Count(1), Value::Count(5), Value::Count(10)].into_iter()));
        assert_eq!(idx.lookup(RelOp::Less, &Value::Count(5)).rank(), 1);
        assert_eq!(idx.lookup(RelOp::GreaterEqual, &Value::Count(5)).rank(), 2);
        assert_eq!(idx.lookup(RelOp::Equal, &Value::Count(10)).rank(), 1);
    }

    #[test]
    fn append_offsets_by_base() {
        let mut idx = ExactIndex::default();
        idx.append(from_offset(42, vec![Value::Bool(true)].into_iter()));
        assert!(idx.lookup(RelOp::Equal, &Value::Bool(true)).contains(42));
    }

    #[test]
    fn append_accepts_sparse_ids() {
        let mut idx = ExactIndex::default();
        idx.append(vec![(2u64, Value::Bool(true)), (5u64, Value::Bool(false)), (8u64, Value::Bool(true))].into_iter());
        let hits = idx.lookup(RelOp::Equal, &Value::Bool(true));
        assert!(hits.contains(2) && hits.contains(8) && !hits.contains(5));
    }

    #[test]
    fn snapshot_roundtrips_through_bytes() {
        let mut idx = ValueIndex::for_type(&Type::String);
        idx.append(from_offset(5, vec![Value::String("a".into()), Value::String("b".into())].into_iter()));
        let bytes = idx.serialize().unwrap();
        let restored = ValueIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored.lookup(RelOp::Equal, &Value::String("a".into())), idx.lookup(RelOp::Equal, &Value::String("a".into())));
    }
}
