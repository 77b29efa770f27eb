//! Per-column and per-type synopses: compact structures that answer
//! "could this partition/column contain a match" without scanning data.
//!
//! Grounded on spec.md §3 ("Synopsis") and
//! `examples/original_source/libvast/vast/synopsis.hpp`'s bloom/min-max
//! dispatch by column type. No false negatives: `lookup` may answer
//! `MaybeYes` when the true answer is no, never `DefinitelyNo` when the
//! true answer is yes.

pub mod partition_synopsis;

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};

use crate::value::{RelOp, Value};

pub use partition_synopsis::PartitionSynopsis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    DefinitelyNo,
    MaybeYes,
}

/// A single column's synopsis. Dispatches on the column's type the way the
/// teacher's `ColumnCodec`/stats dispatch by `BasicType` does.
///
/// `Bloom`'s `serde` feature (enabled in `Cargo.toml`) gives
/// `BloomSynopsis` a direct `Serialize`/`Deserialize` impl, so the whole
/// enum derives them too -- this is what lets a `PartitionSynopsis` be
/// embedded verbatim in both the partition artifact and the sidecar file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnSynopsis {
    Bloom(BloomSynopsis),
    MinMax(MinMaxSynopsis),
    Exact(ExactSynopsis),
}

impl ColumnSynopsis {
    pub fn new_bloom(expected_items: usize, false_positive_rate: f64) -> ColumnSynopsis {
        ColumnSynopsis::Bloom(BloomSynopsis::new(expected_items, false_positive_rate))
    }

    pub fn new_min_max() -> ColumnSynopsis {
        ColumnSynopsis::MinMax(MinMaxSynopsis::default())
    }

    pub fn new_exact(capacity: usize) -> ColumnSynopsis {
        ColumnSynopsis::Exact(ExactSynopsis::new(capacity))
    }

    pub fn add(&mut self, value: &Value) {
        match self {
            ColumnSynopsis::Bloom(s) => s.add(value),
            ColumnSynopsis::MinMax(s) => s.add(value),
            ColumnSynopsis::Exact(s) => s.add(value),
        }
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> Verdict {
        match self {
            ColumnSynopsis::Bloom(s) => s.lookup(op, value),
            ColumnSynopsis::MinMax(s) => s.lookup(op, value),
            ColumnSynopsis::Exact(s) => s.lookup(op, value),
        }
    }

    /// Converts growing structures (e.g. an exact small-set synopsis) to
    /// their size-optimal form once a partition is about to be persisted.
    pub fn shrink(&mut self) {
        if let ColumnSynopsis::Exact(s) = self {
            if s.values.len() > s.capacity {
                *self = ColumnSynopsis::new_bloom(s.values.len().max(1), 0.01);
                if let ColumnSynopsis::Bloom(b) = self {
                    for v in &s.values {
                        b.add(v);
                    }
                }
            }
        }
    }

    pub fn memusage(&self) -> usize {
        match self {
            ColumnSynopsis::Bloom(s) => s.bitmap.len(),
            ColumnSynopsis::MinMax(_) => std::mem::size_of::<MinMaxSynopsis>(),
            ColumnSynopsis::Exact(s) => s.values.iter().map(value_size).sum(),
        }
    }
}

fn value_size(v: &Value) -> usize {
    match v {
        Value::String(s) | Value::Pattern(s) => s.len() + std::mem::size_of::<Value>(),
        _ => std::mem::size_of::<Value>(),
    }
}

/// Address/string-style synopsis: a bloom filter, no false negatives for
/// `Equal`; any other operator answers `MaybeYes` unconditionally since a
/// bloom filter can't rule out ordering relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomSynopsis {
    filter: Bloom<Vec<u8>>,
    bitmap: Vec<u8>,
}

impl BloomSynopsis {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> BloomSynopsis {
        let filter = Bloom::new_for_fp_rate(expected_items.max(1), false_positive_rate);
        let bitmap = filter.bitmap();
        BloomSynopsis { filter, bitmap }
    }

    pub fn add(&mut self, value: &Value) {
        self.filter.set(&encode(value));
        self.bitmap = self.filter.bitmap();
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> Verdict {
        match op {
            RelOp::Equal => {
                if self.filter.check(&encode(value)) {
                    Verdict::MaybeYes
                } else {
                    Verdict::DefinitelyNo
                }
            }
            _ => Verdict::MaybeYes,
        }
    }
}

fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) | Value::Pattern(s) => s.as_bytes().to_vec(),
        Value::Address(a) => match a {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        },
        Value::Int(i) => i.to_le_bytes().to_vec(),
        Value::Count(c) => c.to_le_bytes().to_vec(),
        other => format!("{other:?}").into_bytes(),
    }
}

/// Time/ordered-numeric synopsis: exact min/max bounds. No false
/// negatives for any ordering operator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MinMaxSynopsis {
    min: Option<i64>,
    max: Option<i64>,
}

impl MinMaxSynopsis {
    pub fn add(&mut self, value: &Value) {
        if let Some(n) = numeric(value) {
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
        }
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> Verdict {
        let (Some(min), Some(max)) = (self.min, self.max) else {
            return Verdict::DefinitelyNo;
        };
        let Some(n) = numeric(value) else {
            return Verdict::MaybeYes;
        };
        let maybe = match op {
            RelOp::Equal => n >= min && n <= max,
            RelOp::NotEqual => true,
            RelOp::Less => min < n,
            RelOp::LessEqual => min <= n,
            RelOp::Greater => max > n,
            RelOp::GreaterEqual => max >= n,
            _ => true,
        };
        if maybe {
            Verdict::MaybeYes
        } else {
            Verdict::DefinitelyNo
        }
    }

    pub fn min(&self) -> Option<i64> {
        self.min
    }

    pub fn max(&self) -> Option<i64> {
        self.max
    }
}

fn numeric(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) | Value::Duration(v) | Value::Time(v) => Some(*v),
        Value::Count(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

/// Exact small-set synopsis used before `shrink()` converts it to a
/// size-optimal bloom filter; trivially correct (it IS the data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactSynopsis {
    values: Vec<Value>,
    capacity: usize,
}

impl ExactSynopsis {
    pub fn new(capacity: usize) -> ExactSynopsis {
        ExactSynopsis { values: Vec::new(), capacity }
    }

    pub fn add(&mut self, value: &Value) {
        if !self.values.contains(value) {
            self.values.push(value.clone());
        }
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> Verdict {
        match op {
            RelOp::Equal => {
                if self.values.contains(value) {
                    Verdict::MaybeYes
                } else {
                    Verdict::DefinitelyNo
                }
            }
            _ => Verdict::MaybeYes,
        }
    }
}
