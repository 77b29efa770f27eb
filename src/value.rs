//! Runtime column values.
//!
//! One `Value` variant per leaf `Type` (spec.md §3). Containers (list, map,
//! record) are represented as `Value::List`/`Value::Map`/`Value::Record` so
//! a single enum covers every column an indexer or synopsis might see.

use std::net::IpAddr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::ids::Id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Count(u64),
    Real(OrderedFloat<f64>),
    String(String),
    Pattern(String),
    Address(IpAddr),
    Subnet(IpAddr, u8),
    Port(u16),
    Duration(i64),
    Time(i64),
    Enumeration(u32),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Duration(v) | Value::Time(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Value::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(v.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) | Value::Pattern(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<IpAddr> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }
}

/// Comparison operators an expression predicate can apply to a `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Match,
    NotMatch,
}

impl RelOp {
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Equal => RelOp::NotEqual,
            RelOp::NotEqual => RelOp::Equal,
            RelOp::Less => RelOp::GreaterEqual,
            RelOp::LessEqual => RelOp::Greater,
            RelOp::Greater => RelOp::LessEqual,
            RelOp::GreaterEqual => RelOp::Less,
            RelOp::In => RelOp::NotIn,
            RelOp::NotIn => RelOp::In,
            RelOp::Match => RelOp::NotMatch,
            RelOp::NotMatch => RelOp::Match,
        }
    }
}

/// A `(row id, value)` pair as produced by an extraction query -- the unit
/// the query sink streams to the caller (spec.md §4.4, "Extract").
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub row: Id,
    pub value: Value,
}
