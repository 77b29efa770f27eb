//! Types, fields, and record schemas.
//!
//! Grounded on `examples/original_source/libvast/vast/schema.hpp`: a schema
//! is a sequence of named, typed fields with value-equality and a `merge`
//! operation that combines two schemas of disjoint slices into the
//! partition's combined layout.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Leaf and container types a column can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int,
    Count,
    Real,
    String,
    Pattern,
    Address,
    Subnet,
    Port,
    Duration,
    Time,
    Enumeration(Vec<String>),
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Record(RecordSchema),
}

impl Type {
    pub fn name(&self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Count => "count",
            Type::Real => "real",
            Type::String => "string",
            Type::Pattern => "pattern",
            Type::Address => "address",
            Type::Subnet => "subnet",
            Type::Port => "port",
            Type::Duration => "duration",
            Type::Time => "time",
            Type::Enumeration(_) => "enumeration",
            Type::List(_) => "list",
            Type::Map(_, _) => "map",
            Type::Record(_) => "record",
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Type::Record(_))
    }
}

/// Indexing/attribute hints attached to a field, e.g. `#index=hash`.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub attributes: Attributes,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Field {
        Field { name: name.into(), ty, attributes: Attributes::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Field {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A named record of fields. Two schemas are equal iff their fields are
/// equal in order, including metadata -- matching spec.md's "Schema / type"
/// invariant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> RecordSchema {
        RecordSchema { name: name.into(), fields }
    }

    pub fn find(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fully-qualified `table.field` paths for every leaf field, in
    /// declaration order, mirroring `record_type::leaves()`.
    pub fn leaves(&self) -> Vec<QualifiedField> {
        let mut out = Vec::new();
        for field in &self.fields {
            collect_leaves(&self.name, field, &mut out);
        }
        out
    }

    /// Combines two record schemas into a new schema whose field order is
    /// the insertion order of first occurrence across both inputs --
    /// "combined record schema ... union of slice schemas in a stable field
    /// order" (spec.md §3, "Partition").
    pub fn union_stable(schemas: impl IntoIterator<Item = RecordSchema>) -> RecordSchema {
        let mut fields: Vec<Field> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut name = String::new();
        for schema in schemas {
            if name.is_empty() {
                name = schema.name.clone();
            }
            for field in schema.fields {
                if seen.insert(field.name.clone()) {
                    fields.push(field);
                }
            }
        }
        RecordSchema { name, fields }
    }
}

fn collect_leaves(table: &str, field: &Field, out: &mut Vec<QualifiedField>) {
    match &field.ty {
        Type::Record(nested) => {
            for nested_field in &nested.fields {
                collect_leaves(table, nested_field, out);
            }
        }
        _ => out.push(QualifiedField {
            table: table.to_string(),
            name: field.name.clone(),
            ty: field.ty.clone(),
        }),
    }
}

/// A leaf field resolved against the table it belongs to -- the indexer
/// lookup key (`qualified_record_field` in the original).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedField {
    pub table: String,
    pub name: String,
    #[serde(skip, default = "default_qualified_field_type")]
    pub ty: Type,
}

fn default_qualified_field_type() -> Type {
    Type::String
}

impl PartialEq for QualifiedField {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.name == other.name
    }
}

impl Eq for QualifiedField {}

impl std::hash::Hash for QualifiedField {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for QualifiedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}
