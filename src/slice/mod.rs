//! Table slices: immutable columnar batches of events.
//!
//! Grounded on the teacher's `Batch`/columnar abstractions in
//! `src/mem_store` and on `examples/original_source/libvast/vast/table_slice.hpp`
//! for the `(schema, rows, offset, import_time, encoding)` shape.

use std::sync::Arc;

use crate::ids::{Id, RowIdBitmap};
use crate::schema::RecordSchema;
use crate::value::Value;

/// How a slice's columns are physically laid out. Both forms expose the
/// same `at`/`rows`/`columns` contract; only the builder differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One contiguous `Vec<Value>` per column -- cheap random column access.
    Columnar,
    /// One `Vec<Value>` per row -- cheap append, used while a batch is still
    /// being assembled from a row-oriented wire format.
    Row,
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Columnar(Vec<Vec<Value>>),
    Row(Vec<Vec<Value>>),
}

/// The row ids a slice's rows actually carry, in slice-local row order.
///
/// A freshly-ingested slice is always a contiguous `Range` (spec.md §4.1
/// hands out monotonic offsets); a slice that has survived a `select`
/// restriction may no longer be contiguous, and `Sparse` carries the true
/// per-row id so `id_at`/`ids` stay correct regardless.
#[derive(Debug, Clone, PartialEq)]
enum RowIds {
    Range { offset: Id, rows: u64 },
    Sparse(Vec<Id>),
}

impl RowIds {
    fn len(&self) -> u64 {
        match self {
            RowIds::Range { rows, .. } => *rows,
            RowIds::Sparse(ids) => ids.len() as u64,
        }
    }

    fn first(&self) -> Option<Id> {
        match self {
            RowIds::Range { offset, rows } if *rows > 0 => Some(*offset),
            RowIds::Range { .. } => None,
            RowIds::Sparse(ids) => ids.first().copied(),
        }
    }

    fn id_at(&self, row: usize) -> Id {
        match self {
            RowIds::Range { offset, .. } => offset + row as u64,
            RowIds::Sparse(ids) => ids[row],
        }
    }

    fn to_bitmap(&self) -> RowIdBitmap {
        match self {
            RowIds::Range { offset, rows } => RowIdBitmap::from_range(*offset..*offset + *rows),
            RowIds::Sparse(ids) => RowIdBitmap::from_ids(ids.iter().copied()),
        }
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Id> + '_> {
        match self {
            RowIds::Range { offset, rows } => Box::new(*offset..*offset + *rows),
            RowIds::Sparse(ids) => Box::new(ids.iter().copied()),
        }
    }
}

/// True iff `ids` is sorted ascending with no gaps -- a `select`ed id set
/// that happens to still be a contiguous range can keep the cheap `Range`
/// representation instead of paying for a `Sparse` vector.
fn is_contiguous(ids: &[Id]) -> bool {
    ids.windows(2).all(|w| w[1] == w[0] + 1)
}

/// An immutable, reference-counted columnar batch.
///
/// Cloning a `TableSlice` is cheap (`Arc` bump); the data itself is shared
/// between however many readers currently hold a handle to it.
#[derive(Debug, Clone)]
pub struct TableSlice(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    schema: RecordSchema,
    row_ids: RowIds,
    import_time: i64,
    encoding: Encoding,
    storage: Storage,
}

impl TableSlice {
    pub fn schema(&self) -> &RecordSchema {
        &self.0.schema
    }

    /// First row id in this slice, if non-empty.
    pub fn offset(&self) -> Id {
        self.0.row_ids.first().unwrap_or(0)
    }

    pub fn rows(&self) -> u64 {
        self.0.row_ids.len()
    }

    pub fn columns(&self) -> usize {
        self.0.schema.fields.len()
    }

    pub fn import_time(&self) -> i64 {
        self.0.import_time
    }

    pub fn encoding(&self) -> Encoding {
        self.0.encoding
    }

    /// The row id of the row at local position `row`.
    pub fn id_at(&self, row: usize) -> Id {
        self.0.row_ids.id_at(row)
    }

    /// The row ids this slice actually carries, as a bitmap. Unlike a
    /// half-open range, this is correct even after a non-contiguous
    /// `select`.
    pub fn ids(&self) -> RowIdBitmap {
        self.0.row_ids.to_bitmap()
    }

    pub fn at(&self, row: usize, col: usize) -> &Value {
        match &self.0.storage {
            Storage::Columnar(cols) => &cols[col][row],
            Storage::Row(rows) => &rows[row][col],
        }
    }

    pub fn column(&self, col: usize) -> Box<dyn Iterator<Item = &Value> + '_> {
        match &self.0.storage {
            Storage::Columnar(cols) => Box::new(cols[col].iter()),
            Storage::Row(rows) => Box::new(rows.iter().map(move |r| &r[col])),
        }
    }

    /// Restricts this slice to the rows whose ids are in `ids`, carrying
    /// forward the true retained id of each kept row rather than inferring
    /// one from a recomputed offset/count (spec.md §4.2/§4.3, `select(slice,
    /// ids)`). If the surviving ids happen to still be contiguous the
    /// cheaper `Range` representation is kept; otherwise the slice becomes
    /// `Sparse`.
    ///
    /// Returns `None` if the intersection is empty.
    pub fn select(&self, ids: &RowIdBitmap) -> Option<TableSlice> {
        let mut kept_rows: Vec<usize> = Vec::new();
        let mut kept_ids: Vec<Id> = Vec::new();
        for row in 0..self.rows() as usize {
            let id = self.id_at(row);
            if ids.contains(id) {
                kept_rows.push(row);
                kept_ids.push(id);
            }
        }
        if kept_rows.is_empty() {
            return None;
        }
        let builder_cols: Vec<Vec<Value>> = (0..self.columns())
            .map(|c| kept_rows.iter().map(|&r| self.at(r, c).clone()).collect())
            .collect();
        let row_ids = if is_contiguous(&kept_ids) {
            RowIds::Range { offset: kept_ids[0], rows: kept_ids.len() as u64 }
        } else {
            RowIds::Sparse(kept_ids)
        };
        Some(TableSlice(Arc::new(Inner {
            schema: self.0.schema.clone(),
            row_ids,
            import_time: self.0.import_time,
            encoding: Encoding::Columnar,
            storage: Storage::Columnar(builder_cols),
        })))
    }

    /// Reconstitutes a slice from wire data that already carries explicit
    /// per-row ids (the segment wire format), preserving them exactly
    /// rather than renumbering from a base offset.
    pub fn from_rows_with_ids(schema: RecordSchema, ids: Vec<Id>, import_time: i64, rows: Vec<Vec<Value>>) -> TableSlice {
        debug_assert_eq!(ids.len(), rows.len());
        let row_ids = if is_contiguous(&ids) && !ids.is_empty() {
            RowIds::Range { offset: ids[0], rows: ids.len() as u64 }
        } else {
            RowIds::Sparse(ids)
        };
        TableSlice(Arc::new(Inner {
            schema,
            row_ids,
            import_time,
            encoding: Encoding::Row,
            storage: Storage::Row(rows),
        }))
    }
}

/// Single-writer accumulator that yields a `TableSlice` on `finish()`.
pub struct TableSliceBuilder {
    schema: RecordSchema,
    offset: Id,
    import_time: i64,
    rows: Vec<Vec<Value>>,
}

impl TableSliceBuilder {
    pub fn new(schema: RecordSchema, offset: Id, import_time: i64) -> TableSliceBuilder {
        TableSliceBuilder { schema, offset, import_time, rows: Vec::new() }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> &mut Self {
        debug_assert_eq!(row.len(), self.schema.fields.len());
        self.rows.push(row);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn finish(self) -> TableSlice {
        let rows = self.rows.len() as u64;
        TableSlice(Arc::new(Inner {
            schema: self.schema,
            row_ids: RowIds::Range { offset: self.offset, rows },
            import_time: self.import_time,
            encoding: Encoding::Row,
            storage: Storage::Row(self.rows),
        }))
    }
}
