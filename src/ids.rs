//! Row ids and the compressed bitmaps of ids used everywhere in the query
//! path.
//!
//! A row id is a 64-bit unsigned integer, monotonic within a deployment.
//! `INVALID_ID` is reserved and must never be handed out as a real id
//! (spec.md §6, "Row-id universe").

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

/// A single event's globally monotonic row id.
pub type Id = u64;

/// Reserved sentinel; sorts last, never a valid row id.
pub const INVALID_ID: Id = u64::MAX;

/// A compressed set of row ids.
///
/// Backed by `roaring::RoaringTreemap`, which natively supports 64-bit keys
/// via an internal partition into 32-bit "containers" -- the same
/// container-of-bitmaps trick the teacher's column encodings use for
/// strings (`IndexedPackedStrings`), just applied to the id space instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIdBitmap(RoaringTreemap);

impl RowIdBitmap {
    pub fn new() -> RowIdBitmap {
        RowIdBitmap(RoaringTreemap::new())
    }

    pub fn from_range(range: std::ops::Range<Id>) -> RowIdBitmap {
        let mut bm = RoaringTreemap::new();
        bm.insert_range(range);
        RowIdBitmap(bm)
    }

    pub fn from_ids(ids: impl IntoIterator<Item = Id>) -> RowIdBitmap {
        RowIdBitmap(ids.into_iter().collect())
    }

    pub fn insert(&mut self, id: Id) -> bool {
        self.0.insert(id)
    }

    pub fn remove(&mut self, id: Id) -> bool {
        self.0.remove(id)
    }

    /// Sets `count` bits of the given value starting at logical offset
    /// `start`. The caller owns the logical length (there's no false-bit
    /// marker to infer it from); `TypeIds` below is the watermark-tracking
    /// wrapper that calls this correctly.
    pub fn append_bits(&mut self, start: u64, value: bool, count: u64) {
        if count == 0 {
            return;
        }
        if value {
            self.0.insert_range(start..start + count);
        }
    }

    /// Population count, i.e. rank. Not a logical length -- a bitmap with
    /// trailing zero bits reports fewer than its true extent. Use
    /// `TypeIds::len` for the watermark.
    pub fn len(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.0.contains(id)
    }

    /// Population count -- `rank` in the spec's vocabulary.
    pub fn rank(&self) -> u64 {
        self.0.len()
    }

    pub fn union(&self, other: &RowIdBitmap) -> RowIdBitmap {
        RowIdBitmap(&self.0 | &other.0)
    }

    pub fn intersection(&self, other: &RowIdBitmap) -> RowIdBitmap {
        RowIdBitmap(&self.0 & &other.0)
    }

    pub fn difference(&self, other: &RowIdBitmap) -> RowIdBitmap {
        RowIdBitmap(&self.0 - &other.0)
    }

    /// Complement within `universe`.
    pub fn complement(&self, universe: &RowIdBitmap) -> RowIdBitmap {
        universe.difference(self)
    }

    pub fn is_subset(&self, other: &RowIdBitmap) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn min(&self) -> Option<Id> {
        self.0.min()
    }

    pub fn max(&self) -> Option<Id> {
        self.0.max()
    }

    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.0.iter()
    }

    pub fn serialized_size(&self) -> usize {
        self.0.serialized_size()
    }

    pub fn serialize_into(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        self.0.serialize_into(&mut w)
    }

    pub fn deserialize_from(r: impl std::io::Read) -> std::io::Result<RowIdBitmap> {
        Ok(RowIdBitmap(RoaringTreemap::deserialize_from(r)?))
    }
}

impl Serialize for RowIdBitmap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut buf).map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&buf)
    }
}

impl<'de> Deserialize<'de> for RowIdBitmap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        RowIdBitmap::deserialize_from(&bytes[..]).map_err(serde::de::Error::custom)
    }
}

impl std::ops::BitOr for &RowIdBitmap {
    type Output = RowIdBitmap;
    fn bitor(self, rhs: &RowIdBitmap) -> RowIdBitmap {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for &RowIdBitmap {
    type Output = RowIdBitmap;
    fn bitand(self, rhs: &RowIdBitmap) -> RowIdBitmap {
        self.intersection(rhs)
    }
}

impl FromIterator<Id> for RowIdBitmap {
    fn from_iter<T: IntoIterator<Item = Id>>(iter: T) -> Self {
        RowIdBitmap::from_ids(iter)
    }
}

/// Per-type row-id membership tracked by the active/passive partition.
///
/// Wraps a `RowIdBitmap` plus the watermark needed to correctly pad with
/// zero bits when a new slice's offset is ahead of the current length
/// (spec.md §4.1 step 2, "Type-ids exhaustiveness" in §8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeIds {
    bitmap: RowIdBitmap,
    len: Id,
}

impl TypeIds {
    pub fn new() -> TypeIds {
        TypeIds::default()
    }

    pub fn len(&self) -> Id {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks each id in `ids` present, advancing the watermark to cover it.
    /// Ids need not be contiguous or sorted -- a slice that has gone
    /// through `TableSlice::select` carries a sparse id set, and this must
    /// mark exactly those ids rather than assuming a padded range.
    pub fn mark_ids(&mut self, ids: impl Iterator<Item = Id>) {
        for id in ids {
            self.bitmap.insert(id);
            self.len = self.len.max(id + 1);
        }
    }

    pub fn bitmap(&self) -> &RowIdBitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> RowIdBitmap {
        self.bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_intersection_difference() {
        let a = RowIdBitmap::from_ids([1, 2, 3, 4]);
        let b = RowIdBitmap::from_ids([3, 4, 5, 6]);
        assert_eq!(a.union(&b), RowIdBitmap::from_ids([1, 2, 3, 4, 5, 6]));
        assert_eq!(a.intersection(&b), RowIdBitmap::from_ids([3, 4]));
        assert_eq!(a.difference(&b), RowIdBitmap::from_ids([1, 2]));
    }

    #[test]
    fn complement_and_subset() {
        let universe = RowIdBitmap::from_range(0..10);
        let xs = RowIdBitmap::from_ids([2, 3, 7]);
        let complement = xs.complement(&universe);
        assert_eq!(complement.rank(), 7);
        assert!(xs.is_subset(&universe));
        assert!(!universe.is_subset(&xs));
    }

    #[test]
    fn type_ids_padding() {
        let mut t = TypeIds::new();
        t.mark_ids(5..8); // watermark advances past the gap 0..5 implicitly
        assert_eq!(t.len(), 8);
        assert_eq!(t.bitmap().rank(), 3);
        assert!(!t.bitmap().contains(0));
        assert!(t.bitmap().contains(5));
        assert!(t.bitmap().contains(7));
    }

    #[test]
    fn type_ids_marks_sparse_ids() {
        let mut t = TypeIds::new();
        t.mark_ids([2, 5, 8].into_iter());
        assert_eq!(t.len(), 9);
        assert_eq!(t.bitmap().rank(), 3);
        assert!(!t.bitmap().contains(3));
        assert!(t.bitmap().contains(5));
    }

    #[test]
    fn rank_equals_count_closure() {
        let bm = RowIdBitmap::from_range(100..150);
        assert_eq!(bm.rank(), 50);
    }
}
