//! The catalog: an in-memory map of partition synopses used to prune the
//! candidate set before touching any partition data (spec.md §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::expr::eval::resolve_against_synopsis;
use crate::expr::Expression;
use crate::synopsis::{PartitionSynopsis, Verdict};

/// Shared, copy-on-write handle to a partition's synopsis. The catalog
/// hands out clones of this `Arc`; a partition that later mutates its own
/// in-memory synopsis does so on its own owned copy, never through this
/// shared one (spec.md §3, "Ownership").
pub type SharedSynopsis = Arc<PartitionSynopsis>;

#[derive(Default)]
pub struct Catalog {
    entries: HashMap<Uuid, (String, SharedSynopsis)>,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog::default()
    }

    /// Publishes (or replaces) a partition's synopsis under its id and the
    /// table name it belongs to.
    pub fn publish(&mut self, id: Uuid, table: impl Into<String>, synopsis: PartitionSynopsis) {
        self.entries.insert(id, (table.into(), Arc::new(synopsis)));
    }

    pub fn remove(&mut self, id: Uuid) -> Option<SharedSynopsis> {
        self.entries.remove(&id).map(|(_, s)| s)
    }

    pub fn get(&self, id: Uuid) -> Option<SharedSynopsis> {
        self.entries.get(&id).map(|(_, s)| s.clone())
    }

    pub fn table(&self, id: Uuid) -> Option<String> {
        self.entries.get(&id).map(|(table, _)| table.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries.keys().copied()
    }

    /// Returns the candidate partition ids for `expr` and the expression
    /// with already-resolved meta-predicates pruned, per §4.5.
    pub fn resolve(&self, expr: &Expression) -> (Vec<Uuid>, Expression) {
        let mut candidates = Vec::new();
        for (id, (table, synopsis)) in &self.entries {
            if resolve_against_synopsis(expr, table, synopsis) != Verdict::DefinitelyNo {
                candidates.push(*id);
            }
        }
        let tailored = crate::expr::eval::prune_meta(expr);
        (candidates, tailored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{QualifiedField, Type};
    use crate::value::{RelOp, Value};

    #[test]
    fn resolve_prunes_definitely_no_partitions() {
        let mut catalog = Catalog::new();

        let mut low = PartitionSynopsis::new();
        let field = QualifiedField { table: "conn".into(), name: "port".into(), ty: Type::Count };
        low.column_mut(field.clone(), || crate::synopsis::ColumnSynopsis::new_min_max())
            .add(&Value::Count(80));
        let low_id = Uuid::new_v4();
        catalog.publish(low_id, "conn", low);

        let mut high = PartitionSynopsis::new();
        high.column_mut(field.clone(), || crate::synopsis::ColumnSynopsis::new_min_max())
            .add(&Value::Count(443));
        catalog.publish(Uuid::new_v4(), "conn", high);

        // port < 100: the high-only partition (min=max=443) is provably
        // unsatisfiable and gets pruned; the low partition survives.
        let expr = Expression::field("port", RelOp::Less, Value::Count(100));
        let (candidates, _) = catalog.resolve(&expr);
        assert_eq!(candidates, vec![low_id]);
    }

    #[test]
    fn resolve_keeps_field_predicates_in_tailored_expression() {
        let catalog = Catalog::new();
        let expr = Expression::field("proto", RelOp::Equal, Value::String("tcp".into()));
        let (_, tailored) = catalog.resolve(&expr);
        assert_eq!(tailored, expr);
    }
}
