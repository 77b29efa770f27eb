//! Evaluation and tailoring of expressions against a concrete schema.

use crate::error::{Error, Result};
use crate::ids::RowIdBitmap;
use crate::indexer::ValueIndex;
use crate::schema::{QualifiedField, RecordSchema};
use crate::synopsis::{PartitionSynopsis, Verdict};

use super::{Expression, MetaKey, Predicate};

/// Resolves field references in `expr` against `schema`, dropping
/// predicates whose field doesn't exist in this schema (they can never
/// match, so they contribute nothing rather than an error), and pruning
/// meta-predicates the catalog has already fully resolved.
///
/// Mirrors `tailor` in spec.md §4.3 step 2 / §4.4 handle-lookup.
pub fn tailor(expr: &Expression, schema: &RecordSchema, prune_meta: bool) -> Expression {
    match expr {
        Expression::Predicate(Predicate::Field { field, .. }) => {
            if schema.find(field).is_some() {
                expr.clone()
            } else {
                Expression::empty()
            }
        }
        Expression::Predicate(Predicate::Meta { .. }) => {
            if prune_meta {
                Expression::empty()
            } else {
                expr.clone()
            }
        }
        Expression::Conjunction(parts) => {
            Expression::Conjunction(parts.iter().map(|p| tailor(p, schema, prune_meta)).collect())
        }
        Expression::Disjunction(parts) => {
            Expression::Disjunction(parts.iter().map(|p| tailor(p, schema, prune_meta)).collect())
        }
        Expression::Negation(inner) => Expression::Negation(Box::new(tailor(inner, schema, prune_meta))),
    }
}

/// Strips meta-predicates (`#import_time`, `#offset`, ...) the catalog has
/// already fully resolved, leaving every field predicate untouched.
///
/// Unlike `tailor`, this has no schema to prune fields against -- the
/// catalog resolves a query against partitions with many different
/// schemas at once, so a field predicate can only be judged once it
/// reaches a specific partition's own `tailor` call. Reusing `tailor`'s
/// field-pruning branch here with an empty stand-in schema would (and
/// once did) turn every field predicate into "always true".
pub fn prune_meta(expr: &Expression) -> Expression {
    match expr {
        Expression::Predicate(Predicate::Meta { .. }) => Expression::empty(),
        Expression::Predicate(Predicate::Field { .. }) => expr.clone(),
        Expression::Conjunction(parts) => Expression::Conjunction(parts.iter().map(prune_meta).collect()),
        Expression::Disjunction(parts) => Expression::Disjunction(parts.iter().map(prune_meta).collect()),
        Expression::Negation(inner) => Expression::Negation(Box::new(prune_meta(inner))),
    }
}

/// Evaluates a tailored expression against a table's indexers, producing
/// the matching row-id bitmap (spec.md §4.9).
///
/// `table` is the leaf field's table name used to build the
/// `QualifiedField` lookup key; `universe` is `partition.ids`, used as the
/// complement base for negation.
pub fn evaluate(
    expr: &Expression,
    table: &str,
    indexers: &std::collections::HashMap<QualifiedField, ValueIndex>,
    universe: &RowIdBitmap,
) -> Result<RowIdBitmap> {
    match expr {
        Expression::Predicate(Predicate::Field { field, op, value }) => {
            let key = QualifiedField { table: table.to_string(), name: field.clone(), ty: crate::schema::Type::Bool };
            match indexers.get(&key) {
                Some(index) => Ok(index.lookup(*op, value)),
                None => Ok(RowIdBitmap::new()),
            }
        }
        Expression::Predicate(Predicate::Meta { .. }) => {
            Err(Error::InvalidQuery("meta-predicate reached intra-partition evaluator unresolved".to_string()))
        }
        Expression::Conjunction(parts) => {
            let mut acc = universe.clone();
            for part in parts {
                let hits = evaluate(part, table, indexers, universe)?;
                acc = acc.intersection(&hits);
                if acc.is_empty() {
                    break;
                }
            }
            Ok(acc)
        }
        Expression::Disjunction(parts) => {
            let mut acc = RowIdBitmap::new();
            for part in parts {
                acc = acc.union(&evaluate(part, table, indexers, universe)?);
            }
            Ok(acc)
        }
        Expression::Negation(inner) => {
            let hits = evaluate(inner, table, indexers, universe)?;
            Ok(hits.complement(universe))
        }
    }
}

/// Evaluates a meta-predicate against partition-wide metadata, used
/// wherever `evaluate` would otherwise reject it (the query path always
/// prunes meta-predicates before reaching the indexer evaluator; the
/// catalog resolves them directly instead, see `resolve_against_synopsis`).
fn meta_satisfied(key: MetaKey, op: crate::value::RelOp, value: &crate::value::Value, synopsis: &PartitionSynopsis) -> bool {
    use crate::value::RelOp;
    let bound = match key {
        MetaKey::ImportTime => (synopsis.min_import_time, synopsis.max_import_time),
        MetaKey::Offset => (Some(synopsis.offset as i64), Some(synopsis.offset as i64)),
    };
    let Some(target) = value.as_int() else { return true };
    let (Some(min), Some(max)) = bound else { return false };
    match op {
        RelOp::Equal => target >= min && target <= max,
        RelOp::NotEqual => true,
        RelOp::Less => min < target,
        RelOp::LessEqual => min <= target,
        RelOp::Greater => max > target,
        RelOp::GreaterEqual => max >= target,
        _ => true,
    }
}

/// Catalog-level resolution: can this partition's synopsis be ruled out
/// entirely for `expr`? Returns `DefinitelyNo` only if some leaf predicate
/// is provably unsatisfiable; otherwise `MaybeYes` (spec.md §4.5).
pub fn resolve_against_synopsis(expr: &Expression, table: &str, synopsis: &PartitionSynopsis) -> Verdict {
    match expr {
        Expression::Predicate(Predicate::Field { field, op, value }) => {
            let key = QualifiedField {
                table: table.to_string(),
                name: field.clone(),
                ty: crate::schema::Type::Bool,
            };
            synopsis.lookup(&key, *op, value)
        }
        Expression::Predicate(Predicate::Meta { key, op, value }) => {
            if meta_satisfied(*key, *op, value, synopsis) {
                Verdict::MaybeYes
            } else {
                Verdict::DefinitelyNo
            }
        }
        Expression::Conjunction(parts) => {
            if parts.iter().any(|p| resolve_against_synopsis(p, table, synopsis) == Verdict::DefinitelyNo) {
                Verdict::DefinitelyNo
            } else {
                Verdict::MaybeYes
            }
        }
        Expression::Disjunction(parts) => {
            if parts.is_empty()
                || parts.iter().all(|p| resolve_against_synopsis(p, table, synopsis) == Verdict::DefinitelyNo)
            {
                Verdict::DefinitelyNo
            } else {
                Verdict::MaybeYes
            }
        }
        // A negation can't be proven `DefinitelyNo` from a no-false-negative
        // synopsis without also proving the inner expression always true,
        // which synopses don't support; always keep the partition.
        Expression::Negation(_) => Verdict::MaybeYes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Type};
    use crate::value::{RelOp, Value};

    #[test]
    fn tailor_drops_unknown_fields() {
        let schema = RecordSchema::new("conn", vec![Field::new("proto", Type::String)]);
        let expr = Expression::and([
            Expression::field("proto", RelOp::Equal, Value::String("tcp".into())),
            Expression::field("missing", RelOp::Equal, Value::Count(1)),
        ]);
        let tailored = tailor(&expr, &schema, true);
        match tailored {
            Expression::Conjunction(parts) => {
                assert!(matches!(parts[0], Expression::Predicate(_)));
                assert!(parts[1].is_empty());
            }
            _ => panic!("expected conjunction"),
        }
    }

    #[test]
    fn prune_meta_leaves_field_predicates_untouched() {
        let expr = Expression::and([
            Expression::field("proto", RelOp::Equal, Value::String("tcp".into())),
            Expression::meta(MetaKey::ImportTime, RelOp::GreaterEqual, Value::Count(0)),
        ]);
        let pruned = prune_meta(&expr);
        match pruned {
            Expression::Conjunction(parts) => {
                assert!(matches!(parts[0], Expression::Predicate(Predicate::Field { .. })));
                assert!(parts[1].is_empty());
            }
            _ => panic!("expected conjunction"),
        }
    }

    #[test]
    fn evaluate_conjunction_short_circuits_to_empty() {
        let mut indexers = std::collections::HashMap::new();
        let key = QualifiedField { table: "conn".into(), name: "proto".into(), ty: Type::String };
        let mut idx = ValueIndex::for_type(&Type::String);
        idx.append(crate::indexer::from_offset(0, vec![Value::String("tcp".into())].into_iter()));
        indexers.insert(key, idx);

        let universe = RowIdBitmap::from_range(0..1);
        let expr = Expression::and([
            Expression::field("proto", RelOp::Equal, Value::String("tcp".into())),
            Expression::field("proto", RelOp::Equal, Value::String("udp".into())),
        ]);
        let hits = evaluate(&expr, "conn", &indexers, &universe).unwrap();
        assert!(hits.is_empty());
    }
}
