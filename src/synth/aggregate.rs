//! Per-aggregate incremental algebra.
//!
//! Every aggregate call in a cache column maps to an [`AggregateStrategy`]
//! exposing additive (`plus`), subtractive (`minus`), and in-place (`delta`)
//! update forms. Their contract is the correctness foundation of the whole
//! engine: each form must equal "recompute the aggregate over the group with
//! this one row added / removed / replaced". Aggregates without a sound
//! algebraic form return `None` / [`DeltaForm::Recompute`] and the caller
//! falls back to recomputation.

use crate::sql::dsl::{binary, func, not_null, raw};
use crate::sql::{CaseExpr, Element, Expression, FuncCall, Operand};

/// Closed set of aggregate families the engine understands. Anything else
/// (plus DISTINCT/ORDER BY shapes that break commutativity) is `Other` and
/// forces the full-recompute strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    ArrayAgg,
    BoolOr,
    BoolAnd,
    Other,
}

/// Function names PostgreSQL treats as aggregates, as far as cache columns
/// are concerned. Used to tell aggregate calls apart from scalar calls like
/// `coalesce` wrapping them.
const AGGREGATE_NAMES: &[&str] = &[
    "count",
    "sum",
    "min",
    "max",
    "array_agg",
    "bool_or",
    "bool_and",
    "avg",
    "every",
    "string_agg",
    "json_agg",
    "jsonb_agg",
    "json_object_agg",
    "jsonb_object_agg",
    "bit_or",
    "bit_and",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "variance",
    "var_pop",
    "var_samp",
];

pub fn is_aggregate_name(name: &str) -> bool {
    AGGREGATE_NAMES.contains(&name.to_ascii_lowercase().as_str())
}

impl AggregateKind {
    /// Classify a call, or `None` when it is not an aggregate at all.
    pub fn classify(call: &FuncCall) -> Option<AggregateKind> {
        if !is_aggregate_name(&call.name) {
            return None;
        }
        // ORDER BY matters only for order-sensitive aggregates; for the
        // commutative families it is normalized away. An order-sensitive
        // aggregate keeps it and loses its incremental forms.
        if call.order_by.is_some() {
            return Some(AggregateKind::Other);
        }
        let kind = match call.name.to_ascii_lowercase().as_str() {
            "count" => AggregateKind::Count,
            "sum" => AggregateKind::Sum,
            "min" => AggregateKind::Min,
            "max" => AggregateKind::Max,
            "array_agg" => AggregateKind::ArrayAgg,
            "bool_or" => AggregateKind::BoolOr,
            "bool_and" => AggregateKind::BoolAnd,
            _ => AggregateKind::Other,
        };
        // DISTINCT breaks add/remove commutativity for the multiset
        // aggregates. For min/max/bool_* it has no aggregate effect and is
        // dropped.
        if call.distinct {
            return Some(match kind {
                AggregateKind::Min
                | AggregateKind::Max
                | AggregateKind::BoolOr
                | AggregateKind::BoolAnd => kind,
                _ => AggregateKind::Other,
            });
        }
        Some(kind)
    }
}

/// The in-place update form for an UPDATE that keeps the row linked to the
/// same target row.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaForm {
    /// The stored value cannot have changed; emit nothing.
    Unchanged,
    /// Atomic in-place arithmetic against the stored column.
    InPlace(Expression),
    /// No sound algebraic form; recompute the column.
    Recompute,
}

/// Incremental algebra for one aggregate call of one cache column.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStrategy {
    pub kind: AggregateKind,
    pub call: FuncCall,
}

fn coalesce(expr: Expression, default: &str) -> Expression {
    func(FuncCall::new("coalesce", vec![expr, raw(default)]))
}

/// Left-to-right arithmetic chain kept flat, so the rendered SQL carries no
/// grouping parentheses.
fn chain(
    first: Expression,
    op1: &str,
    second: Expression,
    op2: &str,
    third: Expression,
) -> Expression {
    Expression::from_elements(vec![
        Element::Operand(first.into_operand()),
        Element::Op(op1.to_string()),
        Element::Operand(second.into_operand()),
        Element::Op(op2.to_string()),
        Element::Operand(third.into_operand()),
    ])
}

/// `CASE WHEN value IS NOT NULL THEN 1 ELSE 0 END`, a row's contribution
/// to `count(expr)`.
fn count_contribution(value: &Expression) -> Expression {
    Expression::single(Operand::Case(
        CaseExpr::new()
            .when(not_null(value.clone()), raw("1"))
            .otherwise(raw("0")),
    ))
}

impl AggregateStrategy {
    pub fn resolve(call: &FuncCall) -> Option<AggregateStrategy> {
        AggregateKind::classify(call).map(|kind| AggregateStrategy {
            kind,
            call: call.clone(),
        })
    }

    /// The aggregate's argument expression, absent for `count(*)`.
    pub fn argument(&self) -> Option<&Expression> {
        if self.call.star {
            None
        } else {
            self.call.args.first()
        }
    }

    /// Stored value with this row's `value` added, or `None` when addition
    /// has no algebraic form.
    pub fn plus(&self, col: &Expression, value: Option<&Expression>) -> Option<Expression> {
        match (self.kind, value) {
            (AggregateKind::Count, None) => Some(binary(col.clone(), "+", raw("1"))),
            (AggregateKind::Count, Some(v)) => {
                Some(binary(col.clone(), "+", count_contribution(v)))
            }
            (AggregateKind::Sum, Some(v)) => Some(binary(
                coalesce(col.clone(), "0"),
                "+",
                coalesce(v.clone(), "0"),
            )),
            (AggregateKind::Min, Some(v)) => {
                Some(func(FuncCall::new("least", vec![col.clone(), v.clone()])))
            }
            (AggregateKind::Max, Some(v)) => Some(func(FuncCall::new(
                "greatest",
                vec![col.clone(), v.clone()],
            ))),
            (AggregateKind::ArrayAgg, Some(v)) => Some(func(FuncCall::new(
                "array_append",
                vec![coalesce(col.clone(), "'{}'"), v.clone()],
            ))),
            (AggregateKind::BoolOr, Some(v)) => Some(binary(
                coalesce(col.clone(), "false"),
                "OR",
                coalesce(v.clone(), "false"),
            )),
            (AggregateKind::BoolAnd, Some(v)) => Some(binary(
                coalesce(col.clone(), "true"),
                "AND",
                coalesce(v.clone(), "true"),
            )),
            _ => None,
        }
    }

    /// Stored value with this row's `value` removed, or `None` when removal
    /// requires recomputation (extremum and set aggregates).
    pub fn minus(&self, col: &Expression, value: Option<&Expression>) -> Option<Expression> {
        match (self.kind, value) {
            (AggregateKind::Count, None) => Some(binary(col.clone(), "-", raw("1"))),
            (AggregateKind::Count, Some(v)) => {
                Some(binary(col.clone(), "-", count_contribution(v)))
            }
            (AggregateKind::Sum, Some(v)) => Some(binary(
                coalesce(col.clone(), "0"),
                "-",
                coalesce(v.clone(), "0"),
            )),
            (AggregateKind::ArrayAgg, Some(v)) => Some(func(FuncCall::new(
                "array_remove",
                vec![col.clone(), v.clone()],
            ))),
            // Removing a row from min/max/bool_or/bool_and can expose a new
            // extremum only a recompute can find.
            _ => None,
        }
    }

    /// In-place form for a row whose target linkage is unchanged but whose
    /// contribution moved from `old_value` to `new_value`.
    pub fn delta(
        &self,
        col: &Expression,
        old_value: Option<&Expression>,
        new_value: Option<&Expression>,
    ) -> DeltaForm {
        match (self.kind, old_value, new_value) {
            (AggregateKind::Count, None, None) => DeltaForm::Unchanged,
            (AggregateKind::Count, Some(ov), Some(nv)) => DeltaForm::InPlace(chain(
                col.clone(),
                "+",
                count_contribution(nv),
                "-",
                count_contribution(ov),
            )),
            (AggregateKind::Sum, Some(ov), Some(nv)) => DeltaForm::InPlace(chain(
                coalesce(col.clone(), "0"),
                "-",
                coalesce(ov.clone(), "0"),
                "+",
                coalesce(nv.clone(), "0"),
            )),
            _ => DeltaForm::Recompute,
        }
    }

    /// Whether an UPDATE that keeps linkage columns unchanged can never
    /// change this aggregate's stored value.
    pub fn is_delta_immutable(&self) -> bool {
        self.kind == AggregateKind::Count && self.call.star && self.call.filter.is_none()
    }

    /// Per-row "would this even change anything" guard for insert/delete
    /// paths, or `None` when the aggregate always has an effect.
    pub fn effect_guard(&self, value: Option<&Expression>) -> Option<Expression> {
        match (self.kind, value) {
            (AggregateKind::Sum, Some(v)) => Some(binary(
                coalesce(v.clone(), "0"),
                "!=",
                raw("0"),
            )),
            (AggregateKind::Min | AggregateKind::Max, Some(v)) => Some(not_null(v.clone())),
            (AggregateKind::BoolOr | AggregateKind::BoolAnd, Some(v)) => {
                Some(not_null(v.clone()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dsl::col;

    fn strategy(call: FuncCall) -> AggregateStrategy {
        AggregateStrategy::resolve(&call).unwrap()
    }

    #[test]
    fn test_classify_families() {
        assert_eq!(
            AggregateKind::classify(&FuncCall::count_star()),
            Some(AggregateKind::Count)
        );
        assert_eq!(
            AggregateKind::classify(&FuncCall::new("sum", vec![col("o", "amount")])),
            Some(AggregateKind::Sum)
        );
        assert_eq!(
            AggregateKind::classify(&FuncCall::new("avg", vec![col("o", "amount")])),
            Some(AggregateKind::Other)
        );
        assert_eq!(
            AggregateKind::classify(&FuncCall::new("coalesce", vec![col("o", "x")])),
            None
        );
    }

    #[test]
    fn test_classify_ignores_name_case() {
        // Deserialized definitions bypass the lowercasing constructor.
        let mut call = FuncCall::new("sum", vec![col("o", "amount")]);
        call.name = "SUM".into();
        assert_eq!(AggregateKind::classify(&call), Some(AggregateKind::Sum));
    }

    #[test]
    fn test_count_expr_delta_renders_flat() {
        let s = strategy(FuncCall::new("count", vec![col("o", "shipped_at")]));
        let stored = col("c", "shipped_count");
        let ov = col("old", "shipped_at");
        let nv = col("new", "shipped_at");
        match s.delta(&stored, Some(&ov), Some(&nv)) {
            DeltaForm::InPlace(expr) => assert_eq!(
                expr.to_sql(),
                "c.shipped_count \
                 + CASE WHEN new.shipped_at IS NOT NULL THEN 1 ELSE 0 END \
                 - CASE WHEN old.shipped_at IS NOT NULL THEN 1 ELSE 0 END"
            ),
            other => panic!("expected in-place delta, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_breaks_multiset_aggregates_only() {
        let count = FuncCall::new("count", vec![col("o", "x")]).with_distinct();
        assert_eq!(AggregateKind::classify(&count), Some(AggregateKind::Other));
        let max = FuncCall::new("max", vec![col("o", "x")]).with_distinct();
        assert_eq!(AggregateKind::classify(&max), Some(AggregateKind::Max));
    }

    #[test]
    fn test_order_by_forces_other() {
        let agg = FuncCall::new("array_agg", vec![col("o", "x")])
            .with_order_by(col("o", "created_at"));
        assert_eq!(AggregateKind::classify(&agg), Some(AggregateKind::Other));
    }

    #[test]
    fn test_count_star_plus_minus() {
        let s = strategy(FuncCall::count_star());
        let stored = col("clients", "orders_count");
        assert_eq!(
            s.plus(&stored, None).unwrap().to_sql(),
            "clients.orders_count + 1"
        );
        assert_eq!(
            s.minus(&stored, None).unwrap().to_sql(),
            "clients.orders_count - 1"
        );
        assert_eq!(s.delta(&stored, None, None), DeltaForm::Unchanged);
        assert!(s.is_delta_immutable());
    }

    #[test]
    fn test_count_expr_uses_null_contribution() {
        let s = strategy(FuncCall::new("count", vec![col("o", "shipped_at")]));
        let stored = col("c", "shipped_count");
        let v = col("new", "shipped_at");
        assert_eq!(
            s.plus(&stored, Some(&v)).unwrap().to_sql(),
            "c.shipped_count + CASE WHEN new.shipped_at IS NOT NULL THEN 1 ELSE 0 END"
        );
        assert!(!s.is_delta_immutable());
    }

    #[test]
    fn test_sum_null_safe_forms() {
        let s = strategy(FuncCall::new("sum", vec![col("o", "amount")]));
        let stored = col("c", "total");
        let v = col("new", "amount");
        assert_eq!(
            s.plus(&stored, Some(&v)).unwrap().to_sql(),
            "coalesce(c.total, 0) + coalesce(new.amount, 0)"
        );
        let ov = col("old", "amount");
        match s.delta(&stored, Some(&ov), Some(&v)) {
            DeltaForm::InPlace(expr) => assert_eq!(
                expr.to_sql(),
                "coalesce(c.total, 0) - coalesce(old.amount, 0) + coalesce(new.amount, 0)"
            ),
            other => panic!("expected in-place delta, got {other:?}"),
        }
    }

    #[test]
    fn test_extremum_minus_requires_recompute() {
        let s = strategy(FuncCall::new("max", vec![col("o", "amount")]));
        let stored = col("c", "biggest");
        let v = col("old", "amount");
        assert_eq!(
            s.plus(&stored, Some(&col("new", "amount"))).unwrap().to_sql(),
            "greatest(c.biggest, new.amount)"
        );
        assert!(s.minus(&stored, Some(&v)).is_none());
        assert_eq!(
            s.delta(&stored, Some(&v), Some(&col("new", "amount"))),
            DeltaForm::Recompute
        );
    }

    #[test]
    fn test_array_agg_append_remove() {
        let s = strategy(FuncCall::new("array_agg", vec![col("o", "tag")]));
        let stored = col("c", "tags");
        assert_eq!(
            s.plus(&stored, Some(&col("new", "tag"))).unwrap().to_sql(),
            "array_append(coalesce(c.tags, '{}'), new.tag)"
        );
        assert_eq!(
            s.minus(&stored, Some(&col("old", "tag"))).unwrap().to_sql(),
            "array_remove(c.tags, old.tag)"
        );
    }

    #[test]
    fn test_effect_guards() {
        let sum = strategy(FuncCall::new("sum", vec![col("o", "amount")]));
        assert_eq!(
            sum.effect_guard(Some(&col("new", "amount"))).unwrap().to_sql(),
            "coalesce(new.amount, 0) != 0"
        );
        let count = strategy(FuncCall::count_star());
        assert!(count.effect_guard(None).is_none());
        let agg = strategy(FuncCall::new("array_agg", vec![col("o", "tag")]));
        assert!(agg.effect_guard(Some(&col("new", "tag"))).is_none());
    }

    #[test]
    fn test_filtered_count_not_delta_immutable() {
        let call = FuncCall::count_star().with_filter(not_null(col("o", "paid_at")));
        assert!(!strategy(call).is_delta_immutable());
    }
}
