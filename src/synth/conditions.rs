//! Runtime guard construction.
//!
//! These guards decide, inside the generated trigger, whether a maintenance
//! UPDATE has to run at all: does the row link to any target row, can it
//! change the stored value, does it pass the select's filters, and did an
//! UPDATE actually touch anything relevant.

use crate::schema::SchemaProvider;
use crate::sql::dsl::{col, is_null, not_distinct, not_null};
use crate::sql::{Expression, FuncCall, TableRef};
use crate::synth::aggregate::{AggregateKind, AggregateStrategy};
use crate::synth::join_meta::JoinMeta;
use crate::synth::reference::ReferenceMeta;
use crate::synth::update::rewrite_to_row;

/// Whether a row version can link to any target row through some branch
/// whose filters it passes: per branch, a not-null tree mirroring the
/// linkage shape, ANDed with the branch's row-rewritten source filters.
/// `IN` / `= ANY` predicates need only one candidate column set, so their
/// per-predicate checks join with OR.
pub fn has_reference(meta: &ReferenceMeta, joins: &[JoinMeta], row: &str) -> Expression {
    let branches = meta.branches.iter().filter(|b| !b.linkage.is_empty()).map(|branch| {
        let not_nulls = branch.linkage.iter().map(|link| {
            let checks = link
                .source_columns
                .iter()
                .map(|column| not_null(col(row, column)));
            if link.any_shape {
                Expression::or_all(checks)
            } else {
                Expression::and_all(checks)
            }
        });
        let filters = branch
            .filters
            .iter()
            .map(|filter| rewrite_to_row(filter, &meta.source, joins, row));
        Expression::and_all(not_nulls.chain(filters))
    });
    Expression::or_all(branches)
}

/// Whether applying the row can change any stored value at all, or `None`
/// when no guard is sound. `count` always has an effect and `array_agg`
/// is always safe to re-apply, so any of them present disables the guard
/// for the whole column set.
pub fn has_effect(
    strategies: &[(AggregateStrategy, Option<Expression>)],
) -> Option<Expression> {
    if strategies.iter().any(|(s, _)| {
        matches!(s.kind, AggregateKind::Count | AggregateKind::ArrayAgg)
    }) {
        return None;
    }
    let mut guards = Vec::new();
    for (strategy, value) in strategies {
        guards.push(strategy.effect_guard(value.as_ref())?);
    }
    if guards.is_empty() {
        None
    } else {
        Some(Expression::or_all(guards))
    }
}

/// When every aggregate carries a FILTER, a row matching none of them
/// cannot matter; OR the row-rewritten filter expressions. `None` when any
/// aggregate is unfiltered.
pub fn matched_agg_filters(
    calls: &[FuncCall],
    source: &TableRef,
    row: &str,
) -> Option<Expression> {
    if calls.is_empty() || calls.iter().any(|call| call.filter.is_none()) {
        return None;
    }
    let filters = calls
        .iter()
        .filter_map(|call| call.filter.as_ref())
        .map(|filter| filter.replace_table(source, row));
    Some(Expression::or_all(filters))
}

/// `new` and `old` agree on every listed column. Array-typed columns (per
/// the schema collaborator) use containment-both-ways instead of the scalar
/// operator, which ignores element order.
pub fn no_changes<I>(source: &TableRef, columns: I, schema: &dyn SchemaProvider) -> Expression
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let checks = columns.into_iter().map(|column| {
        let column = column.as_ref();
        if schema.is_array_column(&source.name, column) {
            array_unchanged(column)
        } else {
            not_distinct(col("new", column), col("old", column))
        }
    });
    Expression::and_all(checks)
}

fn array_unchanged(column: &str) -> Expression {
    let both_null = Expression::and_all([
        is_null(col("new", column)),
        is_null(col("old", column)),
    ]);
    let same_elements = Expression::and_all([
        crate::sql::dsl::contains(col("new", column), col("old", column)),
        crate::sql::dsl::contained_in(col("new", column), col("old", column)),
    ]);
    Expression::or_all([both_null, same_elements])
}

/// `no_changes` restricted to the columns that decide which target row the
/// source row belongs to: linkage columns plus filter columns. When it
/// holds, the cheaper in-place delta path applies.
pub fn no_reference_changes(meta: &ReferenceMeta, schema: &dyn SchemaProvider) -> Expression {
    let mut columns = meta.linkage_columns();
    columns.extend(meta.filter_columns());
    no_changes(&meta.source, columns, schema)
}
