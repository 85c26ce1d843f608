//! SET-clause construction for the maintenance UPDATE.
//!
//! Each cached column either gets an algebraic in-place form from the
//! aggregate algebra, or falls back to a correlated single-column recompute
//! sub-select. FILTER-qualified aggregates are wrapped in CASE arms keyed on
//! whether the row matches the filter before and after the change.

use crate::cache::Cache;
use crate::program::SetItem;
use crate::sql::dsl::{col, not, raw};
use crate::sql::{CaseExpr, Expression, FuncCall, Operand, SelectColumn, TableRef};
use crate::synth::aggregate::{AggregateKind, AggregateStrategy, DeltaForm};
use crate::synth::join_meta::JoinMeta;

/// The three incremental operations a trigger body issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOp {
    /// Row enters the group (INSERT, or UPDATE's new version).
    Plus,
    /// Row leaves the group (DELETE, or UPDATE's old version).
    Minus,
    /// Row stays in the group with a changed contribution.
    Delta,
}

/// All aggregate calls of a column expression.
pub fn aggregate_calls(expr: &Expression) -> Vec<FuncCall> {
    expr.func_calls()
        .into_iter()
        .filter(|call| AggregateKind::classify(call).is_some())
        .collect()
}

/// Rewrite a select-space expression into trigger-row space: lookup-join
/// columns become their declared variables, source columns become
/// `new.` / `old.` references.
pub fn rewrite_to_row(
    expr: &Expression,
    source: &TableRef,
    joins: &[JoinMeta],
    row: &str,
) -> Expression {
    let mut out = expr.clone();
    for join in joins {
        for column in &join.columns {
            let reference =
                crate::sql::ColumnRef::new(join.table.identifier(), column.clone());
            out = out.replace_column(&reference, &join.variable_name(row, column));
        }
    }
    out.replace_table(source, row)
}

/// Correlated single-column recompute: the original select reduced to this
/// column, with target-table references left in place so the sub-select
/// correlates to the row being updated.
pub fn recompute_expr(cache: &Cache, column: &SelectColumn) -> Expression {
    let mut sql = format!(
        "(SELECT {} FROM {}",
        column.expr.to_sql(),
        cache.select.from_sql()
    );
    if let Some(where_clause) = &cache.select.where_clause {
        sql.push_str(&format!(" WHERE {}", where_clause.to_sql()));
    }
    sql.push(')');
    raw(&sql)
}

/// Build the SET items for one incremental operation. An empty result means
/// the operation cannot change any stored value and no UPDATE is needed.
pub fn build_set_items(
    cache: &Cache,
    source: &TableRef,
    joins: &[JoinMeta],
    op: IncrementalOp,
) -> Vec<SetItem> {
    let target_id = cache.target.identifier();
    let mut items = Vec::new();
    for column in cache.cached_columns() {
        let stored = col(target_id, &column.name);
        match incremental_form(cache, source, joins, column, &stored, op) {
            ColumnForm::Skip => {}
            ColumnForm::InPlace(expr) => items.push(SetItem::new(&column.name, expr)),
            ColumnForm::Recompute => {
                items.push(SetItem::new(&column.name, recompute_expr(cache, column)));
            }
        }
    }
    items
}

enum ColumnForm {
    Skip,
    InPlace(Expression),
    Recompute,
}

fn incremental_form(
    cache: &Cache,
    source: &TableRef,
    joins: &[JoinMeta],
    column: &SelectColumn,
    stored: &Expression,
    op: IncrementalOp,
) -> ColumnForm {
    // The algebra applies only to a column that is exactly one aggregate
    // call. Compound columns (`sum(a) + count(*)`) would double-count the
    // stored value under substitution; they recompute.
    let calls = aggregate_calls(&column.expr);
    let single = match column.expr.elements() {
        [crate::sql::Element::Operand(Operand::Func(f))]
            if calls.len() == 1 && f == &calls[0] =>
        {
            &calls[0]
        }
        _ => return ColumnForm::Recompute,
    };
    let Some(strategy) = AggregateStrategy::resolve(single) else {
        return ColumnForm::Recompute;
    };
    if strategy.kind == AggregateKind::Other {
        return ColumnForm::Recompute;
    }
    let value = |row: &str| {
        strategy
            .argument()
            .map(|arg| rewrite_to_row(arg, source, joins, row))
    };
    let filter = single
        .filter
        .as_ref()
        .map(|f| (rewrite_to_row(f, source, joins, "old"), rewrite_to_row(f, source, joins, "new")));

    match op {
        IncrementalOp::Plus => {
            let Some(form) = strategy.plus(stored, value("new").as_ref()) else {
                return ColumnForm::Recompute;
            };
            ColumnForm::InPlace(guard_with_filter(form, stored, filter.map(|f| f.1)))
        }
        IncrementalOp::Minus => {
            let Some(form) = strategy.minus(stored, value("old").as_ref()) else {
                return ColumnForm::Recompute;
            };
            ColumnForm::InPlace(guard_with_filter(form, stored, filter.map(|f| f.0)))
        }
        IncrementalOp::Delta => {
            if strategy.is_delta_immutable() {
                return ColumnForm::Skip;
            }
            delta_form(&strategy, stored, &value("old"), &value("new"), filter)
        }
    }
}

/// `CASE WHEN <row matches filter> THEN <form> ELSE <stored> END`.
fn guard_with_filter(
    form: Expression,
    stored: &Expression,
    filter: Option<Expression>,
) -> Expression {
    match filter {
        None => form,
        Some(filter) => Expression::single(Operand::Case(
            CaseExpr::new().when(filter, form).otherwise(stored.clone()),
        )),
    }
}

fn delta_form(
    strategy: &AggregateStrategy,
    stored: &Expression,
    old_value: &Option<Expression>,
    new_value: &Option<Expression>,
    filter: Option<(Expression, Expression)>,
) -> ColumnForm {
    let delta = strategy.delta(stored, old_value.as_ref(), new_value.as_ref());
    let Some((old_filter, new_filter)) = filter else {
        return match delta {
            DeltaForm::Unchanged => ColumnForm::Skip,
            DeltaForm::InPlace(expr) => ColumnForm::InPlace(expr),
            DeltaForm::Recompute => ColumnForm::Recompute,
        };
    };
    // Filtered delta: the row may be entering the group (filter newly
    // matches), leaving it, or staying with a changed value.
    let Some(plus) = strategy.plus(stored, new_value.as_ref()) else {
        return ColumnForm::Recompute;
    };
    let Some(minus) = strategy.minus(stored, old_value.as_ref()) else {
        return ColumnForm::Recompute;
    };
    let both = match delta {
        DeltaForm::Unchanged => stored.clone(),
        DeltaForm::InPlace(expr) => expr,
        DeltaForm::Recompute => return ColumnForm::Recompute,
    };
    let case = CaseExpr::new()
        .when(
            Expression::and_all([new_filter.clone(), not(old_filter.clone())]),
            plus,
        )
        .when(
            Expression::and_all([old_filter.clone(), not(new_filter.clone())]),
            minus,
        )
        .when(Expression::and_all([old_filter, new_filter]), both)
        .otherwise(stored.clone());
    ColumnForm::InPlace(Expression::single(Operand::Case(case)))
}
