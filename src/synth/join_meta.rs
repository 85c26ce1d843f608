//! Detection of reducible lookup joins.
//!
//! A join is a *lookup* when its ON-clause is exactly one equality between a
//! column of the joined table and a column of the source table, and the
//! joined table contributes only values inside aggregate arguments, never
//! filtering. Such a join is replaced inside the trigger by a scalar
//! variable filled from a single-row SELECT. Anything else is reported as
//! unreducible and forces the full-recompute strategy.

use crate::cache::Cache;
use crate::sql::{Element, Expression, JoinKind, Operand, TableRef};
use crate::synth::aggregate::is_aggregate_name;
use std::collections::BTreeSet;

/// One reducible lookup join of a cache select.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinMeta {
    /// The joined lookup table.
    pub table: TableRef,
    /// Key column on the lookup table.
    pub key_column: String,
    /// Referencing column on the source table.
    pub fk_column: String,
    /// Lookup-table columns the select actually reads.
    pub columns: BTreeSet<String>,
}

impl JoinMeta {
    /// Deterministic trigger-variable name for one fetched column and one
    /// row version (`new` / `old`).
    pub fn variable_name(&self, row: &str, column: &str) -> String {
        let fk = self
            .fk_column
            .strip_prefix("id_")
            .or_else(|| self.fk_column.strip_suffix("_id"))
            .unwrap_or(&self.fk_column);
        format!("{row}_{fk}_{column}")
    }
}

/// Extraction result: reducible joins, plus identifiers of joins that do not
/// fit the lookup shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinAnalysis {
    pub metas: Vec<JoinMeta>,
    pub unreducible: Vec<String>,
}

/// Analyze every join of the cache select against one source table.
pub fn extract(cache: &Cache, source: &TableRef) -> JoinAnalysis {
    let source_id = source.identifier();
    let where_tables = cache.select.where_expr().referenced_tables();
    let joins = cache.select.joins();

    let mut analysis = JoinAnalysis::default();
    for (i, join) in joins.iter().enumerate() {
        let joined_id = join.table.identifier().to_string();
        // A lookup table must contribute values only: it may not appear in
        // WHERE or in another join's ON clause.
        let filters = where_tables.contains(&joined_id)
            || joins.iter().enumerate().any(|(j, other)| {
                i != j && other.on.referenced_tables().contains(&joined_id)
            });
        let meta = if filters {
            None
        } else {
            recognize_lookup(&join.on, &joined_id, source_id).and_then(
                |(key_column, fk_column)| {
                    aggregate_columns_of(cache, &joined_id).map(|columns| JoinMeta {
                        table: join.table.clone(),
                        key_column,
                        fk_column,
                        columns,
                    })
                },
            )
        };
        match meta {
            Some(m) if !m.columns.is_empty() => analysis.metas.push(m),
            // A LEFT lookup nothing reads contributes nothing; an INNER one
            // still drops unmatched rows and cannot be elided.
            Some(_) if join.kind == JoinKind::Left => {}
            _ => analysis.unreducible.push(joined_id),
        }
    }
    analysis
}

/// Match `joined.key = source.fk` (either orientation).
fn recognize_lookup(
    on: &Expression,
    joined_id: &str,
    source_id: &str,
) -> Option<(String, String)> {
    let elems = on.elements();
    if elems.len() != 3 {
        return None;
    }
    let (Element::Operand(Operand::Column(left)), Element::Op(op), Element::Operand(Operand::Column(right))) =
        (&elems[0], &elems[1], &elems[2])
    else {
        return None;
    };
    if op != "=" {
        return None;
    }
    if left.qualifier == joined_id && right.qualifier == source_id {
        Some((left.column.clone(), right.column.clone()))
    } else if right.qualifier == joined_id && left.qualifier == source_id {
        Some((right.column.clone(), left.column.clone()))
    } else {
        None
    }
}

/// Columns of `table_id` read inside aggregate arguments or FILTER clauses
/// of the select columns. `None` when any reference is reachable outside an
/// aggregate call; the join then filters per row and is not a lookup.
fn aggregate_columns_of(cache: &Cache, table_id: &str) -> Option<BTreeSet<String>> {
    let mut inside: BTreeSet<String> = BTreeSet::new();
    for column in &cache.select.columns {
        if has_bare_reference(&column.expr, table_id) {
            return None;
        }
        for call in column.expr.func_calls() {
            if !is_aggregate_name(&call.name) {
                continue;
            }
            for arg in &call.args {
                inside.extend(refs_of(arg, table_id));
            }
            if let Some(filter) = &call.filter {
                inside.extend(refs_of(filter, table_id));
            }
        }
    }
    Some(inside)
}

fn refs_of(expr: &Expression, table_id: &str) -> Vec<String> {
    expr.column_references()
        .into_iter()
        .filter(|c| c.qualifier == table_id)
        .map(|c| c.column)
        .collect()
}

/// A reference to `table_id` reachable without passing through an aggregate
/// call.
fn has_bare_reference(expr: &Expression, table_id: &str) -> bool {
    expr.elements().iter().any(|elem| match elem {
        Element::Op(_) => false,
        Element::Operand(operand) => operand_has_bare_reference(operand, table_id),
    })
}

fn operand_has_bare_reference(operand: &Operand, table_id: &str) -> bool {
    match operand {
        Operand::Column(c) => c.qualifier == table_id,
        Operand::Raw(_) => false,
        Operand::Sub(inner) => has_bare_reference(inner, table_id),
        Operand::Func(call) => {
            !is_aggregate_name(&call.name)
                && call.args.iter().any(|arg| has_bare_reference(arg, table_id))
        }
        Operand::Case(case) => {
            case.arms.iter().any(|arm| {
                has_bare_reference(&arm.when, table_id)
                    || has_bare_reference(&arm.then, table_id)
            }) || case
                .else_arm
                .as_ref()
                .is_some_and(|e| has_bare_reference(e, table_id))
        }
    }
}
