//! Trigger-body assembly and strategy selection.
//!
//! One decision per (cache, source table): commutative single-table update,
//! commutative update with resolved lookup variables, or the universal
//! full-recompute body. The commutative shapes are the hot paths and only
//! ever issue atomic in-place arithmetic (`col = col + v`), so concurrent
//! events against the same target row serialize on ordinary row locks.

use crate::cache::Cache;
use crate::error::PgDenormError;
use crate::program::{IfStatement, SetList, Statement, TriggerBody, UpdateStatement};
use crate::schema::SchemaProvider;
use crate::sql::dsl::{col, not_distinct, not_null, raw};
use crate::sql::{Expression, TableRef, quote_ident};
use crate::synth::aggregate::{AggregateKind, AggregateStrategy};
use crate::synth::conditions;
use crate::synth::join_meta::{self, JoinMeta};
use crate::synth::reference::ReferenceMeta;
use crate::synth::routes::{self, RoutePlan};
use crate::synth::update::{IncrementalOp, aggregate_calls, build_set_items, rewrite_to_row};
use std::collections::BTreeSet;

/// Code-generation strategy chosen for one (cache, source table) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Strategy {
    /// Algebraic in-place updates against the changed table alone.
    Commutative,
    /// Algebraic updates with lookup-join variables resolved first.
    CommutativeWithLookups,
    /// One full-recompute UPDATE shared by all three operations.
    Universal,
}

/// Assembly result handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPlan {
    pub strategy: Strategy,
    pub body: TriggerBody,
    /// Source columns whose UPDATE can affect the cache, for `UPDATE OF`.
    pub mutable_columns: Vec<String>,
}

/// Build the trigger body for one source table. Returns the recoverable
/// [`PgDenormError::TableNotInSelect`] when the table cannot be traced to
/// the target at all.
pub fn assemble(
    cache: &Cache,
    source: &TableRef,
    schema: &dyn SchemaProvider,
) -> Result<BodyPlan, PgDenormError> {
    let plan = routes::plan_routes(cache, source)?;
    let meta = ReferenceMeta::analyze(cache, source);
    let joins = join_meta::extract(cache, source);
    let mutable_columns = mutable_columns(cache, source, &joins.metas);

    let strategy = choose_strategy(cache, source, &meta, &plan, &joins);
    let body = match strategy {
        Strategy::Universal => universal_body(cache, source, &plan),
        Strategy::Commutative => commutative_body(cache, source, &meta, &[], schema)?,
        Strategy::CommutativeWithLookups => {
            commutative_body(cache, source, &meta, &joins.metas, schema)?
        }
    };
    Ok(BodyPlan {
        strategy,
        body,
        mutable_columns,
    })
}

fn choose_strategy(
    cache: &Cache,
    source: &TableRef,
    meta: &ReferenceMeta,
    plan: &RoutePlan,
    joins: &join_meta::JoinAnalysis,
) -> Strategy {
    if !plan.necessary_tables.is_empty()
        || plan.degraded
        || meta.has_unknown()
        || !joins.unreducible.is_empty()
        || !meta.has_linkage()
        || meta.branches.iter().any(|b| b.linkage.is_empty())
        || has_opaque_aggregates(cache)
        || !args_resolvable(cache, source, &joins.metas)
    {
        tracing::warn!(cache = %cache.name, table = %source.name,
            "falling back to the universal full-recompute trigger");
        return Strategy::Universal;
    }
    if joins.metas.is_empty() {
        Strategy::Commutative
    } else {
        Strategy::CommutativeWithLookups
    }
}

fn has_opaque_aggregates(cache: &Cache) -> bool {
    cache.cached_columns().iter().any(|column| {
        aggregate_calls(&column.expr)
            .iter()
            .any(|call| AggregateKind::classify(call) == Some(AggregateKind::Other))
    })
}

/// Every table referenced inside aggregate arguments and filters must be
/// the source, the target, or a resolved lookup; anything else cannot be
/// rewritten into trigger-row space.
fn args_resolvable(cache: &Cache, source: &TableRef, joins: &[JoinMeta]) -> bool {
    let mut allowed: BTreeSet<String> = BTreeSet::new();
    allowed.insert(source.identifier().to_string());
    allowed.insert(cache.target.identifier().to_string());
    allowed.extend(joins.iter().map(|j| j.table.identifier().to_string()));
    cache.cached_columns().iter().all(|column| {
        column
            .expr
            .referenced_tables()
            .iter()
            .all(|t| allowed.contains(t))
    })
}

/// Source columns whose change can affect the cache: everything the select
/// reads off the source table plus lookup FK columns, minus the immutable
/// primary key.
fn mutable_columns(cache: &Cache, source: &TableRef, joins: &[JoinMeta]) -> Vec<String> {
    let source_id = source.identifier();
    let mut columns: BTreeSet<String> = BTreeSet::new();
    let mut collect = |expr: &Expression| {
        columns.extend(
            expr.column_references()
                .into_iter()
                .filter(|c| c.qualifier == source_id)
                .map(|c| c.column),
        );
    };
    for column in cache.cached_columns() {
        collect(&column.expr);
    }
    collect(&cache.select.where_expr());
    for join in cache.select.joins() {
        collect(&join.on);
    }
    columns.extend(joins.iter().map(|j| j.fk_column.clone()));
    columns.remove("id");
    columns.into_iter().collect()
}

// ── Commutative bodies (strategies A and B) ─────────────────────────

struct Guards<'a> {
    cache: &'a Cache,
    source: &'a TableRef,
    meta: &'a ReferenceMeta,
    joins: &'a [JoinMeta],
}

impl Guards<'_> {
    /// `needUpdate(row)`: the row links to a target row through some branch
    /// whose filters it passes, it can change a stored value, and it matches
    /// at least one aggregate FILTER when all aggregates carry one.
    fn need_update(&self, row: &str) -> Expression {
        let reference = conditions::has_reference(self.meta, self.joins, row);
        let effect = conditions::has_effect(&self.effect_inputs(row));
        let agg_filters =
            conditions::matched_agg_filters(&self.all_calls(), self.source, row).map(|f| {
                self.with_join_variables(f, row)
            });
        Expression::and_all([Some(reference), effect, agg_filters].into_iter().flatten())
    }

    /// The UPDATE's target-row condition: per branch, linkage plus filters,
    /// all rewritten to the row version.
    fn link_where(&self, row: &str) -> Expression {
        Expression::or_all(
            self.meta
                .branches
                .iter()
                .filter(|b| !b.linkage.is_empty())
                .map(|branch| {
                    let parts = std::iter::once(branch.linkage_expr())
                        .chain(branch.filters.iter().cloned())
                        .map(|e| rewrite_to_row(&e, self.source, self.joins, row));
                    Expression::and_all(parts)
                }),
        )
    }

    fn all_calls(&self) -> Vec<crate::sql::FuncCall> {
        self.cache
            .cached_columns()
            .iter()
            .flat_map(|c| aggregate_calls(&c.expr))
            .collect()
    }

    fn effect_inputs(&self, row: &str) -> Vec<(AggregateStrategy, Option<Expression>)> {
        self.all_calls()
            .iter()
            .filter_map(|call| AggregateStrategy::resolve(call))
            .map(|strategy| {
                let value = strategy
                    .argument()
                    .map(|arg| rewrite_to_row(arg, self.source, self.joins, row));
                (strategy, value)
            })
            .collect()
    }

    fn with_join_variables(&self, expr: Expression, row: &str) -> Expression {
        rewrite_to_row(&expr, self.source, self.joins, row)
    }

    fn maintenance_update(&self, op: IncrementalOp, row: &str) -> Option<Statement> {
        let items = build_set_items(self.cache, self.source, self.joins, op);
        if items.is_empty() {
            return None;
        }
        Some(Statement::Update(UpdateStatement {
            table: self.cache.target.clone(),
            set: SetList::Items(items),
            with: None,
            from: None,
            where_clause: self.link_where(row),
        }))
    }
}

fn commutative_body(
    cache: &Cache,
    source: &TableRef,
    meta: &ReferenceMeta,
    joins: &[JoinMeta],
    schema: &dyn SchemaProvider,
) -> Result<TriggerBody, PgDenormError> {
    let guards = Guards {
        cache,
        source,
        meta,
        joins,
    };
    let mut body = TriggerBody::new();
    for join in joins {
        for column in &join.columns {
            let type_name = schema
                .column_type(&join.table.name, column)
                .ok_or_else(|| PgDenormError::UnknownColumn {
                    table: join.table.name.clone(),
                    column: column.clone(),
                })?;
            body.declare(join.variable_name("old", column), type_name.clone());
            body.declare(join.variable_name("new", column), type_name);
        }
    }

    // DELETE
    let mut delete_branch = resolve_lookups(joins, "old");
    if let Some(update) = guards.maintenance_update(IncrementalOp::Minus, "old") {
        delete_branch.push(IfStatement::new(guards.need_update("old"), vec![update]).into());
    }
    delete_branch.push(Statement::Return("old".into()));
    body.push(IfStatement::new(raw("TG_OP = 'DELETE'"), delete_branch));

    // UPDATE
    let mutable = mutable_columns(cache, source, joins);
    let mut update_branch = vec![Statement::If(IfStatement::new(
        conditions::no_changes(source, &mutable, schema),
        vec![Statement::Return("new".into())],
    ))];
    update_branch.extend(resolve_lookups(joins, "old"));
    update_branch.extend(resolve_lookups_reusing_old(joins));
    let mut delta_branch = Vec::new();
    if let Some(update) = guards.maintenance_update(IncrementalOp::Delta, "new") {
        // A row matching no aggregate FILTER before or after the change
        // cannot move any stored value.
        let filter_guard = conditions::matched_agg_filters(&guards.all_calls(), source, "old")
            .zip(conditions::matched_agg_filters(&guards.all_calls(), source, "new"))
            .map(|(old_f, new_f)| {
                Expression::or_all([
                    guards.with_join_variables(old_f, "old"),
                    guards.with_join_variables(new_f, "new"),
                ])
            });
        match filter_guard {
            Some(guard) => {
                delta_branch.push(IfStatement::new(guard, vec![update]).into());
            }
            None => delta_branch.push(update),
        }
    }
    delta_branch.push(Statement::Return("new".into()));
    update_branch.push(
        IfStatement::new(conditions::no_reference_changes(meta, schema), delta_branch).into(),
    );
    if let Some(update) = guards.maintenance_update(IncrementalOp::Minus, "old") {
        update_branch.push(IfStatement::new(guards.need_update("old"), vec![update]).into());
    }
    if let Some(update) = guards.maintenance_update(IncrementalOp::Plus, "new") {
        update_branch.push(IfStatement::new(guards.need_update("new"), vec![update]).into());
    }
    update_branch.push(Statement::Return("new".into()));
    body.push(IfStatement::new(raw("TG_OP = 'UPDATE'"), update_branch));

    // INSERT
    let mut insert_branch = resolve_lookups(joins, "new");
    if let Some(update) = guards.maintenance_update(IncrementalOp::Plus, "new") {
        insert_branch.push(IfStatement::new(guards.need_update("new"), vec![update]).into());
    }
    insert_branch.push(Statement::Return("new".into()));
    body.push(IfStatement::new(raw("TG_OP = 'INSERT'"), insert_branch));

    Ok(body)
}

/// `IF row.fk IS NOT NULL THEN var := (SELECT col FROM t WHERE key = fk); ...`
fn resolve_lookups(joins: &[JoinMeta], row: &str) -> Vec<Statement> {
    joins
        .iter()
        .map(|join| {
            let assigns = join
                .columns
                .iter()
                .map(|column| Statement::Assign {
                    variable: join.variable_name(row, column),
                    value: lookup_select(join, column, row),
                })
                .collect();
            IfStatement::new(not_null(col(row, &join.fk_column)), assigns).into()
        })
        .collect()
}

/// The UPDATE path reuses the old variable when the FK did not change.
fn resolve_lookups_reusing_old(joins: &[JoinMeta]) -> Vec<Statement> {
    joins
        .iter()
        .map(|join| {
            let reuse = join
                .columns
                .iter()
                .map(|column| Statement::Assign {
                    variable: join.variable_name("new", column),
                    value: raw(&join.variable_name("old", column)),
                })
                .collect();
            let requery = join
                .columns
                .iter()
                .map(|column| Statement::Assign {
                    variable: join.variable_name("new", column),
                    value: lookup_select(join, column, "new"),
                })
                .collect();
            IfStatement::new(
                not_distinct(col("new", &join.fk_column), col("old", &join.fk_column)),
                reuse,
            )
            .with_else(vec![
                IfStatement::new(not_null(col("new", &join.fk_column)), requery).into(),
            ])
            .into()
        })
        .collect()
}

fn lookup_select(join: &JoinMeta, column: &str, row: &str) -> Expression {
    let table = join.table.to_sql_unaliased();
    raw(&format!(
        "(SELECT {table}.{} FROM {table} WHERE {table}.{} = {row}.{})",
        quote_ident(column),
        quote_ident(&join.key_column),
        quote_ident(&join.fk_column)
    ))
}

// ── Universal body (strategy C) ─────────────────────────────────────

/// One code path serves all three operations: the changed row's old and new
/// versions feed a `changed_rows` CTE, and a single `UPDATE ... FROM`
/// recomputes every cached column of every possibly-affected target row.
fn universal_body(cache: &Cache, source: &TableRef, plan: &RoutePlan) -> TriggerBody {
    let source_id = source.identifier();
    let mut body = TriggerBody::new();
    let row_type = format!("{}%ROWTYPE", source.to_sql_unaliased());
    body.declare("old_row", row_type.clone());
    body.declare("new_row", row_type.clone());
    body.declare("return_row", row_type);

    // Fixed row-binding lines, not expressions; they go in verbatim.
    let bind = |op: &str, old: &str, new: &str, ret: &str| {
        IfStatement::new(
            raw(&format!("TG_OP = '{op}'")),
            vec![
                Statement::HardCode(format!("old_row := {old};")),
                Statement::HardCode(format!("new_row := {new};")),
                Statement::HardCode(format!("return_row := {ret};")),
            ],
        )
    };
    body.push(bind("INSERT", "new", "new", "new"));
    body.push(bind("UPDATE", "old", "new", "new"));
    body.push(bind("DELETE", "old", "old", "old"));

    let where_expr = plan.where_expr();
    let cte_columns: BTreeSet<String> = where_expr
        .column_references()
        .into_iter()
        .filter(|c| c.qualifier == source_id)
        .map(|c| c.column)
        .collect();

    let (with, from, where_clause) = if cte_columns.is_empty() {
        // Nothing ties targets to the changed row; every target row is
        // affected and recomputed.
        (None, None, Expression::empty())
    } else {
        let project = |row: &str| {
            let cols: Vec<String> = cte_columns
                .iter()
                .map(|c| format!("{row}.{}", quote_ident(c)))
                .collect();
            format!("SELECT {}", cols.join(", "))
        };
        let aliases: Vec<String> = cte_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let cte = format!(
            "SELECT {} FROM ({} UNION {}) AS changed ({})",
            aliases.join(", "),
            project("old_row"),
            project("new_row"),
            aliases.join(", ")
        );
        let mut from_parts = vec!["changed_rows".to_string()];
        for necessary in &plan.necessary_tables {
            match cache.select.find_table(necessary) {
                Some(table) => from_parts.push(table.to_sql()),
                None => from_parts.push(quote_ident(necessary)),
            }
        }
        (
            Some(("changed_rows".to_string(), cte)),
            Some(from_parts.join(", ")),
            where_expr.replace_qualifier(source_id, "changed_rows"),
        )
    };

    body.push(Statement::Update(UpdateStatement {
        table: cache.target.clone(),
        set: SetList::Row {
            columns: cache
                .cached_columns()
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            subselect: cache.select.to_subselect_sql(),
        },
        with,
        from,
        where_clause,
    }));
    body.push(Statement::Return("return_row".into()));
    body
}
