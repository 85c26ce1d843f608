//! Condition matrix and minimal-route search.
//!
//! The WHERE clause is expanded into a matrix of OR-branches, cross-producted
//! with every JOIN's ON-clause OR-branches. For each row the planner builds a
//! co-occurrence graph of table identifiers and searches for the shortest
//! path connecting the changed table to the target table; the interior nodes
//! of that path are the tables structurally necessary to evaluate the branch
//! for a single changed row.
//!
//! The all-paths search is exhaustive DFS. That is exponential in branch
//! width by design: join graphs per branch hold a handful of tables, and
//! simple-path enumeration is bounded by the node count.

use crate::cache::Cache;
use crate::error::PgDenormError;
use crate::sql::{BoolOp, Expression, TableRef};
use std::collections::{BTreeMap, BTreeSet};

/// One routed OR-branch: the conjuncts to evaluate and the intermediate
/// tables they need.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRoute {
    pub conjuncts: Vec<Expression>,
    /// Interior tables of the minimal path, excluding source and target.
    pub necessary: Vec<String>,
}

impl BranchRoute {
    pub fn condition(&self) -> Expression {
        Expression::and_all(self.conjuncts.iter().cloned())
    }
}

/// Route analysis for one (cache, source table) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub branches: Vec<BranchRoute>,
    /// Union of every branch's necessary tables.
    pub necessary_tables: BTreeSet<String>,
    /// Some branch could not be routed and keeps all of its conjuncts
    /// conservatively; only the full-recompute strategy is sound then.
    pub degraded: bool,
}

impl RoutePlan {
    /// The combined WHERE condition across branches.
    pub fn where_expr(&self) -> Expression {
        Expression::or_all(self.branches.iter().map(BranchRoute::condition))
    }
}

/// Expand WHERE and JOIN ON clauses into the full branch matrix. Each output
/// row is one AND-conjunct list; the rows jointly cover every way the
/// overall condition can hold.
pub fn conditions_matrix(cache: &Cache) -> Vec<Vec<Expression>> {
    let mut rows: Vec<Vec<Expression>> = cache
        .select
        .where_expr()
        .split_by(BoolOp::Or)
        .into_iter()
        .map(|branch| branch.split_by(BoolOp::And))
        .collect();
    if rows.is_empty() {
        rows.push(Vec::new());
    }
    for join in cache.select.joins() {
        let on_branches: Vec<Vec<Expression>> = join
            .on
            .split_by(BoolOp::Or)
            .into_iter()
            .map(|branch| branch.split_by(BoolOp::And))
            .collect();
        if on_branches.is_empty() {
            continue;
        }
        let mut expanded = Vec::with_capacity(rows.len() * on_branches.len());
        for row in &rows {
            for on_branch in &on_branches {
                let mut combined = row.clone();
                combined.extend(on_branch.iter().cloned());
                expanded.push(combined);
            }
        }
        rows = expanded;
    }
    rows
}

/// Plan routes from `source` to the cache's target table.
///
/// Branches that never mention the source table are dropped (their truth
/// cannot change when a source row changes). If no branch mentions it at
/// all, the table cannot be traced to the target and the recoverable
/// [`PgDenormError::TableNotInSelect`] is returned.
pub fn plan_routes(cache: &Cache, source: &TableRef) -> Result<RoutePlan, PgDenormError> {
    let source_id = source.identifier();
    let target_id = cache.target.identifier();
    let mut branches: Vec<BranchRoute> = Vec::new();
    let mut necessary_tables = BTreeSet::new();
    let mut degraded = false;
    let mut mentions_source = false;

    for row in conditions_matrix(cache) {
        let row_tables: BTreeSet<String> = row
            .iter()
            .flat_map(|c| c.referenced_tables())
            .collect();
        if !row_tables.contains(source_id) {
            continue;
        }
        mentions_source = true;
        let graph = co_occurrence_graph(&row);
        let branch = match find_minimal_route(&graph, source_id, target_id) {
            Some(path) => {
                let keep: BTreeSet<&str> = path.iter().map(String::as_str).collect();
                let conjuncts: Vec<Expression> = row
                    .iter()
                    .filter(|c| {
                        c.referenced_tables()
                            .iter()
                            .all(|t| keep.contains(t.as_str()))
                    })
                    .cloned()
                    .collect();
                let necessary: Vec<String> = path
                    .iter()
                    .filter(|t| *t != source_id && *t != target_id)
                    .cloned()
                    .collect();
                BranchRoute { conjuncts, necessary }
            }
            None => {
                // Unroutable: keep everything the row says, joined over
                // every table it mentions. Degrades to full recompute.
                degraded = true;
                let necessary: Vec<String> = row_tables
                    .iter()
                    .filter(|t| t.as_str() != source_id && t.as_str() != target_id)
                    .cloned()
                    .collect();
                BranchRoute {
                    conjuncts: row.clone(),
                    necessary,
                }
            }
        };
        if branch.conjuncts.is_empty() {
            // Reduced to "true": the branch holds for every row pair and
            // adds nothing.
            continue;
        }
        // Merge structurally equal branches.
        if branches
            .iter()
            .any(|existing| existing.condition() == branch.condition())
        {
            continue;
        }
        necessary_tables.extend(branch.necessary.iter().cloned());
        branches.push(branch);
    }

    if !mentions_source {
        return Err(PgDenormError::TableNotInSelect(source_id.to_string()));
    }
    Ok(RoutePlan {
        branches,
        necessary_tables,
        degraded,
    })
}

type Graph = BTreeMap<String, BTreeSet<String>>;

/// Nodes are table identifiers of the row; an edge joins two tables that
/// co-occur in one conjunct.
fn co_occurrence_graph(row: &[Expression]) -> Graph {
    let mut graph: Graph = BTreeMap::new();
    for conjunct in row {
        let tables: Vec<String> = conjunct.referenced_tables().into_iter().collect();
        for table in &tables {
            graph.entry(table.clone()).or_default();
        }
        for (i, a) in tables.iter().enumerate() {
            for b in &tables[i + 1..] {
                graph.entry(a.clone()).or_default().insert(b.clone());
                graph.entry(b.clone()).or_default().insert(a.clone());
            }
        }
    }
    graph
}

/// Exhaustive DFS over all simple paths from `from` to `to`; returns the
/// shortest, first found winning ties. `from == to` yields the trivial path.
pub fn find_minimal_route(graph: &Graph, from: &str, to: &str) -> Option<Vec<String>> {
    if !graph.contains_key(from) || !graph.contains_key(to) {
        return None;
    }
    let mut best: Option<Vec<String>> = None;
    let mut path = vec![from.to_string()];
    dfs(graph, to, &mut path, &mut best);
    best
}

fn dfs(graph: &Graph, to: &str, path: &mut Vec<String>, best: &mut Option<Vec<String>>) {
    let current = path.last().cloned().unwrap_or_default();
    if current == to {
        if best.as_ref().is_none_or(|b| path.len() < b.len()) {
            *best = Some(path.clone());
        }
        return;
    }
    // Longer prefixes cannot beat the current best.
    if let Some(b) = best {
        if path.len() + 1 >= b.len() {
            return;
        }
    }
    let Some(neighbors) = graph.get(&current) else {
        return;
    };
    for next in neighbors {
        if path.iter().any(|seen| seen == next) {
            continue;
        }
        path.push(next.clone());
        dfs(graph, to, path, best);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dsl::*;
    use crate::sql::{FromItem, JoinKind, Select};

    fn cache(select: Select) -> Cache {
        Cache::new("test_cache", TableRef::new("clients"), select)
    }

    fn direct_cache() -> Cache {
        cache(
            Select::new()
                .column("orders_count", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(eq(col("orders", "client_id"), col("clients", "id"))),
        )
    }

    #[test]
    fn test_direct_route_needs_no_tables() {
        let plan = plan_routes(&direct_cache(), &TableRef::new("orders")).unwrap();
        assert_eq!(plan.branches.len(), 1);
        assert!(plan.branches[0].necessary.is_empty());
        assert!(plan.necessary_tables.is_empty());
        assert!(!plan.degraded);
        assert_eq!(
            plan.where_expr().to_sql(),
            "orders.client_id = clients.id"
        );
    }

    #[test]
    fn test_unrelated_table_is_untraceable() {
        let err = plan_routes(&direct_cache(), &TableRef::new("payments")).unwrap_err();
        assert!(matches!(err, PgDenormError::TableNotInSelect(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_one_hop_route() {
        // orders -> memberships -> clients
        let c = cache(
            Select::new()
                .column("n", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(Expression::and_all([
                    eq(col("orders", "membership_id"), col("memberships", "id")),
                    eq(col("memberships", "client_id"), col("clients", "id")),
                ])),
        );
        let plan = plan_routes(&c, &TableRef::new("orders")).unwrap();
        assert_eq!(plan.branches.len(), 1);
        assert_eq!(plan.branches[0].necessary, vec!["memberships"]);
        assert_eq!(
            plan.necessary_tables.iter().collect::<Vec<_>>(),
            vec!["memberships"]
        );
    }

    #[test]
    fn test_minimal_route_prefers_fewest_intermediates() {
        // Direct edge and a detour through memberships; the direct path wins
        // and the detour conjunct is stripped from the branch.
        let c = cache(
            Select::new()
                .column("n", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(Expression::and_all([
                    eq(col("orders", "client_id"), col("clients", "id")),
                    eq(col("orders", "membership_id"), col("memberships", "id")),
                    eq(col("memberships", "client_id"), col("clients", "id")),
                ])),
        );
        let plan = plan_routes(&c, &TableRef::new("orders")).unwrap();
        assert!(plan.branches[0].necessary.is_empty());
        assert_eq!(
            plan.where_expr().to_sql(),
            "orders.client_id = clients.id"
        );
    }

    #[test]
    fn test_join_on_cross_product() {
        let c = cache(
            Select::new()
                .column("n", count_star())
                .from(FromItem::new(TableRef::new("orders")).join(
                    JoinKind::Inner,
                    TableRef::new("memberships"),
                    Expression::or_all([
                        eq(col("memberships", "id"), col("orders", "membership_id")),
                        eq(col("memberships", "id"), col("orders", "gift_membership_id")),
                    ]),
                ))
                .where_(eq(col("memberships", "client_id"), col("clients", "id"))),
        );
        let matrix = conditions_matrix(&c);
        assert_eq!(matrix.len(), 2);
        let plan = plan_routes(&c, &TableRef::new("orders")).unwrap();
        assert_eq!(plan.branches.len(), 2);
        assert!(plan
            .branches
            .iter()
            .all(|b| b.necessary == vec!["memberships"]));
    }

    #[test]
    fn test_duplicate_branches_merged() {
        let link = eq(col("orders", "client_id"), col("clients", "id"));
        let c = cache(
            Select::new()
                .column("n", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(Expression::or_all([link.clone(), link.clone()])),
        );
        let plan = plan_routes(&c, &TableRef::new("orders")).unwrap();
        assert_eq!(plan.branches.len(), 1);
    }

    #[test]
    fn test_disconnected_branch_degrades() {
        // No conjunct ever connects orders to clients.
        let c = cache(
            Select::new()
                .column("n", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(Expression::and_all([
                    eq(col("orders", "status"), lit_str("paid")),
                    eq(col("clients", "active"), raw("true")),
                ])),
        );
        let plan = plan_routes(&c, &TableRef::new("orders")).unwrap();
        assert!(plan.degraded);
        assert_eq!(plan.branches[0].conjuncts.len(), 2);
    }

    #[test]
    fn test_find_minimal_route_shortest_wins() {
        let mut graph: Graph = BTreeMap::new();
        let edge = |g: &mut Graph, a: &str, b: &str| {
            g.entry(a.into()).or_default().insert(b.into());
            g.entry(b.into()).or_default().insert(a.into());
        };
        edge(&mut graph, "a", "b");
        edge(&mut graph, "b", "c");
        edge(&mut graph, "c", "d");
        edge(&mut graph, "a", "x");
        edge(&mut graph, "x", "d");
        let path = find_minimal_route(&graph, "a", "d").unwrap();
        assert_eq!(path, vec!["a", "x", "d"]);
    }

    #[test]
    fn test_find_minimal_route_missing_node() {
        let graph: Graph = BTreeMap::new();
        assert!(find_minimal_route(&graph, "a", "b").is_none());
    }
}
