//! Predicate classification for one (cache, source table) pair.
//!
//! The WHERE clause of a cache select is split into OR-branches, each branch
//! into AND-conjuncts, and every conjunct is sorted into one of four bins:
//! target-linkage predicates (they tie a changed source row to a target
//! row), source-only filters, target-only filters (irrelevant inside the
//! trigger), and unrecognized shapes. Unrecognized linkage forces the
//! full-recompute strategy for the table; it never aborts synthesis.

use crate::cache::Cache;
use crate::sql::{BoolOp, Element, Expression, Operand, TableRef};
use std::collections::BTreeSet;

/// Predicate shapes the engine can invert into runtime guards.
const LINKAGE_OPS: &[&str] = &["=", "@>", "<@", "&&", "IN", "= ANY"];

/// One recognized linkage predicate of one OR-branch.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkagePredicate {
    pub expr: Expression,
    /// Source-table columns participating in the linkage.
    pub source_columns: Vec<String>,
    /// `IN` / `= ANY` shapes: any one candidate column being set is enough,
    /// so the not-null guard for this predicate joins with OR, not AND.
    pub any_shape: bool,
}

/// Classified conjuncts of one OR-branch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BranchMeta {
    pub linkage: Vec<LinkagePredicate>,
    pub filters: Vec<Expression>,
    pub cache_filters: Vec<Expression>,
    pub unknown: Vec<Expression>,
}

impl BranchMeta {
    /// The branch's linkage condition, conjoined.
    pub fn linkage_expr(&self) -> Expression {
        Expression::and_all(self.linkage.iter().map(|l| l.expr.clone()))
    }
}

/// Classification result for one (cache, source table) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMeta {
    pub source: TableRef,
    pub target: TableRef,
    pub branches: Vec<BranchMeta>,
}

impl ReferenceMeta {
    pub fn analyze(cache: &Cache, source: &TableRef) -> ReferenceMeta {
        let source_id = source.identifier();
        let target_id = cache.target.identifier();
        let branches = cache
            .select
            .where_expr()
            .split_by(BoolOp::Or)
            .into_iter()
            .map(|branch| classify_branch(&branch, source_id, target_id))
            .collect();
        ReferenceMeta {
            source: source.clone(),
            target: cache.target.clone(),
            branches,
        }
    }

    /// All source columns participating in linkage, deduplicated.
    pub fn linkage_columns(&self) -> BTreeSet<String> {
        self.branches
            .iter()
            .flat_map(|b| &b.linkage)
            .flat_map(|l| l.source_columns.iter().cloned())
            .collect()
    }

    /// All source columns referenced by source-only filters.
    pub fn filter_columns(&self) -> BTreeSet<String> {
        let source_id = self.source.identifier();
        self.branches
            .iter()
            .flat_map(|b| &b.filters)
            .flat_map(|f| f.column_references())
            .filter(|c| c.qualifier == source_id)
            .map(|c| c.column)
            .collect()
    }

    pub fn has_unknown(&self) -> bool {
        self.branches.iter().any(|b| !b.unknown.is_empty())
    }

    /// Whether any branch ties the source table to the target.
    pub fn has_linkage(&self) -> bool {
        self.branches.iter().any(|b| !b.linkage.is_empty())
    }
}

fn classify_branch(branch: &Expression, source_id: &str, target_id: &str) -> BranchMeta {
    let mut meta = BranchMeta::default();
    for conjunct in branch.split_by(BoolOp::And) {
        let tables = conjunct.referenced_tables();
        let touches_source = tables.contains(source_id);
        let touches_target = tables.contains(target_id);
        let touches_foreign = tables
            .iter()
            .any(|t| t != source_id && t != target_id);
        if touches_foreign {
            // A third table in the conjunct means it cannot be evaluated
            // against one changed row without joining; the route planner
            // owns those branches.
            meta.unknown.push(conjunct);
        } else if touches_source && touches_target {
            match recognize_linkage(&conjunct, source_id) {
                Some(link) => meta.linkage.push(link),
                None => meta.unknown.push(conjunct),
            }
        } else if touches_target {
            meta.cache_filters.push(conjunct);
        } else {
            // Source-only, or a constant predicate; both gate whether the
            // row counts.
            meta.filters.push(conjunct);
        }
    }
    meta
}

/// Match `<operand> <op> <operand>` with a linkage operator.
fn recognize_linkage(conjunct: &Expression, source_id: &str) -> Option<LinkagePredicate> {
    let elems = conjunct.elements();
    if elems.len() != 3 {
        return None;
    }
    let (Element::Operand(_), Element::Op(op), Element::Operand(_)) =
        (&elems[0], &elems[1], &elems[2])
    else {
        return None;
    };
    let op = op.to_ascii_uppercase();
    if !LINKAGE_OPS.contains(&op.as_str()) {
        return None;
    }
    // Each side must be a plain column, a column list, or an array-valued
    // column; computed sides (function calls, arithmetic) are not invertible
    // into guards.
    for elem in [&elems[0], &elems[2]] {
        let Element::Operand(operand) = elem else {
            return None;
        };
        if !side_is_simple(operand) {
            return None;
        }
    }
    let source_columns: Vec<String> = conjunct
        .column_references()
        .into_iter()
        .filter(|c| c.qualifier == source_id)
        .map(|c| c.column)
        .collect();
    if source_columns.is_empty() {
        return None;
    }
    Some(LinkagePredicate {
        expr: conjunct.clone(),
        source_columns,
        any_shape: matches!(op.as_str(), "IN" | "= ANY"),
    })
}

fn side_is_simple(operand: &Operand) -> bool {
    match operand {
        Operand::Column(_) | Operand::Raw(_) => true,
        // `(a, b, c)` lists from IN / = ANY.
        Operand::Sub(inner) => inner.elements().iter().all(|elem| match elem {
            Element::Operand(op) => matches!(op, Operand::Column(_) | Operand::Raw(_)),
            Element::Op(op) => op == ",",
        }),
        Operand::Func(_) | Operand::Case(_) => false,
    }
}
