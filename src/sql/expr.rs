//! SQL expression trees and the structural algebra over them.
//!
//! An [`Expression`] is an ordered sequence of operands and operator tokens,
//! close to how the excluded text parser tokenizes a condition. All algebra
//! operations are pure: they return new trees and never mutate in place.
//! Substitution matches by *structural* identity (value equality of the
//! table/column key), never by pointer identity, so it is independent of how
//! many structurally-equal copies of a sub-expression exist.
//!
//! Equality between expressions compares *canonical* forms: redundant
//! parenthesization is eagerly stripped ("extruded") and operator keywords
//! are case-folded, so `(a.x = 1)` equals `a.x = 1`. This is what the route
//! planner relies on to merge duplicate OR-branches.

use crate::sql::table::{ColumnRef, TableRef, quote_ident};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Top-level boolean connective used by [`Expression::split_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
        }
    }
}

/// A value-position element of an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A qualified column reference.
    Column(ColumnRef),
    /// An opaque SQL fragment: a literal, a variable name, or pre-rendered SQL.
    Raw(String),
    /// A function call (aggregate or scalar).
    Func(FuncCall),
    /// A parenthesized sub-expression.
    Sub(Expression),
    /// A CASE WHEN expression.
    Case(CaseExpr),
}

/// One element of the flat expression sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Operand(Operand),
    /// An operator token: `=`, `AND`, `@>`, `IN`, `,`, ...
    Op(String),
}

/// A function call: name, arguments, optional FILTER clause, DISTINCT flag,
/// optional ORDER BY (significant only for order-sensitive aggregates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: String,
    /// `count(*)` and friends.
    pub star: bool,
    pub args: Vec<Expression>,
    pub distinct: bool,
    pub filter: Option<Expression>,
    pub order_by: Option<Expression>,
}

impl FuncCall {
    pub fn new(name: impl Into<String>, args: Vec<Expression>) -> Self {
        FuncCall {
            name: name.into().to_ascii_lowercase(),
            star: false,
            args,
            distinct: false,
            filter: None,
            order_by: None,
        }
    }

    /// `count(*)`.
    pub fn count_star() -> Self {
        let mut call = FuncCall::new("count", Vec::new());
        call.star = true;
        call
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_order_by(mut self, order_by: Expression) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut inner = String::new();
        if self.star {
            inner.push('*');
        } else {
            if self.distinct {
                inner.push_str("DISTINCT ");
            }
            let args: Vec<String> = self.args.iter().map(Expression::to_sql).collect();
            inner.push_str(&args.join(", "));
        }
        if let Some(order) = &self.order_by {
            inner.push_str(" ORDER BY ");
            inner.push_str(&order.to_sql());
        }
        let mut out = format!("{}({inner})", self.name);
        if let Some(filter) = &self.filter {
            out.push_str(&format!(" FILTER (WHERE {})", filter.to_sql()));
        }
        out
    }
}

/// A `CASE WHEN ... THEN ... [ELSE ...] END` expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseExpr {
    pub arms: Vec<CaseArm>,
    pub else_arm: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseArm {
    pub when: Expression,
    pub then: Expression,
}

impl CaseExpr {
    pub fn new() -> Self {
        CaseExpr::default()
    }

    pub fn when(mut self, when: Expression, then: Expression) -> Self {
        self.arms.push(CaseArm { when, then });
        self
    }

    pub fn otherwise(mut self, else_arm: Expression) -> Self {
        self.else_arm = Some(else_arm);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::from("CASE");
        for arm in &self.arms {
            out.push_str(&format!(
                " WHEN {} THEN {}",
                arm.when.to_sql(),
                arm.then.to_sql()
            ));
        }
        if let Some(else_arm) = &self.else_arm {
            out.push_str(&format!(" ELSE {}", else_arm.to_sql()));
        }
        out.push_str(" END");
        out
    }
}

/// An ordered operand/operator sequence. See the module docs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expression {
    elems: Vec<Element>,
}

impl Expression {
    pub fn empty() -> Self {
        Expression::default()
    }

    /// Build from raw elements, eagerly extruding a redundant outer
    /// parenthesization (`(expr)` becomes `expr`).
    pub fn from_elements(elems: Vec<Element>) -> Self {
        let mut expr = Expression { elems };
        while expr.elems.len() == 1 {
            match expr.elems.pop() {
                Some(Element::Operand(Operand::Sub(inner))) => expr = inner,
                Some(other) => {
                    expr.elems.push(other);
                    break;
                }
                None => break,
            }
        }
        expr
    }

    /// A single-operand expression.
    pub fn single(operand: Operand) -> Self {
        Expression::from_elements(vec![Element::Operand(operand)])
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elems
    }

    /// Wrap into an operand: multi-element expressions become parenthesized
    /// sub-expressions, single operands are inlined.
    pub fn into_operand(self) -> Operand {
        if self.elems.len() == 1 {
            if let Element::Operand(op) = &self.elems[0] {
                return op.clone();
            }
        }
        Operand::Sub(self)
    }

    // ── Boolean structure ───────────────────────────────────────────

    /// Decompose into the flat list of top-level conjuncts/disjuncts.
    ///
    /// Splits only at the first operator level; an `OR` inside parentheses
    /// is *not* a split point. An expression without the connective yields
    /// itself as the single part; an empty expression yields no parts.
    pub fn split_by(&self, op: BoolOp) -> Vec<Expression> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut parts = Vec::new();
        let mut current: Vec<Element> = Vec::new();
        for elem in &self.elems {
            match elem {
                Element::Op(token) if token.eq_ignore_ascii_case(op.as_str()) => {
                    parts.push(Expression::from_elements(std::mem::take(&mut current)));
                }
                other => current.push(other.clone()),
            }
        }
        parts.push(Expression::from_elements(current));
        parts
    }

    /// Conjoin parts with AND; empty parts are dropped.
    pub fn and_all<I: IntoIterator<Item = Expression>>(parts: I) -> Expression {
        Self::join_bool(parts, BoolOp::And)
    }

    /// Disjoin parts with OR; empty parts are dropped.
    pub fn or_all<I: IntoIterator<Item = Expression>>(parts: I) -> Expression {
        Self::join_bool(parts, BoolOp::Or)
    }

    fn join_bool<I: IntoIterator<Item = Expression>>(parts: I, op: BoolOp) -> Expression {
        let parts: Vec<Expression> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        match parts.len() {
            0 => Expression::empty(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => {
                let mut elems = Vec::new();
                for (i, part) in parts.into_iter().enumerate() {
                    if i > 0 {
                        elems.push(Element::Op(op.as_str().to_string()));
                    }
                    // Parts carrying their own top-level connective are
                    // parenthesized to keep precedence; plain comparisons
                    // splice in flat so the result splits back cleanly.
                    if part.has_top_level_connective() {
                        elems.push(Element::Operand(Operand::Sub(part)));
                    } else {
                        elems.extend(part.elems);
                    }
                }
                Expression { elems }
            }
        }
    }

    fn has_top_level_connective(&self) -> bool {
        self.elems.iter().any(|elem| {
            matches!(elem, Element::Op(op)
                if op.eq_ignore_ascii_case("AND") || op.eq_ignore_ascii_case("OR"))
        })
    }

    // ── Substitution (pure tree rewrites) ───────────────────────────

    /// Substitute every column bound to `from` with one bound to the
    /// identifier `to`. Used to project a condition written against an
    /// aliased select into `new.` / `old.` trigger-variable space.
    pub fn replace_table(&self, from: &TableRef, to: &str) -> Expression {
        self.replace_qualifier(from.identifier(), to)
    }

    /// Substitute every column qualifier `from` with `to`.
    pub fn replace_qualifier(&self, from: &str, to: &str) -> Expression {
        self.rewrite(&|operand| match operand {
            Operand::Column(col) if col.qualifier == from => Some(Operand::Column(
                ColumnRef::new(to, col.column.clone()),
            )),
            _ => None,
        })
    }

    /// Substitute a specific qualified column with a scalar variable name.
    pub fn replace_column(&self, column: &ColumnRef, variable: &str) -> Expression {
        self.rewrite(&|operand| match operand {
            Operand::Column(col) if col == column => Some(Operand::Raw(variable.to_string())),
            _ => None,
        })
    }

    /// Substitute a specific function call (matched structurally) with a
    /// pre-rendered SQL fragment.
    pub fn replace_func_call(&self, call: &FuncCall, sql: &str) -> Expression {
        self.rewrite(&|operand| match operand {
            Operand::Func(found) if found == call => Some(Operand::Raw(sql.to_string())),
            _ => None,
        })
    }

    fn rewrite(&self, subst: &dyn Fn(&Operand) -> Option<Operand>) -> Expression {
        let elems = self
            .elems
            .iter()
            .map(|elem| match elem {
                Element::Op(op) => Element::Op(op.clone()),
                Element::Operand(operand) => Element::Operand(rewrite_operand(operand, subst)),
            })
            .collect();
        Expression { elems }
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Every column reference in the tree, in syntactic order, including
    /// those inside function arguments, FILTER clauses, and CASE arms.
    pub fn column_references(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.visit_operands(&mut |operand| {
            if let Operand::Column(col) = operand {
                out.push(col.clone());
            }
        });
        out
    }

    /// The set of table identifiers (column qualifiers) referenced anywhere.
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        self.column_references()
            .into_iter()
            .map(|col| col.qualifier)
            .collect()
    }

    /// Every function call in the tree, outermost first.
    pub fn func_calls(&self) -> Vec<FuncCall> {
        let mut out = Vec::new();
        self.visit_operands(&mut |operand| {
            if let Operand::Func(call) = operand {
                out.push(call.clone());
            }
        });
        out
    }

    fn visit_operands(&self, visit: &mut dyn FnMut(&Operand)) {
        for elem in &self.elems {
            if let Element::Operand(operand) = elem {
                visit(operand);
                match operand {
                    Operand::Sub(inner) => inner.visit_operands(visit),
                    Operand::Func(call) => {
                        for arg in &call.args {
                            arg.visit_operands(visit);
                        }
                        if let Some(filter) = &call.filter {
                            filter.visit_operands(visit);
                        }
                        if let Some(order) = &call.order_by {
                            order.visit_operands(visit);
                        }
                    }
                    Operand::Case(case) => {
                        for arm in &case.arms {
                            arm.when.visit_operands(visit);
                            arm.then.visit_operands(visit);
                        }
                        if let Some(else_arm) = &case.else_arm {
                            else_arm.visit_operands(visit);
                        }
                    }
                    Operand::Column(_) | Operand::Raw(_) => {}
                }
            }
        }
    }

    // ── Canonicalization & rendering ────────────────────────────────

    /// Canonical form: redundant parentheses extruded at every level,
    /// operator keywords upper-cased, function names lower-cased.
    pub fn canonical(&self) -> Expression {
        let elems: Vec<Element> = self
            .elems
            .iter()
            .map(|elem| match elem {
                Element::Op(op) => Element::Op(op.to_ascii_uppercase()),
                Element::Operand(operand) => Element::Operand(canonical_operand(operand)),
            })
            .collect();
        Expression::from_elements(elems)
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for elem in &self.elems {
            let piece = match elem {
                Element::Op(op) => op.clone(),
                Element::Operand(operand) => operand_sql(operand),
            };
            if piece == "," {
                out.push(',');
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&piece);
        }
        out
    }
}

fn operand_sql(operand: &Operand) -> String {
    match operand {
        Operand::Column(col) => col.to_sql(),
        Operand::Raw(sql) => sql.clone(),
        Operand::Func(call) => call.to_sql(),
        Operand::Sub(inner) => format!("({})", inner.to_sql()),
        Operand::Case(case) => case.to_sql(),
    }
}

fn rewrite_operand(
    operand: &Operand,
    subst: &dyn Fn(&Operand) -> Option<Operand>,
) -> Operand {
    if let Some(replacement) = subst(operand) {
        return replacement;
    }
    match operand {
        Operand::Column(_) | Operand::Raw(_) => operand.clone(),
        Operand::Sub(inner) => Operand::Sub(inner.rewrite(subst)),
        Operand::Func(call) => Operand::Func(FuncCall {
            name: call.name.clone(),
            star: call.star,
            args: call.args.iter().map(|a| a.rewrite(subst)).collect(),
            distinct: call.distinct,
            filter: call.filter.as_ref().map(|f| f.rewrite(subst)),
            order_by: call.order_by.as_ref().map(|o| o.rewrite(subst)),
        }),
        Operand::Case(case) => Operand::Case(CaseExpr {
            arms: case
                .arms
                .iter()
                .map(|arm| CaseArm {
                    when: arm.when.rewrite(subst),
                    then: arm.then.rewrite(subst),
                })
                .collect(),
            else_arm: case.else_arm.as_ref().map(|e| e.rewrite(subst)),
        }),
    }
}

fn canonical_operand(operand: &Operand) -> Operand {
    match operand {
        Operand::Column(_) | Operand::Raw(_) => operand.clone(),
        Operand::Sub(inner) => {
            let canon = inner.canonical();
            if canon.elems.len() == 1 {
                if let Element::Operand(op) = &canon.elems[0] {
                    return op.clone();
                }
            }
            Operand::Sub(canon)
        }
        Operand::Func(call) => Operand::Func(FuncCall {
            name: call.name.to_ascii_lowercase(),
            star: call.star,
            args: call.args.iter().map(Expression::canonical).collect(),
            distinct: call.distinct,
            filter: call.filter.as_ref().map(|f| f.canonical()),
            order_by: call.order_by.as_ref().map(|o| o.canonical()),
        }),
        Operand::Case(case) => Operand::Case(CaseExpr {
            arms: case
                .arms
                .iter()
                .map(|arm| CaseArm {
                    when: arm.when.canonical(),
                    then: arm.then.canonical(),
                })
                .collect(),
            else_arm: case.else_arm.as_ref().map(|e| e.canonical()),
        }),
    }
}

/// Structural equality on canonical forms, so parenthesization is ignored.
impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.canonical().elems == other.canonical().elems
    }
}

impl Eq for Expression {}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}
