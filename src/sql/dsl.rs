//! Construction helpers for the SQL expression model.
//!
//! This is the surface the excluded cache-definition parser targets, and
//! what the test suites use to build ASTs. Helpers keep construction terse:
//! `eq(col("orders", "client_id"), col("clients", "id"))`.

use crate::sql::expr::{Element, Expression, FuncCall, Operand};
use crate::sql::table::ColumnRef;

/// A single qualified column reference expression.
pub fn col(qualifier: &str, column: &str) -> Expression {
    Expression::single(Operand::Column(ColumnRef::new(qualifier, column)))
}

/// An opaque SQL fragment: numeric literal, keyword, variable name.
pub fn raw(sql: &str) -> Expression {
    Expression::single(Operand::Raw(sql.to_string()))
}

/// A single-quoted string literal, with embedded quotes doubled.
pub fn lit_str(value: &str) -> Expression {
    Expression::single(Operand::Raw(format!("'{}'", value.replace('\'', "''"))))
}

/// A function-call expression.
pub fn func(call: FuncCall) -> Expression {
    Expression::single(Operand::Func(call))
}

/// `count(*)` as an expression.
pub fn count_star() -> Expression {
    func(FuncCall::count_star())
}

/// Generic binary expression `left <op> right`.
pub fn binary(left: Expression, op: &str, right: Expression) -> Expression {
    Expression::from_elements(vec![
        Element::Operand(left.into_operand()),
        Element::Op(op.to_string()),
        Element::Operand(right.into_operand()),
    ])
}

/// `left = right`.
pub fn eq(left: Expression, right: Expression) -> Expression {
    binary(left, "=", right)
}

/// Array containment `left @> right`.
pub fn contains(left: Expression, right: Expression) -> Expression {
    binary(left, "@>", right)
}

/// Array containment `left <@ right`.
pub fn contained_in(left: Expression, right: Expression) -> Expression {
    binary(left, "<@", right)
}

/// Array overlap `left && right`.
pub fn overlaps(left: Expression, right: Expression) -> Expression {
    binary(left, "&&", right)
}

/// `left = ANY (right)`.
pub fn eq_any(left: Expression, right: Expression) -> Expression {
    Expression::from_elements(vec![
        Element::Operand(left.into_operand()),
        Element::Op("= ANY".to_string()),
        Element::Operand(Operand::Sub(right)),
    ])
}

/// `left IN (item, item, ...)`.
pub fn in_list(left: Expression, items: Vec<Expression>) -> Expression {
    let mut list = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            list.push(Element::Op(",".to_string()));
        }
        list.push(Element::Operand(item.into_operand()));
    }
    Expression::from_elements(vec![
        Element::Operand(left.into_operand()),
        Element::Op("IN".to_string()),
        Element::Operand(Operand::Sub(Expression::from_elements(list))),
    ])
}

/// `expr IS NOT NULL`.
pub fn not_null(expr: Expression) -> Expression {
    Expression::from_elements(vec![
        Element::Operand(expr.into_operand()),
        Element::Op("IS NOT NULL".to_string()),
    ])
}

/// `expr IS NULL`.
pub fn is_null(expr: Expression) -> Expression {
    Expression::from_elements(vec![
        Element::Operand(expr.into_operand()),
        Element::Op("IS NULL".to_string()),
    ])
}

/// `left IS NOT DISTINCT FROM right`, null-safe equality.
pub fn not_distinct(left: Expression, right: Expression) -> Expression {
    binary(left, "IS NOT DISTINCT FROM", right)
}

/// `NOT expr` (the operand is parenthesized when compound).
pub fn not(expr: Expression) -> Expression {
    Expression::from_elements(vec![
        Element::Op("NOT".to_string()),
        Element::Operand(expr.into_operand()),
    ])
}

/// `a AND b`.
pub fn and(left: Expression, right: Expression) -> Expression {
    Expression::and_all([left, right])
}

/// `a OR b`.
pub fn or(left: Expression, right: Expression) -> Expression {
    Expression::or_all([left, right])
}
