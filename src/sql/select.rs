//! Cache select model: columns, FROM/JOIN list, WHERE.
//!
//! The model deliberately cannot express CTEs, UNIONs, sub-selects, or
//! GROUP BY: upstream validation rejects those shapes before an AST is
//! ever built, and the synthesis engine relies on their absence. The lone
//! implicit grouping key of a cache select is "one row of the target table".

use crate::error::PgDenormError;
use crate::sql::expr::Expression;
use crate::sql::table::{TableRef, quote_ident};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Join type. Only the shapes the synthesis engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A single JOIN clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expression,
}

/// One FROM entry: a source table plus its ordered joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromItem {
    pub table: TableRef,
    pub joins: Vec<Join>,
}

impl FromItem {
    pub fn new(table: TableRef) -> Self {
        FromItem {
            table,
            joins: Vec::new(),
        }
    }

    pub fn join(mut self, kind: JoinKind, table: TableRef, on: Expression) -> Self {
        self.joins.push(Join { kind, table, on });
        self
    }

    pub fn to_sql(&self) -> String {
        let mut out = self.table.to_sql();
        for join in &self.joins {
            out.push_str(&format!(
                " {} {} ON {}",
                join.kind.as_sql(),
                join.table.to_sql(),
                join.on.to_sql()
            ));
        }
        out
    }
}

/// An output column of a cache select. The alias is the name of the cached
/// column on the target table and is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectColumn {
    pub name: String,
    pub expr: Expression,
}

impl SelectColumn {
    pub fn new(name: impl Into<String>, expr: Expression) -> Self {
        SelectColumn {
            name: name.into(),
            expr,
        }
    }
}

/// The aggregate select of a cache definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    pub columns: Vec<SelectColumn>,
    pub from: Vec<FromItem>,
    pub where_clause: Option<Expression>,
    pub order_by: Option<Expression>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn new() -> Self {
        Select::default()
    }

    pub fn column(mut self, name: &str, expr: Expression) -> Self {
        self.columns.push(SelectColumn::new(name, expr));
        self
    }

    pub fn from(mut self, item: FromItem) -> Self {
        self.from.push(item);
        self
    }

    pub fn where_(mut self, expr: Expression) -> Self {
        self.where_clause = Some(expr);
        self
    }

    /// Enforce the alias invariants the synthesis engine depends on.
    pub fn validate(&self) -> Result<(), PgDenormError> {
        if self.columns.is_empty() {
            return Err(PgDenormError::EmptySelect);
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(PgDenormError::MissingColumnAlias);
            }
            if !seen.insert(column.name.as_str()) {
                return Err(PgDenormError::DuplicateColumnAlias(column.name.clone()));
            }
        }
        if self.from.is_empty() {
            return Err(PgDenormError::InvalidDefinition(
                "cache select has no FROM clause".into(),
            ));
        }
        Ok(())
    }

    /// All table refs in FROM order, joins included.
    pub fn tables(&self) -> Vec<&TableRef> {
        let mut out = Vec::new();
        for item in &self.from {
            out.push(&item.table);
            for join in &item.joins {
                out.push(&join.table);
            }
        }
        out
    }

    /// All joins, flattened across FROM items.
    pub fn joins(&self) -> Vec<&Join> {
        self.from.iter().flat_map(|item| &item.joins).collect()
    }

    /// Find a table by its identifier (alias or name).
    pub fn find_table(&self, identifier: &str) -> Option<&TableRef> {
        self.tables()
            .into_iter()
            .find(|t| t.matches_qualifier(identifier))
    }

    /// The WHERE expression, or an empty expression when absent.
    pub fn where_expr(&self) -> Expression {
        self.where_clause.clone().unwrap_or_default()
    }

    /// Render the FROM list (tables and joins).
    pub fn from_sql(&self) -> String {
        self.from
            .iter()
            .map(FromItem::to_sql)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render as a full SELECT statement with output aliases.
    pub fn to_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} AS {}", c.expr.to_sql(), quote_ident(&c.name)))
            .collect();
        let mut out = format!("SELECT {} FROM {}", cols.join(", "), self.from_sql());
        if let Some(where_clause) = &self.where_clause {
            out.push_str(&format!(" WHERE {}", where_clause.to_sql()));
        }
        if let Some(order_by) = &self.order_by {
            out.push_str(&format!(" ORDER BY {}", order_by.to_sql()));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        out
    }

    /// Render as an unaliased sub-select, for `SET (cols) = (...)` row
    /// assignment in the universal trigger body. The target-table column
    /// references in the WHERE clause stay as written and correlate to the
    /// row being updated.
    pub fn to_subselect_sql(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| c.expr.to_sql()).collect();
        let mut out = format!("SELECT {} FROM {}", cols.join(", "), self.from_sql());
        if let Some(where_clause) = &self.where_clause {
            out.push_str(&format!(" WHERE {}", where_clause.to_sql()));
        }
        out
    }
}
