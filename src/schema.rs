//! Schema lookup collaborator.
//!
//! The synthesis engine needs the live database schema for exactly two
//! things: deciding scalar-vs-array equality semantics in change guards, and
//! typing the lookup variables declared for denormalized joins. Everything
//! else is derived from the cache AST.
//!
//! [`StaticSchema`] is an in-memory implementation for tests and for callers
//! that run without a connection; production callers wrap their own catalog
//! cache in the [`SchemaProvider`] trait.

use std::collections::BTreeMap;

/// A column of a known table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// SQL type name as declared, e.g. `bigint`, `text`, `integer[]`.
    pub type_name: String,
    pub is_array: bool,
}

/// A known table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Read-only schema lookup, keyed by bare table name.
pub trait SchemaProvider {
    fn table(&self, name: &str) -> Option<TableInfo>;

    /// Whether `table.column` is array-typed. Unknown tables and columns
    /// default to scalar.
    fn is_array_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .and_then(|t| t.column(column).map(|c| c.is_array))
            .unwrap_or(false)
    }

    /// The declared type of `table.column`, if known.
    fn column_type(&self, table: &str, column: &str) -> Option<String> {
        self.table(table)
            .and_then(|t| t.column(column).map(|c| c.type_name.clone()))
    }
}

/// In-memory [`SchemaProvider`] built from `(column, type)` pairs.
///
/// A type name ending in `[]` marks the column as array-typed.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    tables: BTreeMap<String, TableInfo>,
}

impl StaticSchema {
    pub fn new() -> Self {
        StaticSchema::default()
    }

    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        let columns = columns
            .iter()
            .map(|(col, ty)| {
                let is_array = ty.ends_with("[]");
                ColumnInfo {
                    name: (*col).to_string(),
                    type_name: (*ty).to_string(),
                    is_array,
                }
            })
            .collect();
        self.tables.insert(name.to_string(), TableInfo { columns });
        self
    }
}

impl SchemaProvider for StaticSchema {
    fn table(&self, name: &str) -> Option<TableInfo> {
        self.tables.get(name).cloned()
    }
}
