//! Table and column reference value types.
//!
//! A [`TableRef`] names a table as it appears in a cache select: schema,
//! name, and optional alias. Expressions refer to tables through their
//! *identifier* (the alias when present, otherwise the bare name) so all
//! matching inside the synthesis engine goes through [`TableRef::identifier`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quote a SQL identifier, but only when it needs quoting.
///
/// Lowercase identifiers matching `[a-z_][a-z0-9_]*` are left bare so the
/// generated trigger bodies stay readable; anything else is double-quoted
/// with embedded quotes doubled.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let simple = match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if simple {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// A reference to a table: schema, name, optional alias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema the table lives in; `None` means the default search path.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
    /// Alias assigned in the FROM/JOIN clause, if any.
    pub alias: Option<String>,
}

impl TableRef {
    /// A table in the default schema, without alias.
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            schema: None,
            name: name.into(),
            alias: None,
        }
    }

    /// A table in an explicit schema.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableRef {
            schema: Some(schema.into()),
            name: name.into(),
            alias: None,
        }
    }

    /// Attach an alias.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The identifier expressions use to qualify this table's columns:
    /// the alias when present, otherwise the bare table name.
    pub fn identifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether a column qualifier refers to this table.
    ///
    /// Matches the alias when one is set; a table joined under an alias is
    /// *only* addressable through that alias, as in SQL proper.
    pub fn matches_qualifier(&self, qualifier: &str) -> bool {
        self.identifier() == qualifier
    }

    /// Whether two refs name the same underlying table, regardless of alias.
    pub fn same_table(&self, other: &TableRef) -> bool {
        self.schema == other.schema && self.name == other.name
    }

    /// A copy with the alias stripped, for DDL statements that address the
    /// table itself rather than a FROM-clause binding.
    pub fn unaliased(&self) -> TableRef {
        TableRef {
            schema: self.schema.clone(),
            name: self.name.clone(),
            alias: None,
        }
    }

    /// `schema.name` (or the bare name) without quoting, for map keys and
    /// log fields.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Render for a FROM/JOIN clause, including the alias.
    pub fn to_sql(&self) -> String {
        let mut out = match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        };
        if let Some(alias) = &self.alias {
            out.push_str(" AS ");
            out.push_str(&quote_ident(alias));
        }
        out
    }

    /// Render without the alias, for DDL statements (`CREATE TRIGGER ... ON`).
    pub fn to_sql_unaliased(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// A qualified column reference: `qualifier.column`.
///
/// The qualifier is a table *identifier* (alias or name) or a trigger row
/// variable (`new` / `old`), whatever the column is bound to in the
/// expression it appears in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub qualifier: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(qualifier: impl Into<String>, column: impl Into<String>) -> Self {
        ColumnRef {
            qualifier: qualifier.into(),
            column: column.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.qualifier),
            quote_ident(&self.column)
        )
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}
