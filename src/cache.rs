//! Cache definitions.
//!
//! A [`Cache`] states, declaratively, that one or more columns on a target
//! table equal an aggregate select over source tables. The synthesis engine
//! turns one cache into one trigger per source table.

use crate::error::PgDenormError;
use crate::sql::{Select, SelectColumn, TableRef};
use serde::{Deserialize, Serialize};

/// A declarative cache definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name; part of every derived function/trigger name.
    pub name: String,
    /// The table whose rows are maintained (the `for` table).
    pub target: TableRef,
    /// The aggregate select. Its implicit grouping key is one target row.
    pub select: Select,
    /// Source table names excluded from trigger generation, e.g. because
    /// they are maintained elsewhere.
    pub without_triggers: Vec<String>,
}

impl Cache {
    pub fn new(name: impl Into<String>, target: TableRef, select: Select) -> Self {
        Cache {
            name: name.into(),
            target,
            select,
            without_triggers: Vec::new(),
        }
    }

    pub fn without_triggers_on(mut self, table: impl Into<String>) -> Self {
        self.without_triggers.push(table.into());
        self
    }

    /// Validate the definition. Shapes the AST cannot even express (CTEs,
    /// UNION, GROUP BY, sub-selects) were already rejected by the parser;
    /// here the alias invariants are enforced.
    pub fn validate(&self) -> Result<(), PgDenormError> {
        self.select.validate()?;
        if self.name.is_empty() {
            return Err(PgDenormError::InvalidDefinition(
                "cache name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The cached columns on the target table.
    pub fn cached_columns(&self) -> &[SelectColumn] {
        &self.select.columns
    }

    /// Whether trigger generation is disabled for the given table name.
    pub fn is_trigger_excluded(&self, table: &TableRef) -> bool {
        self.without_triggers
            .iter()
            .any(|name| name == &table.name || name == table.identifier())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
