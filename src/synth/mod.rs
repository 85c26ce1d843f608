//! The trigger-synthesis engine.
//!
//! `synthesize` takes one validated [`Cache`] and derives, for every source
//! table of its select, a PL/pgSQL trigger function plus the trigger
//! definition that wires it up. Synthesis is pure and deterministic: the
//! same cache AST always yields byte-identical output, which is what lets
//! the external migration engine diff generated DDL textually.

pub mod aggregate;
pub mod body;
pub mod conditions;
pub mod join_meta;
pub mod reference;
pub mod routes;
pub mod update;

pub use body::{BodyPlan, Strategy};

use crate::cache::Cache;
use crate::error::PgDenormError;
use crate::naming;
use crate::program::render::render_function;
use crate::schema::SchemaProvider;
use crate::sql::{TableRef, quote_ident};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One event class a generated trigger fires on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    Delete,
    Update,
    /// `UPDATE OF <columns>`, firing only when a listed column changes.
    UpdateOf(Vec<String>),
}

impl TriggerEvent {
    pub fn to_sql(&self) -> String {
        match self {
            TriggerEvent::Insert => "INSERT".to_string(),
            TriggerEvent::Delete => "DELETE".to_string(),
            TriggerEvent::Update => "UPDATE".to_string(),
            TriggerEvent::UpdateOf(columns) => {
                let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                format!("UPDATE OF {}", cols.join(", "))
            }
        }
    }
}

/// Structured trigger metadata handed to the migration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub name: String,
    pub table: TableRef,
    pub events: Vec<TriggerEvent>,
    /// Name of the trigger function it calls.
    pub function: String,
}

impl TriggerDefinition {
    pub fn to_sql(&self) -> String {
        let events: Vec<String> = self.events.iter().map(TriggerEvent::to_sql).collect();
        format!(
            "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW EXECUTE FUNCTION {}();",
            quote_ident(&self.name),
            events.join(" OR "),
            self.table.to_sql_unaliased(),
            quote_ident(&self.function)
        )
    }
}

/// Everything synthesized for one (cache, source table) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerArtifact {
    pub strategy: Strategy,
    pub function_name: String,
    /// Rendered `CREATE OR REPLACE FUNCTION` source.
    pub function_sql: String,
    pub trigger: TriggerDefinition,
}

impl TriggerArtifact {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Synthesize all triggers for one cache, keyed by the schema-qualified
/// source table name.
///
/// Tables that cannot be traced to the target are skipped, not failed;
/// unsupported query shapes abort the whole cache.
pub fn synthesize(
    cache: &Cache,
    schema: &dyn SchemaProvider,
) -> Result<BTreeMap<String, TriggerArtifact>, PgDenormError> {
    cache.validate()?;
    let mut artifacts = BTreeMap::new();
    let mut seen = Vec::new();
    for source in cache.select.tables() {
        if seen.iter().any(|s: &TableRef| s.same_table(source)) {
            debug!(cache = %cache.name, table = %source.name,
                "duplicate source table reference, first one wins");
            continue;
        }
        seen.push(source.clone());
        if cache.is_trigger_excluded(source) {
            debug!(cache = %cache.name, table = %source.name, "trigger generation excluded");
            continue;
        }
        let plan = match body::assemble(cache, source, schema) {
            Ok(plan) => plan,
            Err(err) if err.is_recoverable() => {
                debug!(cache = %cache.name, table = %source.name, %err,
                    "table not traceable to target, skipping");
                continue;
            }
            Err(err) => return Err(err),
        };
        let function_name =
            naming::function_name(&cache.name, &cache.target.name, &source.name);
        let trigger_name = naming::trigger_name(&cache.name, &cache.target.name, &source.name);
        debug!(cache = %cache.name, table = %source.name,
            strategy = ?plan.strategy, function = %function_name, "synthesized trigger");
        let mut events = vec![TriggerEvent::Insert, TriggerEvent::Delete];
        if plan.mutable_columns.is_empty() {
            events.push(TriggerEvent::Update);
        } else {
            events.push(TriggerEvent::UpdateOf(plan.mutable_columns.clone()));
        }
        artifacts.insert(
            source.qualified_name(),
            TriggerArtifact {
                strategy: plan.strategy,
                function_name: function_name.clone(),
                function_sql: render_function(&function_name, &plan.body),
                trigger: TriggerDefinition {
                    name: trigger_name,
                    table: source.unaliased(),
                    events,
                    function: function_name,
                },
            },
        );
    }
    Ok(artifacts)
}

/// Synthesize a set of caches, keyed by cache name. The first unsupported
/// cache aborts the run; skipped tables inside a cache do not.
pub fn synthesize_all(
    caches: &[Cache],
    schema: &dyn SchemaProvider,
) -> Result<BTreeMap<String, BTreeMap<String, TriggerArtifact>>, PgDenormError> {
    let mut out = BTreeMap::new();
    for cache in caches {
        out.insert(cache.name.clone(), synthesize(cache, schema)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;
    use crate::sql::dsl::*;
    use crate::sql::{FromItem, Select};

    fn schema() -> StaticSchema {
        StaticSchema::new()
            .with_table("orders", &[("id", "bigint"), ("client_id", "bigint")])
            .with_table("clients", &[("id", "bigint")])
    }

    fn count_cache() -> Cache {
        Cache::new(
            "orders_count",
            TableRef::new("clients"),
            Select::new()
                .column("orders_count", count_star())
                .from(FromItem::new(TableRef::new("orders")))
                .where_(eq(col("orders", "client_id"), col("clients", "id"))),
        )
    }

    #[test]
    fn test_synthesize_one_trigger_per_source() {
        let artifacts = synthesize(&count_cache(), &schema()).unwrap();
        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts["orders"];
        assert_eq!(artifact.strategy, Strategy::Commutative);
        assert_eq!(
            artifact.function_name,
            "pgdn_orders_count__clients__orders_fn"
        );
        assert!(artifact.function_sql.starts_with("CREATE OR REPLACE FUNCTION"));
    }

    #[test]
    fn test_trigger_definition_sql() {
        let artifacts = synthesize(&count_cache(), &schema()).unwrap();
        assert_eq!(
            artifacts["orders"].trigger.to_sql(),
            "CREATE TRIGGER pgdn_orders_count__clients__orders_tg \
             AFTER INSERT OR DELETE OR UPDATE OF client_id ON orders \
             FOR EACH ROW EXECUTE FUNCTION pgdn_orders_count__clients__orders_fn();"
        );
    }

    #[test]
    fn test_excluded_table_skipped() {
        let cache = count_cache().without_triggers_on("orders");
        let artifacts = synthesize(&cache, &schema()).unwrap();
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_invalid_cache_aborts() {
        let mut cache = count_cache();
        cache.select.columns.clear();
        assert!(matches!(
            synthesize(&cache, &schema()),
            Err(PgDenormError::EmptySelect)
        ));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let a = synthesize(&count_cache(), &schema()).unwrap();
        let b = synthesize(&count_cache(), &schema()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_synthesize_all_keys_by_cache() {
        let out = synthesize_all(&[count_cache()], &schema()).unwrap();
        assert!(out["orders_count"].contains_key("orders"));
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifacts = synthesize(&count_cache(), &schema()).unwrap();
        let artifact = &artifacts["orders"];
        let back = TriggerArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(&back, artifact);
    }
}
