//! Incremental maintenance of denormalized aggregate columns.
//!
//! A [`Cache`] declares, once, that column X on table T equals an aggregate
//! select over one or more source tables. This crate compiles that
//! declaration into per-source-table row-level PL/pgSQL triggers that keep X
//! correct on every INSERT, UPDATE, and DELETE without re-running the full
//! aggregate query per event.
//!
//! The compiler classifies which predicates link a changed source row to a
//! target row, searches for the minimal join path each OR-branch needs, and
//! picks one of three code-generation strategies per source table: direct
//! commutative update (`col = col + 1`), commutative update with resolved
//! lookup-join variables, or a universal full-recompute body. All three are
//! equivalent to recomputing the aggregate from scratch; the first two just
//! avoid it on the hot paths.
//!
//! ```
//! use pg_denorm::schema::StaticSchema;
//! use pg_denorm::sql::dsl::*;
//! use pg_denorm::sql::{FromItem, Select, TableRef};
//! use pg_denorm::{Cache, synthesize};
//!
//! let cache = Cache::new(
//!     "orders_count",
//!     TableRef::new("clients"),
//!     Select::new()
//!         .column("orders_count", count_star())
//!         .from(FromItem::new(TableRef::new("orders")))
//!         .where_(eq(col("orders", "client_id"), col("clients", "id"))),
//! );
//! let schema = StaticSchema::new()
//!     .with_table("orders", &[("id", "bigint"), ("client_id", "bigint")]);
//! let triggers = synthesize(&cache, &schema).unwrap();
//! assert!(triggers["orders"].function_sql.contains("TG_OP"));
//! ```
//!
//! Parsing cache-definition text into the [`sql`] model and applying the
//! generated DDL against a live connection are the caller's concern.

pub mod cache;
pub mod error;
pub mod naming;
pub mod program;
pub mod schema;
pub mod sql;
pub mod synth;

pub use cache::Cache;
pub use error::{ErrorKind, PgDenormError};
pub use schema::{SchemaProvider, StaticSchema};
pub use synth::{
    Strategy, TriggerArtifact, TriggerDefinition, TriggerEvent, synthesize, synthesize_all,
};
