//! Error types for the trigger-synthesis compiler.
//!
//! All failures are represented by [`PgDenormError`] and propagated via
//! `Result<T, PgDenormError>`; callers at the migration boundary decide how
//! to surface them.
//!
//! # Error Classification
//!
//! Errors fall into three categories:
//! - **User**: unsupported cache definition shapes (missing aliases,
//!   duplicate aliases, empty selects). Synthesis aborts for the whole cache.
//! - **Recoverable**: a base table that cannot be traced to the target
//!   table. The synthesis loop catches these, skips the table, and continues
//!   with the rest of the cache.
//! - **Internal**: invariant violations (a column the dependency analysis
//!   refers to does not exist, malformed program trees). Bugs, never caught.
//!
//! Note that an *ambiguous* reference predicate is not an error at all: the
//! classifier records it and the engine degrades to the universal
//! (full-recompute) trigger strategy for that table.

use std::fmt;

/// Primary error type for the compiler.
#[derive(Debug, thiserror::Error)]
pub enum PgDenormError {
    // ── User errors: reject the cache definition ────────────────────────
    /// A cache select column has no output alias.
    #[error("cache column without alias: every cache select column must be aliased")]
    MissingColumnAlias,

    /// Two cache select columns share an output alias.
    #[error("duplicate cache column alias: {0}")]
    DuplicateColumnAlias(String),

    /// The cache select has no columns at all.
    #[error("cache select has no columns")]
    EmptySelect,

    /// The cache definition is structurally invalid in some other way.
    #[error("invalid cache definition: {0}")]
    InvalidDefinition(String),

    // ── Recoverable: skip the table, keep the cache ─────────────────────
    /// A base table cannot be connected to the target table; no trigger is
    /// generated for it.
    #[error("no {0} in select")]
    TableNotInSelect(String),

    // ── Internal errors: invariant violations ───────────────────────────
    /// A column referenced by the analysis does not exist in the schema.
    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgDenormError {
    /// Whether the outer synthesis loop may catch this error and continue
    /// with the remaining source tables.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PgDenormError::TableNotInSelect(_))
    }

    /// Classify the error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PgDenormError::MissingColumnAlias
            | PgDenormError::DuplicateColumnAlias(_)
            | PgDenormError::EmptySelect
            | PgDenormError::InvalidDefinition(_) => ErrorKind::User,

            PgDenormError::TableNotInSelect(_) => ErrorKind::Recoverable,

            PgDenormError::UnknownColumn { .. } | PgDenormError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Severity/kind classification of a [`PgDenormError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Recoverable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::User => write!(f, "USER"),
            ErrorKind::Recoverable => write!(f, "RECOVERABLE"),
            ErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}
