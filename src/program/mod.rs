//! Abstract trigger-function program tree.
//!
//! The body assembler builds one [`TriggerBody`] per (cache, source table)
//! pair out of declarations, conditionals, and update statements. The tree is
//! immediately rendered to PL/pgSQL by [`render`] and discarded; nothing in
//! here is persisted or shared between triggers.

pub mod render;

use crate::sql::{Expression, TableRef};

/// A variable declaration in the function's DECLARE block.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub type_name: String,
}

impl Declaration {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Declaration {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One `col = expr` entry of an UPDATE SET list.
#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub column: String,
    pub expr: Expression,
}

impl SetItem {
    pub fn new(column: impl Into<String>, expr: Expression) -> Self {
        SetItem {
            column: column.into(),
            expr,
        }
    }
}

/// SET clause of an UPDATE: either per-column expressions or the row form
/// `SET (c1, c2, ...) = (sub-select)` used by the full-recompute body.
#[derive(Debug, Clone, PartialEq)]
pub enum SetList {
    Items(Vec<SetItem>),
    Row {
        columns: Vec<String>,
        subselect: String,
    },
}

/// A maintenance UPDATE against the target table.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: TableRef,
    pub set: SetList,
    /// Optional leading CTE, `WITH <name> AS (<query>)`.
    pub with: Option<(String, String)>,
    /// Optional FROM list joined for row location.
    pub from: Option<String>,
    pub where_clause: Expression,
}

/// A statement of the trigger body.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    If(IfStatement),
    Update(UpdateStatement),
    /// `<variable> := <value>;`
    Assign { variable: String, value: Expression },
    /// `RETURN <row>;`
    Return(String),
    /// Opaque pre-rendered fragment, emitted verbatim on its own line.
    HardCode(String),
}

/// `IF <condition> THEN ... [ELSE ...] END IF;`
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub condition: Expression,
    pub then: Vec<Statement>,
    pub otherwise: Vec<Statement>,
}

impl IfStatement {
    pub fn new(condition: Expression, then: Vec<Statement>) -> Self {
        IfStatement {
            condition,
            then,
            otherwise: Vec::new(),
        }
    }

    pub fn with_else(mut self, otherwise: Vec<Statement>) -> Self {
        self.otherwise = otherwise;
        self
    }
}

impl From<IfStatement> for Statement {
    fn from(value: IfStatement) -> Self {
        Statement::If(value)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(value: UpdateStatement) -> Self {
        Statement::Update(value)
    }
}

/// The complete body of one trigger function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerBody {
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Statement>,
}

impl TriggerBody {
    pub fn new() -> Self {
        TriggerBody::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, type_name: impl Into<String>) {
        self.declarations.push(Declaration::new(name, type_name));
    }

    pub fn push(&mut self, statement: impl Into<Statement>) {
        self.statements.push(statement.into());
    }
}
