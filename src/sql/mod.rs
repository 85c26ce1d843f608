//! SQL data model: tables, expressions, selects, and construction helpers.
//!
//! This is the input surface of the compiler. The excluded text parser
//! produces these trees; the synthesis engine consumes them and never sees
//! SQL text on the way in.

pub mod dsl;
pub mod expr;
pub mod select;
pub mod table;

pub use expr::{BoolOp, CaseExpr, Element, Expression, FuncCall, Operand};
pub use select::{FromItem, Join, JoinKind, Select, SelectColumn};
pub use table::{ColumnRef, TableRef, quote_ident};
