//! Rendering of the abstract program tree to PL/pgSQL source.

use crate::program::{SetList, Statement, TriggerBody, UpdateStatement};
use crate::sql::quote_ident;

const INDENT: &str = "    ";

/// Render a complete `CREATE OR REPLACE FUNCTION` statement around a body.
pub fn render_function(name: &str, body: &TriggerBody) -> String {
    let mut out = format!(
        "CREATE OR REPLACE FUNCTION {}() RETURNS trigger AS $body$\n",
        quote_ident(name)
    );
    if !body.declarations.is_empty() {
        out.push_str("DECLARE\n");
        for decl in &body.declarations {
            out.push_str(&format!(
                "{INDENT}{} {};\n",
                quote_ident(&decl.name),
                decl.type_name
            ));
        }
    }
    out.push_str("BEGIN\n");
    for statement in &body.statements {
        render_statement(&mut out, statement, 1);
    }
    out.push_str("END;\n$body$ LANGUAGE plpgsql;");
    out
}

fn render_statement(out: &mut String, statement: &Statement, depth: usize) {
    let pad = INDENT.repeat(depth);
    match statement {
        Statement::If(branch) => {
            out.push_str(&format!("{pad}IF {} THEN\n", branch.condition.to_sql()));
            for inner in &branch.then {
                render_statement(out, inner, depth + 1);
            }
            if !branch.otherwise.is_empty() {
                out.push_str(&format!("{pad}ELSE\n"));
                for inner in &branch.otherwise {
                    render_statement(out, inner, depth + 1);
                }
            }
            out.push_str(&format!("{pad}END IF;\n"));
        }
        Statement::Update(update) => {
            out.push_str(&format!("{pad}{};\n", render_update(update)));
        }
        Statement::Assign { variable, value } => {
            out.push_str(&format!(
                "{pad}{} := {};\n",
                quote_ident(variable),
                value.to_sql()
            ));
        }
        Statement::Return(row) => {
            out.push_str(&format!("{pad}RETURN {row};\n"));
        }
        Statement::HardCode(sql) => {
            out.push_str(&format!("{pad}{sql}\n"));
        }
    }
}

fn render_update(update: &UpdateStatement) -> String {
    let mut out = String::new();
    if let Some((name, query)) = &update.with {
        out.push_str(&format!("WITH {} AS ({query}) ", quote_ident(name)));
    }
    out.push_str(&format!("UPDATE {} SET ", update.table.to_sql_unaliased()));
    match &update.set {
        SetList::Items(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| format!("{} = {}", quote_ident(&item.column), item.expr.to_sql()))
                .collect();
            out.push_str(&rendered.join(", "));
        }
        SetList::Row { columns, subselect } => {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            out.push_str(&format!("({}) = ({subselect})", cols.join(", ")));
        }
    }
    if let Some(from) = &update.from {
        out.push_str(&format!(" FROM {from}"));
    }
    if !update.where_clause.is_empty() {
        out.push_str(&format!(" WHERE {}", update.where_clause.to_sql()));
    }
    out
}
