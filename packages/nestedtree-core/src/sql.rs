//! Statement builders shared by the engines and the store adapters.
//!
//! Column names coming from caller data end up inside SQL text, so every name
//! is checked to be a plain identifier before it is interpolated.

pub use crate::config::check_identifier;
use crate::error::Result;
use crate::ids::RowId;
use crate::value::{Record, Value};

/// `?, ?, ?` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `INSERT INTO table (a, b) VALUES (?, ?)` and its parameters.
pub fn insert_statement(table: &str, fields: &Record) -> Result<(String, Vec<Value>)> {
    check_identifier(table)?;
    let mut columns = Vec::with_capacity(fields.len());
    let mut params = Vec::with_capacity(fields.len());
    for (column, value) in fields {
        check_identifier(column)?;
        columns.push(column.as_str());
        params.push(value.clone());
    }
    let sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders(columns.len())
        )
    };
    Ok((sql, params))
}

/// `UPDATE table SET a = ?, b = ? WHERE id = ?`; `id_column` is skipped in `fields`.
pub fn update_statement(
    table: &str,
    id_column: &str,
    id: RowId,
    fields: &Record,
) -> Result<(String, Vec<Value>)> {
    check_identifier(table)?;
    check_identifier(id_column)?;
    let mut sets = Vec::with_capacity(fields.len());
    let mut params = Vec::with_capacity(fields.len() + 1);
    for (column, value) in fields.iter().filter(|(c, _)| c.as_str() != id_column) {
        check_identifier(column)?;
        sets.push(format!("{column} = ?"));
        params.push(value.clone());
    }
    params.push(id.into());
    let sql = format!("UPDATE {table} SET {} WHERE {id_column} = ?", sets.join(", "));
    Ok((sql, params))
}

/// Rewrites `?` placeholders as `$1, $2, ...`.
///
/// A `?` inside a quoted string (`'...'`) or quoted identifier (`"..."`) is
/// left as is. Doubled quotes toggle twice and so stay inside the literal.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match (c, quote) {
            ('\'' | '"', None) => quote = Some(c),
            (_, Some(open)) if c == open => quote = None,
            ('?', None) => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}
