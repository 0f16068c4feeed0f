//! SQL text helpers
//!
//! Table and column names come from the static registry, but they are still
//! quoted everywhere they are spliced into statements.

use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::query_builder::Separated;

use crate::schema::Value;

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Comma separated list of quoted identifiers
pub fn ident_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape-string literal for a single character (COPY options take no binds)
pub fn quote_char_literal(c: char) -> String {
    match c {
        '\\' => "E'\\\\'".to_string(),
        '\'' => "E'\\''".to_string(),
        '\t' => "E'\\t'".to_string(),
        other => format!("E'{other}'"),
    }
}

/// Bind a typed value into a multi-row `VALUES` list
pub fn push_value<'args>(row: &mut Separated<'_, 'args, Postgres, &'static str>, value: &Value) {
    match value {
        Value::Text(v) => row.push_bind(v.clone()),
        Value::Integer(v) => row.push_bind(*v),
        Value::Date(v) => row.push_bind(*v),
        Value::Bool(v) => row.push_bind(*v),
    };
}

/// Bind a typed value as the next positional parameter
pub fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Text(v) => query.bind(v),
        Value::Integer(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Bool(v) => query.bind(v),
    }
}
