//! Payload parsing, validation, and statement construction.
//!
//! A transaction payload is a JSON object describing one insert or update:
//!
//! ```json
//! {"table": "users", "operation": "INSERT", "values": {"id": 1, "name": "Alice"}}
//! ```
//!
//! Identifiers are restricted to `[A-Za-z0-9_-]`, normalised to lower case,
//! and double-quoted in the generated SQL. Column keys are rendered in sorted
//! order so the same payload always produces the same statement; the
//! semantics are order-independent.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use serde_json::Value;
use snafu::Snafu;

/// Errors raised while turning a payload into a statement.
#[derive(Debug, Snafu)]
pub enum PayloadError {
    #[snafu(display("payload is required"))]
    MissingPayload,

    #[snafu(display("payload is not a SQL action: {source}"))]
    Decode { source: serde_json::Error },

    #[snafu(display("table is required"))]
    MissingTable,

    #[snafu(display("values are required"))]
    MissingValues,

    #[snafu(display("where is required for UPDATE"))]
    MissingWhere,

    #[snafu(display("unsupported operation: {operation}"))]
    UnsupportedOperation { operation: String },

    #[snafu(display("identifier is empty"))]
    EmptyIdentifier,

    #[snafu(display("identifier {ident:?} contains invalid characters"))]
    InvalidIdentifier { ident: String },
}

/// The kind of write a payload requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
}

/// A validated insert/update action ready to be rendered as SQL.
///
/// `BTreeMap` keeps column keys sorted, which is what gives the rendered
/// statement its deterministic shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlAction {
    pub table: String,
    pub operation: Operation,
    pub values: BTreeMap<String, Value>,
    pub filter: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    table: String,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default, rename = "where")]
    filter: BTreeMap<String, Value>,
}

impl SqlAction {
    /// Parse and validate a JSON payload.
    ///
    /// The operation defaults to `INSERT` and is matched case-insensitively.
    pub fn parse(payload: &Value) -> Result<SqlAction, PayloadError> {
        if payload.is_null() {
            return Err(PayloadError::MissingPayload);
        }

        let raw: RawAction = serde_json::from_value(payload.clone())
            .map_err(|source| PayloadError::Decode { source })?;

        let table = raw.table.trim().to_string();
        if table.is_empty() {
            return Err(PayloadError::MissingTable);
        }

        if raw.values.is_empty() {
            return Err(PayloadError::MissingValues);
        }

        let op = raw.operation.trim().to_uppercase();
        let operation = match op.as_str() {
            "" | "INSERT" => Operation::Insert,
            "UPDATE" => {
                if raw.filter.is_empty() {
                    return Err(PayloadError::MissingWhere);
                }
                Operation::Update
            }
            other => {
                return Err(PayloadError::UnsupportedOperation {
                    operation: other.to_string(),
                })
            }
        };

        Ok(SqlAction {
            table,
            operation,
            values: raw.values,
            filter: raw.filter,
        })
    }

    /// Render the action as a parameterised statement with 1-based positional
    /// placeholders, plus the bound parameters in placeholder order.
    pub fn statement(&self) -> Result<(String, Vec<SqlValue>), PayloadError> {
        let table = safe_ident(&self.table)?;

        match self.operation {
            Operation::Insert => {
                let mut columns = Vec::with_capacity(self.values.len());
                let mut placeholders = Vec::with_capacity(self.values.len());
                let mut params = Vec::with_capacity(self.values.len());

                for (idx, (column, value)) in self.values.iter().enumerate() {
                    columns.push(format!("\"{}\"", safe_ident(column)?));
                    placeholders.push(format!("?{}", idx + 1));
                    params.push(bind_value(value));
                }

                let sql = format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({})",
                    table,
                    columns.join(","),
                    placeholders.join(",")
                );
                Ok((sql, params))
            }
            Operation::Update => {
                let mut params = Vec::with_capacity(self.values.len() + self.filter.len());
                let mut idx = 1;

                let mut set_parts = Vec::with_capacity(self.values.len());
                for (column, value) in &self.values {
                    set_parts.push(format!("\"{}\"=?{}", safe_ident(column)?, idx));
                    params.push(bind_value(value));
                    idx += 1;
                }

                let mut where_parts = Vec::with_capacity(self.filter.len());
                for (column, value) in &self.filter {
                    where_parts.push(format!("\"{}\"=?{}", safe_ident(column)?, idx));
                    params.push(bind_value(value));
                    idx += 1;
                }

                let sql = format!(
                    "UPDATE \"{}\" SET {} WHERE {}",
                    table,
                    set_parts.join(","),
                    where_parts.join(" AND ")
                );
                Ok((sql, params))
            }
        }
    }
}

/// Validate an identifier and normalise it to lower case.
///
/// Allowed characters: ASCII letters, digits, `_`, `-`.
pub fn safe_ident(ident: &str) -> Result<String, PayloadError> {
    if ident.is_empty() {
        return Err(PayloadError::EmptyIdentifier);
    }

    let ok = ident
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(PayloadError::InvalidIdentifier {
            ident: ident.to_string(),
        });
    }

    Ok(ident.to_ascii_lowercase())
}

/// Convert a JSON scalar into a SQLite parameter.
///
/// Arrays and objects are bound as their JSON text.
fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
