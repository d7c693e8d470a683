//! Schema-checked row operations shared by every table.
//!
//! Rows travel as JSON objects. Every column is stored as TEXT; columns listed
//! in [`TableSchema::json_columns`] hold an encoded JSON document.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::Value;
use teamdesk_shared::{EventKind, Filter, Order, Row, Table};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::schema::{schema_for, TableSchema, SERVER_COLUMNS};

/// Fixed-precision RFC 3339 so that text order is chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Scoped read. Ties on the order column are broken by id in the same
    /// direction, so the result order is total.
    pub fn select_rows(&self, table: Table, filter: &Filter, order: Order) -> Result<Vec<Row>> {
        let schema = schema_for(table);
        schema.check_column(order.column)?;

        let (clause, args) = where_clause(schema, filter)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY {} {}, id {}",
            schema.select_list(),
            table,
            clause,
            order.column,
            direction,
            direction,
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| read_row(schema, r))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Fetch a single row by id.
    pub fn get_row(&self, table: Table, id: Uuid) -> Result<Row> {
        let schema = schema_for(table);
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            schema.select_list(),
            table
        );
        self.conn()
            .query_row(&sql, params![id.to_string()], |r| read_row(schema, r))
            .optional()?
            .ok_or(StoreError::NotFound { table, id })
    }

    pub fn row_exists(&self, table: Table, id: Uuid) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
        let found: Option<i64> = self
            .conn()
            .query_row(&sql, params![id.to_string()], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert `row` under `id`, stamping the server-owned timestamps.
    /// Client-supplied values for server-owned columns are discarded.
    pub fn insert_row(&self, table: Table, row: Row, id: Uuid, now: DateTime<Utc>) -> Result<Row> {
        let schema = schema_for(table);
        let mut stored = client_columns(schema, row)?;

        let stamp = Value::String(format_timestamp(now));
        stored.insert("id".into(), Value::String(id.to_string()));
        stored.insert("created_at".into(), stamp.clone());
        if schema.tracks_updates {
            stored.insert("updated_at".into(), stamp);
        }

        let columns: Vec<&str> = stored.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let values = stored
            .iter()
            .map(|(column, value)| to_sql_text(schema, column, value))
            .collect::<Result<Vec<_>>>()?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn().execute(&sql, params_from_iter(values.iter()))?;

        self.get_row(table, id)
    }

    /// Apply `patch` to the row with `id` and return the stored result.
    pub fn update_row(&self, table: Table, id: Uuid, patch: Row, now: DateTime<Utc>) -> Result<Row> {
        let schema = schema_for(table);
        let mut changes = client_columns(schema, patch)?;
        if schema.tracks_updates {
            changes.insert(
                "updated_at".into(),
                Value::String(format_timestamp(now)),
            );
        }

        if changes.is_empty() {
            return self.get_row(table, id);
        }

        let assignments: Vec<String> = changes
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        let mut values = changes
            .iter()
            .map(|(column, value)| to_sql_text(schema, column, value))
            .collect::<Result<Vec<_>>>()?;
        values.push(Some(id.to_string()));

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            assignments.join(", "),
            values.len()
        );
        let affected = self.conn().execute(&sql, params_from_iter(values.iter()))?;
        if affected == 0 {
            return Err(StoreError::NotFound { table, id });
        }

        self.get_row(table, id)
    }

    /// Insert or update by the `id` carried in `row`.
    pub fn upsert_row(&self, table: Table, row: Row, now: DateTime<Utc>) -> Result<(Row, EventKind)> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or(StoreError::MissingId(table))
            .and_then(|s| Uuid::parse_str(s).map_err(StoreError::from))?;

        if self.row_exists(table, id)? {
            Ok((self.update_row(table, id, row, now)?, EventKind::Update))
        } else {
            Ok((self.insert_row(table, row, id, now)?, EventKind::Insert))
        }
    }

    /// Delete the row with `id`, returning it as it was stored.
    pub fn delete_row(&self, table: Table, id: Uuid) -> Result<Row> {
        let removed = self.get_row(table, id)?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", table);
        self.conn().execute(&sql, params![id.to_string()])?;
        Ok(removed)
    }
}

/// Drop server-owned columns and reject anything outside the schema.
fn client_columns(schema: &TableSchema, row: Row) -> Result<Row> {
    let mut kept = Row::new();
    for (column, value) in row {
        if SERVER_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        schema.check_column(&column)?;
        kept.insert(column, value);
    }
    Ok(kept)
}

fn where_clause(schema: &TableSchema, filter: &Filter) -> Result<(String, Vec<Option<String>>)> {
    match filter {
        Filter::All => Ok((String::new(), Vec::new())),
        Filter::IsNull { column } | Filter::Eq { column, value: Value::Null } => {
            schema.check_column(column)?;
            Ok((format!("WHERE {column} IS NULL"), Vec::new()))
        }
        Filter::Eq { column, value } => {
            schema.check_column(column)?;
            Ok((
                format!("WHERE {column} = ?1"),
                vec![to_sql_text(schema, column, value)?],
            ))
        }
    }
}

fn to_sql_text(schema: &TableSchema, column: &str, value: &Value) -> Result<Option<String>> {
    Ok(match value {
        Value::Null => None,
        v if schema.is_json(column) => Some(serde_json::to_string(v)?),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn read_row(schema: &TableSchema, r: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut row = Row::new();
    for (i, column) in schema.columns.iter().enumerate() {
        let text: Option<String> = r.get(i)?;
        let value = match text {
            None => Value::Null,
            Some(text) if schema.is_json(column) => serde_json::from_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(i, rusqlite::types::Type::Text, Box::new(e))
            })?,
            Some(text) => Value::String(text),
        };
        row.insert((*column).to_string(), value);
    }
    Ok(row)
}
