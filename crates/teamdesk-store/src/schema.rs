//! Static column descriptions of the tables exposed through the backend.
//!
//! Every column name that reaches a SQL string is checked against these
//! lists first, so client-supplied keys are never interpolated unchecked.

use teamdesk_shared::Table;

use crate::error::{Result, StoreError};

pub struct TableSchema {
    pub table: Table,
    pub columns: &'static [&'static str],
    /// Columns holding JSON documents rather than plain text.
    pub json_columns: &'static [&'static str],
    /// Whether the backend maintains an `updated_at` column.
    pub tracks_updates: bool,
}

const PROJECTS: TableSchema = TableSchema {
    table: Table::Projects,
    columns: &[
        "id",
        "team_id",
        "title",
        "description",
        "status",
        "tags",
        "created_at",
        "updated_at",
    ],
    json_columns: &["tags"],
    tracks_updates: true,
};

const TASKS: TableSchema = TableSchema {
    table: Table::Tasks,
    columns: &[
        "id",
        "project_id",
        "title",
        "description",
        "status",
        "assigned_to",
        "due_date",
        "created_at",
        "updated_at",
    ],
    json_columns: &[],
    tracks_updates: true,
};

const MESSAGES: TableSchema = TableSchema {
    table: Table::Messages,
    columns: &[
        "id",
        "sender_id",
        "receiver_id",
        "project_id",
        "message",
        "created_at",
    ],
    json_columns: &[],
    tracks_updates: false,
};

const PROFILES: TableSchema = TableSchema {
    table: Table::Profiles,
    columns: &["id", "username", "phone", "created_at", "updated_at"],
    json_columns: &[],
    tracks_updates: true,
};

/// Columns the backend owns; client-supplied values are discarded.
pub const SERVER_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

pub fn schema_for(table: Table) -> &'static TableSchema {
    match table {
        Table::Projects => &PROJECTS,
        Table::Tasks => &TASKS,
        Table::Messages => &MESSAGES,
        Table::Profiles => &PROFILES,
    }
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    pub fn is_json(&self, column: &str) -> bool {
        self.json_columns.contains(&column)
    }

    /// Fail with [`StoreError::UnknownColumn`] unless `column` belongs to
    /// this table.
    pub fn check_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(StoreError::UnknownColumn {
                table: self.table,
                column: column.to_string(),
            })
        }
    }

    pub fn select_list(&self) -> String {
        self.columns.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_has_id_and_created_at() {
        for table in [Table::Projects, Table::Tasks, Table::Messages, Table::Profiles] {
            let schema = schema_for(table);
            assert_eq!(schema.table, table);
            assert!(schema.has_column("id"));
            assert!(schema.has_column("created_at"));
            assert_eq!(schema.tracks_updates, schema.has_column("updated_at"));
        }
    }

    #[test]
    fn test_check_column_rejects_unknown() {
        let err = schema_for(Table::Tasks)
            .check_column("id; DROP TABLE tasks")
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }
}
