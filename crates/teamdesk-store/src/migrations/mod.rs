//! Schema versioning through `PRAGMA user_version`.
//!
//! Each entry of [`MIGRATIONS`] moves the schema from `version - 1` to
//! `version` inside its own transaction.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

const MIGRATIONS: &[(u32, &str, Step)] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version after every migration has run.
pub const CURRENT_VERSION: u32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at schema v{found}, newer than supported v{CURRENT_VERSION}"
        )));
    }

    for &(version, name, step) in MIGRATIONS.iter().filter(|(v, _, _)| *v > found) {
        tracing::info!(from = version - 1, to = version, migration = name, "migrating schema");
        let tx = conn.transaction()?;
        step(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
