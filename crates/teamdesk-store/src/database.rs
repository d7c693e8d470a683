//! SQLite handle for the reference backend.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;
use teamdesk_shared::constants::APP_NAME;

use crate::error::{Result, StoreError};
use crate::migrations;

const DB_FILE: &str = "teamdesk.db";

/// A migrated connection with foreign keys enforced.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open `teamdesk.db` in the platform data directory (for example
    /// `~/.local/share/teamdesk/` on Linux), creating it if needed.
    pub fn open_default() -> Result<Self> {
        let dirs = ProjectDirs::from("com", APP_NAME, APP_NAME).ok_or(StoreError::NoDataDir)?;
        std::fs::create_dir_all(dirs.data_dir())?;
        Self::open_at(&dirs.data_dir().join(DB_FILE))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        // WAL lets readers proceed while a write is committing.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// File backing the connection; `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
