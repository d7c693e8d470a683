//! Client-local key/value display preferences.

use rusqlite::{params, OptionalExtension};
use teamdesk_shared::constants::PREF_DARK_MODE;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Boolean preference; anything but `"true"` reads as `false`.
    pub fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_preference(key)?.as_deref() == Some("true"))
    }

    pub fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.set_preference(key, if value { "true" } else { "false" })
    }

    pub fn dark_mode(&self) -> Result<bool> {
        self.get_flag(PREF_DARK_MODE)
    }

    pub fn set_dark_mode(&self, enabled: bool) -> Result<()> {
        self.set_flag(PREF_DARK_MODE, enabled)
    }
}
