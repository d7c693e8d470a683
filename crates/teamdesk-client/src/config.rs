//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration against a local database.

use std::path::PathBuf;

use teamdesk_shared::constants::{DEFAULT_MAX_FETCH_RERUNS, DEFAULT_PUSH_BUFFER};
use uuid::Uuid;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Location of the local reference database.
    /// Env: `TEAMDESK_DB_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Team whose projects are shown on start.
    /// Env: `TEAMDESK_TEAM_ID`
    /// Default: none.
    pub team_id: Option<Uuid>,

    /// Capacity of each push subscription buffer.
    /// Env: `TEAMDESK_PUSH_BUFFER`
    /// Default: `64`
    pub push_buffer: usize,

    /// How many times an in-flight fetch is re-issued because newer changes
    /// landed while it was running.
    /// Env: `TEAMDESK_MAX_FETCH_RERUNS`
    /// Default: `3`
    pub max_fetch_reruns: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            team_id: None,
            push_buffer: DEFAULT_PUSH_BUFFER,
            max_fetch_reruns: DEFAULT_MAX_FETCH_RERUNS,
        }
    }
}

impl ClientConfig {
    /// `TEAMDESK_*` variables from the process environment; unset ones keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TEAMDESK_DB_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(value) = lookup("TEAMDESK_TEAM_ID") {
            match Uuid::parse_str(value.trim()) {
                Ok(id) => config.team_id = Some(id),
                Err(e) => {
                    tracing::warn!(value = %value, error = %e, "Invalid TEAMDESK_TEAM_ID, ignoring");
                }
            }
        }

        if let Some(value) = lookup("TEAMDESK_PUSH_BUFFER") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.push_buffer = n,
                _ => {
                    tracing::warn!(value = %value, "Invalid TEAMDESK_PUSH_BUFFER, using default");
                }
            }
        }

        if let Some(value) = lookup("TEAMDESK_MAX_FETCH_RERUNS") {
            match value.parse::<u32>() {
                Ok(n) => config.max_fetch_reruns = n,
                Err(_) => {
                    tracing::warn!(value = %value, "Invalid TEAMDESK_MAX_FETCH_RERUNS, using default");
                }
            }
        }

        // RUST_LOG is read by `init_tracing`.

        config
    }
}
