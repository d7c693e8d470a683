use teamdesk_shared::{BackendError, Table};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No per-user data directory exists on this platform.
    #[error("no platform data directory for the database file")]
    NoDataDir,

    #[error("database file: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("{table} row {id} not found")]
    NotFound { table: Table, id: Uuid },

    #[error("schema migration failed: {0}")]
    Migration(String),

    /// A column outside the table's schema was named.
    #[error("Unknown column {column} on {table}")]
    UnknownColumn { table: Table, column: String },

    /// An upsert row did not carry an `id`.
    #[error("Row for {0} is missing an id")]
    MissingId(Table),

    /// Sign-in with an unknown email or a wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Sign-up input that the identity service refuses.
    #[error("Invalid sign-up: {0}")]
    InvalidSignUp(String),

    /// JSON encoding of a column value failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// The database mutex was poisoned by a panicking holder.
    #[error("Database lock poisoned")]
    Poisoned,

    /// The simulated transport is switched off.
    #[error("Backend offline")]
    Offline,
}

impl StoreError {
    fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        if e.is_constraint_violation() {
            return BackendError::Rejected(e.to_string());
        }
        match e {
            StoreError::NotFound { table, id } => BackendError::NotFound { table, id },
            StoreError::UnknownColumn { .. }
            | StoreError::MissingId(_)
            | StoreError::InvalidCredentials
            | StoreError::InvalidSignUp(_) => BackendError::Rejected(e.to_string()),
            StoreError::Json(_) | StoreError::Uuid(_) | StoreError::ChronoParse(_) => {
                BackendError::Decode(e.to_string())
            }
            other => BackendError::Transport(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
