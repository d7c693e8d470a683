use thiserror::Error;
use uuid::Uuid;

use crate::types::Table;

/// Failure reported by a remote backend call.
///
/// `Clone` so that a single outcome can be handed to several waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The call did not complete (connection, storage or timeout failure).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The targeted row does not exist.
    #[error("{table} row {id} not found")]
    NotFound { table: Table, id: Uuid },

    /// The backend refused the request (constraint violation, bad
    /// credentials, unknown column).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A row could not be encoded or decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Decode(e.to_string())
    }
}
