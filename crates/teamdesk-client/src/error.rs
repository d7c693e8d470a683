use teamdesk_shared::BackendError;
use thiserror::Error;

/// Errors surfaced by store, subscription and session operations.
///
/// `Clone` because a coalesced fetch delivers one outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The remote call failed. The cache was left unchanged.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Input refused before any request was sent.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A backend row did not match the client model.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The operation needs a signed-in user.
    #[error("Not signed in")]
    Unauthenticated,

    /// A background fetch or insert task ended without reporting an outcome.
    #[error("Background task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Transport(msg) => SyncError::Transport(msg),
            BackendError::Rejected(msg) => SyncError::Rejected(msg),
            BackendError::Decode(msg) => SyncError::Decode(msg),
            not_found @ BackendError::NotFound { .. } => SyncError::Rejected(not_found.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
