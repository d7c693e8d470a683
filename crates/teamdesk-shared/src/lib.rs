//! # teamdesk-shared
//!
//! Types shared by every teamdesk crate: the domain model, the contract of
//! the remote relational backend and its push transport, and the error
//! taxonomy that crosses the backend boundary.

pub mod backend;
pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use backend::{Backend, ChangeEvent, IdentityService, PushStream};
pub use error::BackendError;
pub use types::{EventKind, EventMask, Filter, Order, Row, SubscriptionId, Table};
