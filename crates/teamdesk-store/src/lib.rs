//! # teamdesk-store
//!
//! SQLite reference implementation of the teamdesk remote backend.
//!
//! [`Database`] wraps a `rusqlite::Connection` and exposes synchronous,
//! schema-checked row operations. [`LocalBackend`] puts a database behind the
//! async [`teamdesk_shared::Backend`] and [`teamdesk_shared::IdentityService`]
//! traits and fans every committed change out through a [`PushHub`].

pub mod auth;
pub mod backend;
pub mod database;
pub mod migrations;
pub mod preferences;
pub mod push;
pub mod records;
pub mod schema;

mod error;

pub use backend::LocalBackend;
pub use database::Database;
pub use error::StoreError;
pub use push::PushHub;
