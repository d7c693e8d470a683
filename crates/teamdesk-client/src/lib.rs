//! # teamdesk-client
//!
//! Reactive state synchronization for the teamdesk collaboration client.
//!
//! Each entity type (projects, tasks, messages, users) gets an observable
//! cache that is filled by scoped fetches, updated by the store's own
//! mutations, and refreshed by push channels when other clients write. A
//! [`Session`] owns the full set for one signed-in user.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod identity;
pub mod scope;
pub mod session;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod users;

mod coalesce;

pub use cache::{Pending, Snapshot};
pub use config::ClientConfig;
pub use coordinator::{MutationPolicy, PendingSend};
pub use entity::{Entity, MutableEntity};
pub use error::SyncError;
pub use scope::Scope;
pub use session::{ActiveScope, Session};
pub use store::EntityStore;
pub use subscription::{ChannelGuard, ChannelKey, ChannelSpec, ChannelState, Resync, SubscriptionManager};
pub use users::UserStore;

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber, filtered by `RUST_LOG`.
///
/// Calling it again after a subscriber is installed has no effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("teamdesk_client=debug,teamdesk_store=info,warn")),
        )
        .with_target(true)
        .try_init();
}
