//! Observable user directory built by [`resolve_users`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use teamdesk_shared::models::{AuthRecord, ProfilePatch, ProfileRecord, User};
use teamdesk_shared::{Backend, Filter, IdentityService, Order, Table};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cache, Snapshot};
use crate::coalesce::{Coalescer, Settled};
use crate::entity::{from_row, to_row};
use crate::error::{Result, SyncError};
use crate::identity::{display_name, resolve_users};
use crate::scope::Scope;

struct UsersInner {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityService>,
    cache: Cache<User>,
    flights: Coalescer<(), Result<Arc<Vec<User>>>>,
    epoch: AtomicU64,
    /// Bumped by reset; fetches started under an older generation are dropped.
    generation: AtomicU64,
    max_reruns: u32,
}

impl UsersInner {
    async fn load(&self) -> Result<Vec<User>> {
        let rows = self
            .backend
            .select(Table::Profiles, &Filter::All, Order::desc("created_at"))
            .await?;
        let profiles: Vec<ProfileRecord> = rows.into_iter().map(from_row).collect::<Result<_>>()?;
        let auth = self.identity.list_auth_records().await?;
        let session = self.identity.current_session().await?;
        Ok(resolve_users(&auth, &profiles, session.as_ref()))
    }

    async fn run_fetch(self: Arc<Self>) -> Result<Arc<Vec<User>>> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut round = 0u32;
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let outcome = self.load().await;
            let stale = self.epoch.load(Ordering::SeqCst) != epoch;

            match self.flights.settle(&(), stale, round < self.max_reruns) {
                Settled::Rerun => round += 1,
                Settled::Done { .. } => {
                    self.cache.set_loading(false);
                    let users = Arc::new(outcome.map_err(|e| {
                        warn!(error = %e, "user directory fetch failed, keeping cached list");
                        e
                    })?);
                    if generation != self.generation.load(Ordering::SeqCst) {
                        debug!("discarding user directory fetched before reset");
                    } else if stale {
                        return Ok(self.cache.snapshot().items);
                    } else {
                        debug!(count = users.len(), "user directory replaced");
                        self.cache.replace(Scope::All, users.clone());
                    }
                    return Ok(users);
                }
            }
        }
    }
}

/// The merged user directory.
#[derive(Clone)]
pub struct UserStore {
    inner: Arc<UsersInner>,
}

impl UserStore {
    pub fn new(backend: Arc<dyn Backend>, identity: Arc<dyn IdentityService>, max_reruns: u32) -> Self {
        Self {
            inner: Arc::new(UsersInner {
                backend,
                identity,
                cache: Cache::new(),
                flights: Coalescer::new(),
                epoch: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                max_reruns,
            }),
        }
    }

    /// Re-read auth records and profiles and rebuild the directory.
    pub async fn fetch(&self) -> Result<Arc<Vec<User>>> {
        self.inner.cache.set_loading(true);
        let inner = self.inner.clone();
        let (flight, _) = self
            .inner
            .flights
            .join_or_start((), move || inner.run_fetch().boxed());
        flight.await
    }

    /// Create or edit the profile for `id` and refresh that user's entry.
    pub async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<User> {
        if let Some(name) = &patch.username {
            if name.trim().is_empty() {
                return Err(SyncError::validation("username must not be empty"));
            }
        }
        let mut row = to_row(&patch)?;
        row.insert("id".into(), Value::String(id.to_string()));

        let stored = self.inner.backend.upsert(Table::Profiles, row).await?;
        let profile: ProfileRecord = from_row(stored)?;

        let auth: Vec<AuthRecord> = self
            .inner
            .identity
            .list_auth_records()
            .await?
            .into_iter()
            .filter(|a| a.id == id)
            .collect();
        let user = resolve_users(&auth, &[profile], None)
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Decode(format!("profile {id} resolved to no user")))?;

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.cache.upsert(user.clone());
        debug!(%id, "profile updated");
        Ok(user)
    }

    /// The signed-in user, self-healed from the session when the directory
    /// does not list them yet.
    pub async fn current_user(&self) -> Result<Option<User>> {
        let Some(session) = self.inner.identity.current_session().await? else {
            return Ok(None);
        };
        if let Some(user) = self.get(session.id) {
            return Ok(Some(user));
        }
        Ok(resolve_users(&[], &[], Some(&session)).into_iter().next())
    }

    pub fn display_name(&self, id: Uuid) -> String {
        display_name(&self.snapshot().items, id)
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.snapshot().get(id).cloned()
    }

    pub fn snapshot(&self) -> Snapshot<User> {
        self.inner.cache.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<User>> {
        self.inner.cache.subscribe()
    }

    pub fn reset(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamdesk_shared::constants::UNKNOWN_USER;
    use teamdesk_store::LocalBackend;

    fn users() -> (UserStore, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        (UserStore::new(backend.clone(), backend.clone(), 3), backend)
    }

    #[tokio::test]
    async fn test_fetch_merges_accounts_and_profiles() {
        let (users, backend) = users();
        let first = backend.sign_up("ana@example.com", "secret1").await.unwrap();
        let second = backend.sign_up("bo@example.com", "secret2").await.unwrap();

        users
            .update_profile(
                first.id,
                ProfilePatch {
                    username: Some("Ana".into()),
                    phone: Some(Some("555-0101".into())),
                },
            )
            .await
            .unwrap();

        let list = users.fetch().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[0].username, "bo");
        assert_eq!(list[1].username, "Ana");
        assert_eq!(list[1].phone.as_deref(), Some("555-0101"));
        assert_eq!(users.display_name(first.id), "Ana");
        assert_eq!(users.display_name(Uuid::new_v4()), UNKNOWN_USER);
    }

    #[tokio::test]
    async fn test_current_user_self_heals() {
        let (users, backend) = users();
        assert!(users.current_user().await.unwrap().is_none());

        let me = backend.sign_up("me@example.com", "secret1").await.unwrap();
        let user = users.current_user().await.unwrap().unwrap();
        assert_eq!(user.id, me.id);
        assert_eq!(user.username, "me");
        assert!(!user.has_profile);
    }

    #[tokio::test]
    async fn test_blank_username_rejected() {
        let (users, _backend) = users();
        let err = users
            .update_profile(
                Uuid::new_v4(),
                ProfilePatch {
                    username: Some("  ".into()),
                    phone: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reset_clears_directory() {
        let (users, backend) = users();
        backend.sign_up("x@example.com", "secret1").await.unwrap();
        users.fetch().await.unwrap();
        users.reset();
        assert!(users.snapshot().is_empty());
    }
}
