//! Generic per-entity cache bound to the remote backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use serde_json::Value;
use teamdesk_shared::{Backend, Filter};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cache, Snapshot};
use crate::coalesce::{Coalescer, Settled};
use crate::coordinator::{self, MutationPolicy, PendingSend};
use crate::entity::{from_row, to_row, Entity, MutableEntity};
use crate::error::Result;
use crate::scope::Scope;

pub(crate) type FetchOutcome<T> = Result<Arc<Vec<T>>>;

pub(crate) struct StoreInner<T: Entity> {
    pub backend: Arc<dyn Backend>,
    pub cache: Cache<T>,
    flights: Coalescer<Scope, FetchOutcome<T>>,
    requested: Mutex<Option<Scope>>,
    /// Bumped whenever a local mutation lands in the cache.
    epoch: AtomicU64,
    max_reruns: u32,
}

impl<T: Entity> StoreInner<T> {
    pub fn touch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn requested(&self) -> Option<Scope> {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_requested(&self, scope: Option<Scope>) {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner) = scope;
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<T>> {
        let rows = self.backend.select(T::TABLE, filter, T::order()).await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn run_fetch(self: Arc<Self>, scope: Scope, filter: Filter) -> FetchOutcome<T> {
        let mut round = 0u32;
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let outcome = self.select(&filter).await;
            let stale = self.epoch.load(Ordering::SeqCst) != epoch;

            match self.flights.settle(&scope, stale, round < self.max_reruns) {
                Settled::Rerun => {
                    round += 1;
                    debug!(table = %T::TABLE, %scope, round, "re-issuing fetch");
                }
                Settled::Done { remaining } => {
                    let result = match outcome {
                        Ok(items) => Ok(self.apply(scope, items, stale)),
                        Err(e) => {
                            warn!(table = %T::TABLE, %scope, error = %e, "fetch failed, keeping cached list");
                            Err(e)
                        }
                    };
                    self.cache.set_loading(remaining > 0);
                    return result;
                }
            }
        }
    }

    fn apply(&self, scope: Scope, items: Vec<T>, stale: bool) -> Arc<Vec<T>> {
        let items = Arc::new(items);
        if self.requested() != Some(scope) {
            debug!(table = %T::TABLE, %scope, "discarding fetch for inactive scope");
            return items;
        }
        if stale {
            // Out of reruns and a local mutation is newer than this list.
            debug!(table = %T::TABLE, %scope, "keeping cache over stale fetch");
            return self.cache.snapshot().items;
        }
        debug!(table = %T::TABLE, %scope, count = items.len(), "cache replaced");
        self.cache.replace(scope, items.clone());
        items
    }
}

/// Observable cache of one entity type.
///
/// Cloning yields another handle to the same cache.
pub struct EntityStore<T: Entity> {
    pub(crate) inner: Arc<StoreInner<T>>,
}

impl<T: Entity> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new(backend: Arc<dyn Backend>, max_reruns: u32) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                cache: Cache::new(),
                flights: Coalescer::new(),
                requested: Mutex::new(None),
                epoch: AtomicU64::new(0),
                max_reruns,
            }),
        }
    }

    /// Read `scope` from the backend and install the result.
    ///
    /// Concurrent calls for the same scope share one request. On failure the
    /// cached list is kept and the error returned.
    pub async fn fetch(&self, scope: Scope) -> Result<Arc<Vec<T>>> {
        let filter = T::filter_for(scope)?;
        self.inner.set_requested(Some(scope));
        self.inner.cache.set_loading(true);

        let inner = self.inner.clone();
        let (flight, started) = self
            .inner
            .flights
            .join_or_start(scope, move || inner.run_fetch(scope, filter).boxed());
        if !started {
            debug!(table = %T::TABLE, %scope, "joined in-flight fetch");
        }
        flight.await
    }

    /// Insert `draft` and wait for the canonical row.
    pub async fn create(&self, draft: T::Draft) -> Result<T> {
        T::validate_draft(&draft)?;
        match T::POLICY {
            MutationPolicy::SyncConfirm => coordinator::insert_confirmed(&self.inner, &draft).await,
            MutationPolicy::EchoWait => {
                coordinator::spawn_echoed(self.inner.clone(), &draft)?
                    .outcome()
                    .await
            }
        }
    }

    /// Start inserting `draft` and return at once.
    ///
    /// For echo-wait entities a placeholder is visible in
    /// [`Snapshot::pending`] until the insert settles.
    pub fn submit(&self, draft: T::Draft) -> Result<PendingSend<T>> {
        T::validate_draft(&draft)?;
        match T::POLICY {
            MutationPolicy::SyncConfirm => Ok(coordinator::spawn_confirmed(self.inner.clone(), draft)),
            MutationPolicy::EchoWait => coordinator::spawn_echoed(self.inner.clone(), &draft),
        }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.cache.snapshot()
    }

    pub fn items(&self) -> Arc<Vec<T>> {
        self.snapshot().items
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.snapshot().get(id).cloned()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.inner.cache.subscribe()
    }

    /// Scope of the most recent fetch request.
    pub fn current_scope(&self) -> Option<Scope> {
        self.inner.requested()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().loading
    }

    /// Drop everything cached. Results of fetches still in flight are
    /// discarded when they land.
    pub fn reset(&self) {
        self.inner.set_requested(None);
        self.inner.cache.clear();
    }
}

impl<T: MutableEntity> EntityStore<T> {
    /// Apply `patch` to the row with `id`.
    ///
    /// Returns `Ok(None)` when the backend no longer has the row. The cached
    /// entry, if present, is replaced whole by the canonical row.
    pub async fn update(&self, id: Uuid, patch: T::Patch) -> Result<Option<T>> {
        T::validate_patch(&patch)?;
        let mut row = to_row(&patch)?;
        row.insert(
            "updated_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );

        let updated: T = match self.inner.backend.update(T::TABLE, id, row).await {
            Ok(row) => from_row(row)?,
            Err(e) if e.is_not_found() => {
                debug!(table = %T::TABLE, %id, "update target already gone");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.inner.touch();
        if !self.inner.cache.replace_existing(updated.clone()) {
            debug!(table = %T::TABLE, %id, "updated row not cached");
        }
        Ok(Some(updated))
    }

    /// Delete the row with `id`. Absent rows are not an error.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        match self.inner.backend.delete(T::TABLE, id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(table = %T::TABLE, %id, "delete target already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.inner.touch();
        self.inner.cache.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use teamdesk_shared::models::{Project, ProjectDraft, ProjectPatch, ProjectStatus};
    use teamdesk_store::LocalBackend;

    fn draft(team_id: Uuid, title: &str) -> ProjectDraft {
        ProjectDraft {
            team_id,
            title: title.into(),
            description: None,
            status: ProjectStatus::Active,
            tags: vec!["alpha".into(), "beta".into()],
        }
    }

    fn store() -> (EntityStore<Project>, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        (EntityStore::new(backend.clone(), 3), backend)
    }

    #[tokio::test]
    async fn test_create_places_newest_first() {
        let (projects, _backend) = store();
        let team = Uuid::new_v4();
        projects.fetch(Scope::Team(team)).await.unwrap();

        let first = projects.create(draft(team, "first")).await.unwrap();
        let second = projects.create(draft(team, "second")).await.unwrap();

        let ids: Vec<Uuid> = projects.items().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(first.tags, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_last_good_list() {
        let (projects, backend) = store();
        let team = Uuid::new_v4();
        projects.create(draft(team, "kept")).await.unwrap();
        projects.fetch(Scope::Team(team)).await.unwrap();

        backend.set_offline(true);
        let err = projects.fetch(Scope::Team(team)).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(projects.items().len(), 1);
        assert!(!projects.is_loading());
    }

    #[tokio::test]
    async fn test_unsupported_scope_is_validation_error() {
        let (projects, _backend) = store();
        let err = projects.fetch(Scope::Global).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(projects.current_scope().is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_whole_entry() {
        let (projects, _backend) = store();
        let team = Uuid::new_v4();
        projects.fetch(Scope::Team(team)).await.unwrap();
        let created = projects.create(draft(team, "before")).await.unwrap();

        let patch = ProjectPatch {
            title: Some("after".into()),
            description: Some(Some("details".into())),
            ..Default::default()
        };
        let updated = projects.update(created.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.title, "after");
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(projects.get(created.id), Some(updated));
    }

    #[tokio::test]
    async fn test_update_of_deleted_row_is_noop() {
        let (projects, _backend) = store();
        let team = Uuid::new_v4();
        let created = projects.create(draft(team, "gone")).await.unwrap();
        projects.delete(created.id).await.unwrap();

        let patch = ProjectPatch {
            title: Some("late".into()),
            ..Default::default()
        };
        assert_eq!(projects.update(created.id, patch).await.unwrap(), None);
        assert!(projects.get(created.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_twice_is_noop() {
        let (projects, _backend) = store();
        let team = Uuid::new_v4();
        let created = projects.create(draft(team, "once")).await.unwrap();
        projects.delete(created.id).await.unwrap();
        projects.delete(created.id).await.unwrap();
        assert!(projects.items().is_empty());
    }

    #[tokio::test]
    async fn test_latest_requested_scope_owns_cache() {
        let (projects, _backend) = store();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();
        projects.create(draft(team_a, "a")).await.unwrap();

        let stale = projects.fetch(Scope::Team(team_a));
        let current = projects.fetch(Scope::Team(team_b));
        let (stale, current) = tokio::join!(stale, current);

        assert_eq!(stale.unwrap().len(), 1);
        assert!(current.unwrap().is_empty());
        assert_eq!(projects.current_scope(), Some(Scope::Team(team_b)));
        assert!(projects.items().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_cache() {
        let (projects, _backend) = store();
        let team = Uuid::new_v4();
        projects.fetch(Scope::Team(team)).await.unwrap();
        projects.create(draft(team, "x")).await.unwrap();

        projects.reset();
        assert!(projects.items().is_empty());
        assert!(projects.current_scope().is_none());
    }
}
