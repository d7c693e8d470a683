//! Push channels that keep an active scope's cache fresh.
//!
//! Each open channel owns one backend registration and one pump task. Any
//! notification re-fetches the owning store for the channel's scope; the
//! pump never patches a cache from the event payload. Channels are released
//! through their [`ChannelGuard`], explicitly or on drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use teamdesk_shared::{Backend, EventMask, Filter, PushStream, SubscriptionId, Table};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::error::Result;
use crate::scope::Scope;
use crate::store::EntityStore;
use crate::users::UserStore;

/// A store that can be brought back in line with the backend for a scope.
#[async_trait]
pub trait Resync: Send + Sync + 'static {
    /// Re-read `scope`. Failures are logged, never returned.
    async fn resync(&self, scope: Scope);
}

#[async_trait]
impl<T: Entity> Resync for EntityStore<T> {
    async fn resync(&self, scope: Scope) {
        if self.current_scope() != Some(scope) {
            debug!(table = %T::TABLE, %scope, "skipping resync for inactive scope");
            return;
        }
        if let Err(e) = self.fetch(scope).await {
            warn!(table = %T::TABLE, %scope, error = %e, "resync failed");
        }
    }
}

#[async_trait]
impl Resync for UserStore {
    async fn resync(&self, _scope: Scope) {
        if let Err(e) = self.fetch().await {
            warn!(error = %e, "user directory resync failed");
        }
    }
}

/// What to listen for.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    pub table: Table,
    pub events: EventMask,
    pub scope: Scope,
    pub filter: Filter,
}

impl ChannelSpec {
    /// Channel over `T`'s table bounded by the same filter its fetch uses.
    pub fn for_entity<T: Entity>(scope: Scope, events: EventMask) -> Result<Self> {
        Ok(Self {
            table: T::TABLE,
            events,
            scope,
            filter: T::filter_for(scope)?,
        })
    }

    /// Every profile change, for the user directory.
    pub fn profiles() -> Self {
        Self {
            table: Table::Profiles,
            events: EventMask::ALL,
            scope: Scope::All,
            filter: Filter::All,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            table: self.table,
            scope: self.scope,
        }
    }
}

/// At most one channel exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub table: Table,
    pub scope: Scope,
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.table, self.scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Subscribing,
    Open,
    Closing,
}

struct Entry {
    generation: u64,
    state: ChannelState,
    subscription: Option<SubscriptionId>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Registry {
    backend: Arc<dyn Backend>,
    entries: Mutex<HashMap<ChannelKey, Entry>>,
    next_generation: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the channel to `Closing`: stop its pump and release the backend
    /// registration. `generation` of `None` matches whichever channel holds
    /// the key.
    fn begin_close(&self, key: ChannelKey, generation: Option<u64>) -> Option<JoinHandle<()>> {
        let (subscription, task) = {
            let mut entries = self.lock();
            let entry = entries.get_mut(&key)?;
            if generation.is_some_and(|g| g != entry.generation) || entry.state == ChannelState::Closing {
                return None;
            }
            entry.state = ChannelState::Closing;
            if let Some(stop) = entry.stop.take() {
                let _ = stop.send(());
            }
            (entry.subscription.take(), entry.task.take())
        };
        if let Some(id) = subscription {
            self.backend.unsubscribe(id);
        }
        task
    }

    fn finish_close(&self, key: ChannelKey, generation: Option<u64>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&key) {
            if generation.map_or(true, |g| g == entry.generation) {
                entries.remove(&key);
                debug!(channel = %key, "channel closed");
            }
        }
    }

    fn close_now(&self, key: ChannelKey, generation: Option<u64>) {
        self.begin_close(key, generation);
        self.finish_close(key, generation);
    }
}

/// Owner of every push channel of a session.
#[derive(Clone)]
pub struct SubscriptionManager {
    registry: Arc<Registry>,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            registry: Arc::new(Registry {
                backend,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Open a channel for `spec` that resyncs `target` on every change.
    ///
    /// An existing channel with the same key is closed first.
    pub fn open<R: Resync>(&self, spec: ChannelSpec, target: R) -> Result<ChannelGuard> {
        let key = spec.key();
        if self.state(key) != ChannelState::Closed {
            debug!(channel = %key, "replacing open channel");
            self.registry.close_now(key, None);
        }

        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(
            key,
            Entry {
                generation,
                state: ChannelState::Subscribing,
                subscription: None,
                stop: None,
                task: None,
            },
        );

        let stream = match self.registry.backend.subscribe(spec.table, spec.events, spec.filter) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(channel = %key, error = %e, "subscribe failed");
                self.registry.finish_close(key, Some(generation));
                return Err(e.into());
            }
        };

        let subscription = stream.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(
            self.registry.clone(),
            key,
            generation,
            stream,
            stop_rx,
            Arc::new(target),
        ));

        if let Some(entry) = self.registry.lock().get_mut(&key) {
            if entry.generation == generation {
                entry.state = ChannelState::Open;
                entry.subscription = Some(subscription);
                entry.stop = Some(stop_tx);
                entry.task = Some(task);
            }
        }
        info!(channel = %key, %subscription, "channel open");

        Ok(ChannelGuard {
            registry: self.registry.clone(),
            key,
            generation,
            released: false,
        })
    }

    pub fn state(&self, key: ChannelKey) -> ChannelState {
        self.registry
            .lock()
            .get(&key)
            .map_or(ChannelState::Closed, |entry| entry.state)
    }

    pub fn open_channels(&self) -> Vec<ChannelKey> {
        self.registry
            .lock()
            .iter()
            .filter(|(_, entry)| entry.state == ChannelState::Open)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Close every channel. Outstanding guards become inert.
    pub fn close_all(&self) {
        let keys: Vec<ChannelKey> = self.registry.lock().keys().copied().collect();
        for key in keys {
            self.registry.close_now(key, None);
        }
        info!("all channels closed");
    }
}

async fn pump(
    registry: Arc<Registry>,
    key: ChannelKey,
    generation: u64,
    mut stream: PushStream,
    mut stop: oneshot::Receiver<()>,
    target: Arc<dyn Resync>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut stop => break,

            event = stream.recv() => match event {
                Some(event) => {
                    let mut burst = 1;
                    while stream.try_recv().is_some() {
                        burst += 1;
                    }
                    debug!(channel = %key, event = ?event.event, burst, "change received, resyncing");
                    let target = target.clone();
                    let scope = key.scope;
                    tokio::spawn(async move { target.resync(scope).await });
                }
                None => {
                    warn!(channel = %key, "push stream ended, channel closed");
                    registry.close_now(key, Some(generation));
                    break;
                }
            },
        }
    }
}

/// Keeps one channel open. Dropping it closes the channel.
#[must_use = "dropping the guard closes the channel"]
pub struct ChannelGuard {
    registry: Arc<Registry>,
    key: ChannelKey,
    generation: u64,
    released: bool,
}

impl ChannelGuard {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Close the channel and wait for its pump to stop.
    pub async fn close(mut self) {
        self.released = true;
        if let Some(task) = self.registry.begin_close(self.key, Some(self.generation)) {
            let _ = task.await;
        }
        self.registry.finish_close(self.key, Some(self.generation));
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.close_now(self.key, Some(self.generation));
        }
    }
}

impl std::fmt::Debug for ChannelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use teamdesk_shared::models::{Project, ProjectDraft, ProjectStatus};
    use teamdesk_store::LocalBackend;
    use uuid::Uuid;

    fn setup() -> (SubscriptionManager, EntityStore<Project>, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        (
            SubscriptionManager::new(backend.clone()),
            EntityStore::new(backend.clone(), 3),
            backend,
        )
    }

    fn draft(team_id: Uuid) -> ProjectDraft {
        ProjectDraft {
            team_id,
            title: "remote".into(),
            description: None,
            status: ProjectStatus::Active,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_guard_drop_releases_registration() {
        let (manager, projects, backend) = setup();
        let scope = Scope::Team(Uuid::new_v4());
        let spec = ChannelSpec::for_entity::<Project>(scope, EventMask::ALL).unwrap();
        let key = spec.key();

        let guard = manager.open(spec, projects).unwrap();
        assert_eq!(manager.state(key), ChannelState::Open);
        assert_eq!(backend.hub().registration_count(), 1);

        drop(guard);
        assert_eq!(manager.state(key), ChannelState::Closed);
        assert_eq!(backend.hub().registration_count(), 0);
    }

    #[tokio::test]
    async fn test_reopen_replaces_channel() {
        let (manager, projects, backend) = setup();
        let scope = Scope::Team(Uuid::new_v4());
        let spec = ChannelSpec::for_entity::<Project>(scope, EventMask::ALL).unwrap();

        let first = manager.open(spec.clone(), projects.clone()).unwrap();
        let second = manager.open(spec.clone(), projects).unwrap();
        assert_eq!(backend.hub().registration_count(), 1);
        assert_eq!(manager.open_channels(), vec![spec.key()]);

        // The stale guard must not close its replacement.
        drop(first);
        assert_eq!(manager.state(spec.key()), ChannelState::Open);
        second.close().await;
        assert_eq!(manager.state(spec.key()), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_remote_change_triggers_refetch() {
        let (manager, projects, backend) = setup();
        let team = Uuid::new_v4();
        let scope = Scope::Team(team);
        projects.fetch(scope).await.unwrap();
        let mut rx = projects.watch();

        let spec = ChannelSpec::for_entity::<Project>(scope, EventMask::ALL).unwrap();
        let _guard = manager.open(spec, projects.clone()).unwrap();

        // Another client writes straight to the backend.
        let other: EntityStore<Project> = EntityStore::new(backend.clone(), 3);
        other.create(draft(team)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while projects.items().is_empty() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(projects.items()[0].title, "remote");
    }

    #[tokio::test]
    async fn test_close_all_closes_everything() {
        let (manager, projects, backend) = setup();
        let a = manager
            .open(
                ChannelSpec::for_entity::<Project>(Scope::Team(Uuid::new_v4()), EventMask::ALL)
                    .unwrap(),
                projects.clone(),
            )
            .unwrap();
        let b = manager
            .open(
                ChannelSpec::for_entity::<Project>(Scope::All, EventMask::ALL).unwrap(),
                projects,
            )
            .unwrap();
        assert_eq!(backend.hub().registration_count(), 2);

        manager.close_all();
        assert!(manager.open_channels().is_empty());
        assert_eq!(backend.hub().registration_count(), 0);
        drop((a, b));
    }

    #[tokio::test]
    async fn test_subscribe_failure_leaves_channel_closed() {
        let (manager, projects, backend) = setup();
        backend.set_offline(true);
        let spec = ChannelSpec::for_entity::<Project>(Scope::All, EventMask::ALL).unwrap();
        let key = spec.key();
        assert!(manager.open(spec, projects).is_err());
        assert_eq!(manager.state(key), ChannelState::Closed);
    }
}
