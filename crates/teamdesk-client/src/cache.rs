//! Read-only, observable per-entity cache.
//!
//! The current list lives in a `tokio::sync::watch` channel. Readers get
//! cheap [`Snapshot`] clones (the lists are behind `Arc`) and can never write
//! back; every write goes through the owning store.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::scope::Scope;

/// What the cache needs to know about an item.
pub trait Cached: Clone + Send + Sync + 'static {
    /// Direction of the default ordering on [`Cached::sort_key`].
    const ASCENDING: bool;

    fn key(&self) -> Uuid;

    fn sort_key(&self) -> DateTime<Utc>;

    /// Whether this item belongs in a cache holding `scope`.
    fn in_scope(&self, _scope: Scope) -> bool {
        true
    }

    /// Whether this canonical item is the confirmed form of `placeholder`.
    fn confirms(&self, _placeholder: &Self) -> bool {
        false
    }
}

/// Total order used for insertion: sort key, then id, in the item's
/// declared direction.
pub fn compare<T: Cached>(a: &T, b: &T) -> Ordering {
    let ord = a
        .sort_key()
        .cmp(&b.sort_key())
        .then_with(|| a.key().cmp(&b.key()));
    if T::ASCENDING {
        ord
    } else {
        ord.reverse()
    }
}

/// A locally submitted item that the backend has not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<T> {
    /// Client-generated id, never sent to the backend.
    pub temp_id: Uuid,
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    /// Canonical items, in the store's ordering. Ids are unique.
    pub items: Arc<Vec<T>>,
    /// Placeholders awaiting confirmation, in submission order.
    pub pending: Arc<Vec<Pending<T>>>,
    pub loading: bool,
    /// Scope of the last applied fetch.
    pub scope: Option<Scope>,
    /// Placeholders retired by a fetch, mapped to the item that matched.
    pub(crate) confirmed: Arc<HashMap<Uuid, Uuid>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            pending: Arc::new(Vec::new()),
            loading: false,
            scope: None,
            confirmed: Arc::new(HashMap::new()),
        }
    }
}

/// What had happened to a placeholder by the time its insert returned.
#[derive(Debug, PartialEq)]
pub(crate) enum Settlement<T> {
    /// Still shown; now removed.
    Waiting(Pending<T>),
    /// A fetch retired it on the strength of the item with this id, which
    /// may be an older look-alike rather than the new row.
    Confirmed(Uuid),
    /// Cleared by a reset or a scope change.
    Dropped,
}

impl<T: Cached> Snapshot<T> {
    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.items.iter().find(|item| item.key() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub(crate) struct Cache<T> {
    tx: watch::Sender<Snapshot<T>>,
}

impl<T: Cached> Cache<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.tx.subscribe()
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_if_modified(|snap| {
            let changed = snap.loading != loading;
            snap.loading = loading;
            changed
        });
    }

    /// Install the authoritative list for `scope`.
    ///
    /// Placeholders confirmed by a newly appeared item are retired and the
    /// match recorded for [`Cache::take_pending`]. Placeholders outside
    /// `scope` are dropped.
    pub fn replace(&self, scope: Scope, items: Arc<Vec<T>>) {
        self.tx.send_modify(|snap| {
            let previous: HashSet<Uuid> = if snap.scope == Some(scope) {
                snap.items.iter().map(|i| i.key()).collect()
            } else {
                HashSet::new()
            };

            if !snap.pending.is_empty() {
                let mut pending: Vec<Pending<T>> = snap
                    .pending
                    .iter()
                    .filter(|p| p.value.in_scope(scope))
                    .cloned()
                    .collect();
                let confirmed = Arc::make_mut(&mut snap.confirmed);
                for item in items.iter().filter(|i| !previous.contains(&i.key())) {
                    if let Some(pos) = pending.iter().position(|p| item.confirms(&p.value)) {
                        let retired = pending.remove(pos);
                        debug!(temp_id = %retired.temp_id, id = %item.key(), "placeholder confirmed by fetch");
                        confirmed.insert(retired.temp_id, item.key());
                    }
                }
                snap.pending = Arc::new(pending);
            }
            if !snap.confirmed.is_empty() {
                let present: HashSet<Uuid> = items.iter().map(|i| i.key()).collect();
                Arc::make_mut(&mut snap.confirmed).retain(|_, id| present.contains(id));
            }

            snap.items = items;
            snap.scope = Some(scope);
        });
    }

    /// Insert `item` at its ordered position, or replace the entry with the
    /// same id. Skipped when the item lies outside the cached scope.
    pub fn upsert(&self, item: T) -> bool {
        self.tx.send_if_modified(|snap| {
            if let Some(scope) = snap.scope {
                if !item.in_scope(scope) {
                    return false;
                }
            }
            let items = Arc::make_mut(&mut snap.items);
            if let Some(pos) = items.iter().position(|x| x.key() == item.key()) {
                items.remove(pos);
            }
            let pos = items.partition_point(|x| compare(x, &item) == Ordering::Less);
            items.insert(pos, item);
            true
        })
    }

    /// Replace the entry with the same id. Absent ids are left absent.
    pub fn replace_existing(&self, item: T) -> bool {
        self.tx.send_if_modified(|snap| {
            match snap.items.iter().position(|x| x.key() == item.key()) {
                Some(pos) => {
                    let items = Arc::make_mut(&mut snap.items);
                    items[pos] = item;
                    true
                }
                None => false,
            }
        })
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.tx.send_if_modified(|snap| {
            match snap.items.iter().position(|x| x.key() == id) {
                Some(pos) => {
                    Arc::make_mut(&mut snap.items).remove(pos);
                    true
                }
                None => false,
            }
        })
    }

    pub fn add_pending(&self, pending: Pending<T>) {
        self.tx.send_modify(|snap| Arc::make_mut(&mut snap.pending).push(pending));
    }

    /// Settle the placeholder with `temp_id`, removing whatever is left of it.
    pub fn take_pending(&self, temp_id: Uuid) -> Settlement<T> {
        let mut settled = Settlement::Dropped;
        self.tx.send_if_modified(|snap| {
            if let Some(pos) = snap.pending.iter().position(|p| p.temp_id == temp_id) {
                settled = Settlement::Waiting(Arc::make_mut(&mut snap.pending).remove(pos));
                return true;
            }
            if snap.confirmed.contains_key(&temp_id) {
                if let Some(id) = Arc::make_mut(&mut snap.confirmed).remove(&temp_id) {
                    settled = Settlement::Confirmed(id);
                }
            }
            // The confirmation map is not observable, so watchers are not woken.
            false
        });
        settled
    }

    pub fn clear(&self) {
        self.tx.send_replace(Snapshot::default());
    }
}
