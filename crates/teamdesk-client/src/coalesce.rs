//! Per-key sharing of in-flight requests.
//!
//! The first caller for a key starts the request; later callers for the same
//! key await the same [`Shared`] future and mark the flight for another
//! round. The flight itself decides, under the registry lock, whether to run
//! again or retire, so a joiner can never slip in between the last check and
//! the removal.
//!
//! Each flight runs on its own task. Dropping every waiter does not stop it,
//! so a flight always reaches its final `settle` and retires.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

use crate::error::{Result, SyncError};

/// Outcome delivered to waiters when a flight's task dies before resolving.
pub(crate) trait Abortable {
    fn aborted(e: JoinError) -> Self;
}

impl<T> Abortable for Result<T> {
    fn aborted(e: JoinError) -> Self {
        Err(SyncError::Aborted(e.to_string()))
    }
}

struct Flight<V> {
    shared: Shared<BoxFuture<'static, V>>,
    rerun: bool,
}

pub(crate) enum Settled {
    /// Issue the request again before resolving.
    Rerun,
    /// The flight was removed. `remaining` flights are still running.
    Done { remaining: usize },
}

pub(crate) struct Coalescer<K, V> {
    flights: Mutex<HashMap<K, Flight<V>>>,
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Abortable + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the flight for `key`, or spawn one from `start`.
    ///
    /// Returns the shared future and whether this call started it. Must be
    /// called inside a tokio runtime.
    pub fn join_or_start(
        &self,
        key: K,
        start: impl FnOnce() -> BoxFuture<'static, V>,
    ) -> (Shared<BoxFuture<'static, V>>, bool) {
        let mut flights = self.lock();
        if let Some(flight) = flights.get_mut(&key) {
            flight.rerun = true;
            return (flight.shared.clone(), false);
        }
        let task = tokio::spawn(start());
        let shared = async move { task.await.unwrap_or_else(V::aborted) }
            .boxed()
            .shared();
        flights.insert(
            key,
            Flight {
                shared: shared.clone(),
                rerun: false,
            },
        );
        (shared, true)
    }

    /// Called by a flight once a round resolves.
    ///
    /// `stale` forces another round as if a caller had joined. `may_rerun`
    /// is false once the flight has used up its reruns.
    pub fn settle(&self, key: &K, stale: bool, may_rerun: bool) -> Settled {
        let mut flights = self.lock();
        if may_rerun {
            if let Some(flight) = flights.get_mut(key) {
                if flight.rerun || stale {
                    flight.rerun = false;
                    return Settled::Rerun;
                }
            }
        }
        flights.remove(key);
        Settled::Done {
            remaining: flights.len(),
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
