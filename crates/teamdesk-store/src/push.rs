//! In-process push transport.
//!
//! The hub keeps one bounded `mpsc` sender per registration and forwards each
//! committed change to every registration whose table, event mask and filter
//! match. A full buffer drops the notification for that subscriber, the same
//! way a lossy network transport would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use teamdesk_shared::constants::DEFAULT_PUSH_BUFFER;
use teamdesk_shared::{ChangeEvent, EventMask, Filter, PushStream, SubscriptionId, Table};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

struct Registration {
    table: Table,
    events: EventMask,
    filter: Filter,
    tx: mpsc::Sender<ChangeEvent>,
}

impl Registration {
    fn wants(&self, event: &ChangeEvent) -> bool {
        self.table == event.table && self.events.contains(event.event) && self.filter.matches(&event.row)
    }
}

pub struct PushHub {
    next_id: AtomicU64,
    buffer: usize,
    /// When set, notifications are silently discarded.
    paused: AtomicBool,
    registrations: Mutex<HashMap<SubscriptionId, Registration>>,
}

impl PushHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            paused: AtomicBool::new(false),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, table: Table, events: EventMask, filter: Filter) -> PushStream {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);

        debug!(%id, %table, ?filter, "push registration added");

        if let Ok(mut registrations) = self.registrations.lock() {
            registrations.insert(
                id,
                Registration {
                    table,
                    events,
                    filter,
                    tx,
                },
            );
        }

        PushStream::new(id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = match self.registrations.lock() {
            Ok(mut registrations) => registrations.remove(&id).is_some(),
            Err(_) => return,
        };
        if removed {
            debug!(%id, "push registration removed");
        }
    }

    /// Deliver `event` to every matching registration. Registrations whose
    /// stream has been dropped are pruned.
    pub fn publish(&self, event: ChangeEvent) {
        if self.paused.load(Ordering::Relaxed) {
            debug!(table = %event.table, event = ?event.event, "push paused, dropping notification");
            return;
        }

        let Ok(mut registrations) = self.registrations.lock() else {
            return;
        };

        let mut closed = Vec::new();
        for (id, registration) in registrations.iter() {
            if !registration.wants(&event) {
                continue;
            }
            match registration.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%id, table = %event.table, "push buffer full, notification dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            registrations.remove(&id);
            debug!(%id, "pruned push registration with dropped stream");
        }
    }

    /// Stop (or resume) delivering notifications. Registrations stay in place.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use teamdesk_shared::{EventKind, Row};
    use uuid::Uuid;

    fn event(kind: EventKind, project_id: Uuid) -> ChangeEvent {
        let row: Row = json!({ "project_id": project_id.to_string() })
            .as_object()
            .cloned()
            .unwrap();
        ChangeEvent {
            event: kind,
            table: Table::Tasks,
            row,
        }
    }

    #[tokio::test]
    async fn test_publish_respects_filter_and_mask() {
        let hub = PushHub::default();
        let project = Uuid::new_v4();
        let mut scoped = hub.subscribe(
            Table::Tasks,
            EventMask::INSERT,
            Filter::eq_id("project_id", project),
        );

        hub.publish(event(EventKind::Update, project));
        hub.publish(event(EventKind::Insert, Uuid::new_v4()));
        hub.publish(event(EventKind::Insert, project));

        let received = scoped.recv().await.unwrap();
        assert_eq!(received.event, EventKind::Insert);
        assert_eq!(received.row["project_id"], json!(project.to_string()));

        hub.unsubscribe(scoped.id());
        assert!(scoped.recv().await.is_none());
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let hub = PushHub::default();
        let project = Uuid::new_v4();
        let stream = hub.subscribe(Table::Tasks, EventMask::ALL, Filter::All);
        assert_eq!(hub.registration_count(), 1);

        drop(stream);
        hub.publish(event(EventKind::Insert, project));
        assert_eq!(hub.registration_count(), 0);
    }

    #[test]
    fn test_full_buffer_drops_without_blocking() {
        let hub = PushHub::new(1);
        let project = Uuid::new_v4();
        let _stream = hub.subscribe(Table::Tasks, EventMask::ALL, Filter::All);

        hub.publish(event(EventKind::Insert, project));
        hub.publish(event(EventKind::Insert, project));
        assert_eq!(hub.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_paused_hub_discards() {
        let hub = PushHub::default();
        let project = Uuid::new_v4();
        let mut stream = hub.subscribe(Table::Tasks, EventMask::ALL, Filter::All);

        hub.set_paused(true);
        hub.publish(event(EventKind::Insert, project));
        hub.set_paused(false);
        hub.publish(event(EventKind::Delete, project));

        assert_eq!(stream.recv().await.unwrap().event, EventKind::Delete);
    }
}
