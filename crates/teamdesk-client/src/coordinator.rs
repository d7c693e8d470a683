//! How local inserts reach the cache.
//!
//! Synchronous-confirm entities apply the insert response directly. Echo-wait
//! entities show a placeholder under a client-generated id until either the
//! insert response or a fetch carrying the canonical row confirms it. A
//! failed insert withdraws the placeholder, leaving the cache as it was.

use std::sync::Arc;

use chrono::Utc;
use teamdesk_shared::Row;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cached, Pending, Settlement};
use crate::entity::{from_row, to_row, Entity};
use crate::error::{Result, SyncError};
use crate::store::StoreInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    /// The insert response updates the cache.
    SyncConfirm,
    /// A placeholder is shown until the canonical row is observed.
    EchoWait,
}

/// Handle to an insert running in the background.
#[derive(Debug)]
pub struct PendingSend<T> {
    temp_id: Option<Uuid>,
    handle: JoinHandle<Result<T>>,
}

impl<T> PendingSend<T> {
    /// Id of the placeholder shown for this insert, if any.
    pub fn temp_id(&self) -> Option<Uuid> {
        self.temp_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the canonical row, or the error that withdrew the placeholder.
    pub async fn outcome(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::Aborted(e.to_string())),
        }
    }
}

async fn insert<T: Entity>(inner: &StoreInner<T>, row: Row) -> Result<T> {
    let row = inner.backend.insert(T::TABLE, row).await?;
    from_row(row)
}

pub(crate) async fn insert_confirmed<T: Entity>(inner: &StoreInner<T>, draft: &T::Draft) -> Result<T> {
    let created = insert(inner, to_row(draft)?).await?;
    inner.touch();
    inner.cache.upsert(created.clone());
    debug!(table = %T::TABLE, id = %created.key(), "insert confirmed");
    Ok(created)
}

pub(crate) fn spawn_confirmed<T: Entity>(inner: Arc<StoreInner<T>>, draft: T::Draft) -> PendingSend<T> {
    let handle = tokio::spawn(async move { insert_confirmed(&inner, &draft).await });
    PendingSend {
        temp_id: None,
        handle,
    }
}

pub(crate) fn spawn_echoed<T: Entity>(inner: Arc<StoreInner<T>>, draft: &T::Draft) -> Result<PendingSend<T>> {
    let row = to_row(draft)?;
    let temp_id = Uuid::new_v4();
    let shown = match T::placeholder(draft, temp_id, Utc::now()) {
        Some(value) => {
            inner.cache.add_pending(Pending { temp_id, value });
            true
        }
        None => false,
    };

    let handle = tokio::spawn(async move {
        match insert(&inner, row).await {
            Ok(item) => {
                let settled = inner.cache.take_pending(temp_id);
                let echoed = inner.cache.snapshot().get(item.key()).is_some();
                // A fetch may have retired the placeholder against an older
                // identical row, so a confirmation still lets the row in. A
                // placeholder dropped by reset or a scope change is not
                // brought back.
                let known = !matches!(settled, Settlement::Dropped);
                if known || echoed {
                    inner.touch();
                    inner.cache.upsert(item.clone());
                }
                debug!(table = %T::TABLE, %temp_id, id = %item.key(), known, echoed, "echo-wait insert settled");
                Ok(item)
            }
            Err(e) => {
                if let Settlement::Waiting(_) = inner.cache.take_pending(temp_id) {
                    warn!(table = %T::TABLE, %temp_id, error = %e, "insert failed, placeholder withdrawn");
                }
                Err(e)
            }
        }
    });

    Ok(PendingSend {
        temp_id: shown.then_some(temp_id),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::store::EntityStore;
    use teamdesk_shared::models::{Message, MessageDraft};
    use teamdesk_store::LocalBackend;

    fn draft(project_id: Option<Uuid>, text: &str) -> MessageDraft {
        MessageDraft {
            sender_id: Uuid::new_v4(),
            receiver_id: None,
            project_id,
            message: text.into(),
        }
    }

    #[tokio::test]
    async fn test_placeholder_visible_until_confirmed() {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        let messages: EntityStore<Message> = EntityStore::new(backend, 3);
        messages.fetch(Scope::Global).await.unwrap();

        let send = messages.submit(draft(None, "hi")).unwrap();
        let temp_id = send.temp_id().unwrap();
        let snap = messages.snapshot();
        assert_eq!(snap.pending.len(), 1);
        assert_eq!(snap.pending[0].temp_id, temp_id);
        assert!(snap.items.is_empty());

        let canonical = send.outcome().await.unwrap();
        assert_ne!(canonical.id, temp_id);
        let snap = messages.snapshot();
        assert!(snap.pending.is_empty());
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].id, canonical.id);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_trace() {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        let messages: EntityStore<Message> = EntityStore::new(backend.clone(), 3);
        messages.fetch(Scope::Global).await.unwrap();

        backend.set_offline(true);
        let send = messages.submit(draft(None, "lost")).unwrap();
        let err = send.outcome().await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));

        let snap = messages.snapshot();
        assert!(snap.pending.is_empty());
        assert!(snap.items.is_empty());
    }

    #[tokio::test]
    async fn test_reset_during_send_drops_result() {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        let messages: EntityStore<Message> = EntityStore::new(backend, 3);
        messages.fetch(Scope::Global).await.unwrap();

        let send = messages.submit(draft(None, "late")).unwrap();
        messages.reset();
        send.outcome().await.unwrap();
        assert!(messages.snapshot().items.is_empty());
        assert!(messages.snapshot().pending.is_empty());
    }

    #[tokio::test]
    async fn test_older_identical_message_does_not_hide_new_one() {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        let messages: EntityStore<Message> = EntityStore::new(backend, 3);
        let earlier = draft(None, "hi");
        let sender_id = earlier.sender_id;
        let old = messages.create(earlier).await.unwrap();
        messages.reset();

        let send = messages
            .submit(MessageDraft {
                sender_id,
                ..draft(None, "hi")
            })
            .unwrap();
        // A first fetch of the scope lands before the insert has run.
        messages.inner.cache.replace(Scope::Global, Arc::new(vec![old.clone()]));
        assert!(messages.snapshot().pending.is_empty());
        let new = send.outcome().await.unwrap();

        let snap = messages.snapshot();
        assert!(snap.pending.is_empty());
        assert!(snap.get(old.id).is_some());
        assert!(snap.get(new.id).is_some());
        assert_eq!(snap.items.len(), 2);
    }
}
