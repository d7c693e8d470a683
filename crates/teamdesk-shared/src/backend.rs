//! Contract of the remote relational backend consumed by the client core.
//!
//! The backend owns ids and timestamps: every mutating call returns the
//! canonical row as stored. Change notifications are delivered through
//! [`PushStream`]s obtained from [`Backend::subscribe`].

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BackendError;
use crate::models::AuthRecord;
use crate::types::{EventKind, EventMask, Filter, Order, Row, SubscriptionId, Table};

/// One change notification: the affected row after an insert or update, or
/// the removed row after a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event: EventKind,
    pub table: Table,
    pub row: Row,
}

/// Scoped relational access plus the push transport.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `SELECT * FROM table WHERE filter ORDER BY order`.
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Order,
    ) -> Result<Vec<Row>, BackendError>;

    /// Insert one row. The backend assigns id and timestamps.
    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError>;

    /// Apply `patch` to the row with `id`. Fails with
    /// [`BackendError::NotFound`] when no such row exists.
    async fn update(&self, table: Table, id: Uuid, patch: Row) -> Result<Row, BackendError>;

    /// Insert the row, or update it in place if its `id` already exists.
    async fn upsert(&self, table: Table, row: Row) -> Result<Row, BackendError>;

    /// Delete the row with `id`. Fails with [`BackendError::NotFound`] when no
    /// such row exists.
    async fn delete(&self, table: Table, id: Uuid) -> Result<(), BackendError>;

    /// Register a push filter. Matching changes are delivered on the returned
    /// stream until [`Backend::unsubscribe`] is called or the stream dropped.
    fn subscribe(
        &self,
        table: Table,
        events: EventMask,
        filter: Filter,
    ) -> Result<PushStream, BackendError>;

    /// Release a registration. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Authentication service. The core only needs the current session for
/// self-healing the user directory and for stamping message senders.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn current_session(&self) -> Result<Option<AuthRecord>, BackendError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthRecord, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthRecord, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Every known auth record (administrative listing).
    async fn list_auth_records(&self) -> Result<Vec<AuthRecord>, BackendError>;
}

/// Receiving half of a push registration.
pub struct PushStream {
    id: SubscriptionId,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl PushStream {
    pub fn new(id: SubscriptionId, rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next notification, or `None` once the transport has dropped the
    /// registration.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Already-buffered notification, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for PushStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for PushStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushStream").field("id", &self.id).finish()
    }
}
