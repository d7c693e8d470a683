//! [`Backend`] and [`IdentityService`] over a local SQLite [`Database`].
//!
//! Every successful mutation is committed first and then published on the
//! [`PushHub`], so a subscriber that re-reads on notification always sees the
//! change. Timestamps come from a monotonic clock with microsecond precision,
//! which keeps `created_at` orderings strict even for back-to-back inserts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use teamdesk_shared::constants::DEFAULT_PUSH_BUFFER;
use teamdesk_shared::models::AuthRecord;
use teamdesk_shared::{
    Backend, BackendError, ChangeEvent, EventKind, EventMask, Filter, IdentityService, Order,
    PushStream, Row, SubscriptionId, Table,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::error::StoreError;
use crate::push::PushHub;

pub struct LocalBackend {
    db: Mutex<Database>,
    hub: PushHub,
    session: Mutex<Option<AuthRecord>>,
    clock: Mutex<DateTime<Utc>>,
    offline: AtomicBool,
}

impl LocalBackend {
    pub fn new(db: Database, push_buffer: usize) -> Self {
        Self {
            db: Mutex::new(db),
            hub: PushHub::new(push_buffer),
            session: Mutex::new(None),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
            offline: AtomicBool::new(false),
        }
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?, DEFAULT_PUSH_BUFFER))
    }

    pub fn hub(&self) -> &PushHub {
        &self.hub
    }

    /// Make every call fail with a transport error until switched back.
    pub fn set_offline(&self, offline: bool) {
        info!(offline, "local backend transport toggled");
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Run `f` against the database under its lock.
    pub fn with_database<R>(
        &self,
        f: impl FnOnce(&Database) -> Result<R, StoreError>,
    ) -> Result<R, BackendError> {
        let db = self
            .db
            .lock()
            .map_err(|_| BackendError::from(StoreError::Poisoned))?;
        f(&db).map_err(BackendError::from)
    }

    fn guard_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Offline.into());
        }
        Ok(())
    }

    /// Strictly increasing wall-clock timestamp.
    fn now(&self) -> Result<DateTime<Utc>, BackendError> {
        let mut last = self
            .clock
            .lock()
            .map_err(|_| BackendError::from(StoreError::Poisoned))?;
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + chrono::Duration::microseconds(1);
        }
        *last = now;
        Ok(now)
    }

    fn publish(&self, event: EventKind, table: Table, row: &Row) {
        debug!(%table, ?event, "publishing change");
        self.hub.publish(ChangeEvent {
            event,
            table,
            row: row.clone(),
        });
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Order,
    ) -> Result<Vec<Row>, BackendError> {
        self.guard_online()?;
        self.with_database(|db| db.select_rows(table, filter, order))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        self.guard_online()?;
        let now = self.now()?;
        let stored = self.with_database(|db| db.insert_row(table, row, Uuid::new_v4(), now))?;
        self.publish(EventKind::Insert, table, &stored);
        Ok(stored)
    }

    async fn update(&self, table: Table, id: Uuid, patch: Row) -> Result<Row, BackendError> {
        self.guard_online()?;
        let now = self.now()?;
        let stored = self.with_database(|db| db.update_row(table, id, patch, now))?;
        self.publish(EventKind::Update, table, &stored);
        Ok(stored)
    }

    async fn upsert(&self, table: Table, row: Row) -> Result<Row, BackendError> {
        self.guard_online()?;
        let now = self.now()?;
        let (stored, event) = self.with_database(|db| db.upsert_row(table, row, now))?;
        self.publish(event, table, &stored);
        Ok(stored)
    }

    async fn delete(&self, table: Table, id: Uuid) -> Result<(), BackendError> {
        self.guard_online()?;
        let removed = self.with_database(|db| db.delete_row(table, id))?;
        self.publish(EventKind::Delete, table, &removed);
        Ok(())
    }

    fn subscribe(
        &self,
        table: Table,
        events: EventMask,
        filter: Filter,
    ) -> Result<PushStream, BackendError> {
        self.guard_online()?;
        Ok(self.hub.subscribe(table, events, filter))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.unsubscribe(id);
    }
}

#[async_trait]
impl IdentityService for LocalBackend {
    async fn current_session(&self) -> Result<Option<AuthRecord>, BackendError> {
        let session = self
            .session
            .lock()
            .map_err(|_| BackendError::from(StoreError::Poisoned))?;
        Ok(session.clone())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthRecord, BackendError> {
        self.guard_online()?;
        let now = self.now()?;
        let record =
            self.with_database(|db| db.create_account(email, password, Uuid::new_v4(), now))?;
        self.set_session(Some(record.clone()))?;
        Ok(record)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthRecord, BackendError> {
        self.guard_online()?;
        let record = self.with_database(|db| db.verify_credentials(email, password))?;
        self.set_session(Some(record.clone()))?;
        info!(user = %record.id, "signed in");
        Ok(record)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_session(None)
    }

    async fn list_auth_records(&self) -> Result<Vec<AuthRecord>, BackendError> {
        self.guard_online()?;
        self.with_database(|db| db.list_accounts())
    }
}

impl LocalBackend {
    fn set_session(&self, record: Option<AuthRecord>) -> Result<(), BackendError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| BackendError::from(StoreError::Poisoned))?;
        *session = record;
        Ok(())
    }
}
