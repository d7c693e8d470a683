//! The explicitly owned set of stores and channels for one signed-in client.

use std::sync::Arc;

use anyhow::Context;
use teamdesk_shared::models::{AuthRecord, Message, MessageDraft, Project, Task};
use teamdesk_shared::{Backend, EventMask, IdentityService};
use teamdesk_store::{Database, LocalBackend};
use tracing::info;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::coordinator::PendingSend;
use crate::entity::Entity;
use crate::error::{Result, SyncError};
use crate::scope::Scope;
use crate::store::EntityStore;
use crate::subscription::{ChannelGuard, ChannelKey, ChannelSpec, Resync, SubscriptionManager};
use crate::users::UserStore;

/// Channels held open for an activated view. Closing or dropping it
/// releases all of them.
#[derive(Debug)]
#[must_use = "dropping the scope closes its channels"]
pub struct ActiveScope {
    channels: Vec<ChannelGuard>,
}

impl ActiveScope {
    pub fn keys(&self) -> Vec<ChannelKey> {
        self.channels.iter().map(ChannelGuard::key).collect()
    }

    pub async fn close(self) {
        for guard in self.channels {
            guard.close().await;
        }
    }
}

pub struct Session {
    identity: Arc<dyn IdentityService>,
    config: ClientConfig,
    projects: EntityStore<Project>,
    tasks: EntityStore<Task>,
    messages: EntityStore<Message>,
    users: UserStore,
    channels: SubscriptionManager,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, identity: Arc<dyn IdentityService>, config: ClientConfig) -> Self {
        let reruns = config.max_fetch_reruns;
        Self {
            projects: EntityStore::new(backend.clone(), reruns),
            tasks: EntityStore::new(backend.clone(), reruns),
            messages: EntityStore::new(backend.clone(), reruns),
            users: UserStore::new(backend.clone(), identity.clone(), reruns),
            channels: SubscriptionManager::new(backend),
            identity,
            config,
        }
    }

    /// Session over the local reference backend described by `config`.
    pub fn open_local(config: ClientConfig) -> anyhow::Result<(Self, Arc<LocalBackend>)> {
        let db = match &config.database_path {
            Some(path) => Database::open_at(path)
                .with_context(|| format!("opening database at {}", path.display()))?,
            None => Database::open_default().context("opening default database")?,
        };
        info!(path = ?db.path(), "local backend ready");

        let backend = Arc::new(LocalBackend::new(db, config.push_buffer));
        let session = Self::new(backend.clone(), backend.clone(), config);
        Ok((session, backend))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn projects(&self) -> &EntityStore<Project> {
        &self.projects
    }

    pub fn tasks(&self) -> &EntityStore<Task> {
        &self.tasks
    }

    pub fn messages(&self) -> &EntityStore<Message> {
        &self.messages
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn channels(&self) -> &SubscriptionManager {
        &self.channels
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthRecord> {
        let record = self.identity.sign_up(email, password).await?;
        info!(user = %record.id, "signed up");
        Ok(record)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthRecord> {
        Ok(self.identity.sign_in(email, password).await?)
    }

    /// Close every channel, empty every cache, then end the backend session.
    pub async fn sign_out(&self) -> Result<()> {
        self.channels.close_all();
        self.projects.reset();
        self.tasks.reset();
        self.messages.reset();
        self.users.reset();
        self.identity.sign_out().await?;
        info!("signed out");
        Ok(())
    }

    pub async fn current_user_id(&self) -> Result<Uuid> {
        self.identity
            .current_session()
            .await?
            .map(|record| record.id)
            .ok_or(SyncError::Unauthenticated)
    }

    fn open_for<T: Entity, R: Resync>(&self, scope: Scope, events: EventMask, target: R) -> Result<ChannelGuard> {
        self.channels.open(ChannelSpec::for_entity::<T>(scope, events)?, target)
    }

    /// Team overview: the team's projects.
    pub async fn activate_team(&self, team_id: Uuid) -> Result<ActiveScope> {
        let scope = Scope::Team(team_id);
        // Opened before the fetch so no change between the two is missed.
        let projects = self.open_for::<Project, _>(scope, EventMask::ALL, self.projects.clone())?;
        self.projects.fetch(scope).await?;
        Ok(ActiveScope {
            channels: vec![projects],
        })
    }

    /// The team from [`ClientConfig::team_id`], if one is configured.
    pub async fn activate_configured_team(&self) -> Result<Option<ActiveScope>> {
        match self.config.team_id {
            Some(team_id) => Ok(Some(self.activate_team(team_id).await?)),
            None => Ok(None),
        }
    }

    /// Project detail: its tasks, its chat and the user directory.
    pub async fn activate_project(&self, project_id: Uuid) -> Result<ActiveScope> {
        let scope = Scope::Project(project_id);
        let channels = vec![
            self.open_for::<Task, _>(scope, EventMask::ALL, self.tasks.clone())?,
            self.open_for::<Message, _>(scope, EventMask::INSERT, self.messages.clone())?,
            self.channels.open(ChannelSpec::profiles(), self.users.clone())?,
        ];
        // Every fetch settles before the first error is reported.
        let (tasks, messages, users) = tokio::join!(
            self.tasks.fetch(scope),
            self.messages.fetch(scope),
            self.users.fetch(),
        );
        tasks?;
        messages?;
        users?;
        Ok(ActiveScope { channels })
    }

    /// Cross-project chat.
    pub async fn activate_global_chat(&self) -> Result<ActiveScope> {
        let channels = vec![
            self.open_for::<Message, _>(Scope::Global, EventMask::INSERT, self.messages.clone())?,
            self.channels.open(ChannelSpec::profiles(), self.users.clone())?,
        ];
        let (messages, users) = tokio::join!(self.messages.fetch(Scope::Global), self.users.fetch());
        messages?;
        users?;
        Ok(ActiveScope { channels })
    }

    /// Send `text` as the signed-in user to a project chat, or to the
    /// global chat when `project_id` is `None`.
    ///
    /// Returns once the placeholder is visible; the insert continues in the
    /// background.
    pub async fn send_message(&self, project_id: Option<Uuid>, text: &str) -> Result<PendingSend<Message>> {
        let mut draft = MessageDraft {
            sender_id: Uuid::nil(),
            receiver_id: None,
            project_id,
            message: text.trim().to_string(),
        };
        Message::validate_draft(&draft)?;
        draft.sender_id = self.current_user_id().await?;
        self.messages.submit(draft)
    }
}
