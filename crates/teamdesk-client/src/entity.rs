//! Per-table behaviour plugged into the generic [`crate::EntityStore`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use teamdesk_shared::models::{
    Message, MessageDraft, Project, ProjectDraft, ProjectPatch, Task, TaskDraft, TaskPatch,
};
use teamdesk_shared::{Filter, Order, Row, Table};
use uuid::Uuid;

use crate::cache::Cached;
use crate::coordinator::MutationPolicy;
use crate::error::{Result, SyncError};
use crate::scope::Scope;

pub trait Entity: Cached + DeserializeOwned {
    type Draft: Serialize + Send + Sync + 'static;

    const TABLE: Table;

    /// Column the backend orders by; agrees with [`Cached::sort_key`].
    const SORT_COLUMN: &'static str = "created_at";

    const POLICY: MutationPolicy;

    /// Backend filter for `scope`, or a validation error for scopes this
    /// table cannot be read by.
    fn filter_for(scope: Scope) -> Result<Filter>;

    fn validate_draft(draft: &Self::Draft) -> Result<()>;

    /// Local stand-in shown while an echo-wait insert is outstanding.
    /// Entities without one rely on the push echo alone.
    fn placeholder(_draft: &Self::Draft, _temp_id: Uuid, _at: DateTime<Utc>) -> Option<Self> {
        None
    }

    fn order() -> Order {
        if Self::ASCENDING {
            Order::asc(Self::SORT_COLUMN)
        } else {
            Order::desc(Self::SORT_COLUMN)
        }
    }
}

/// Entities that may be edited and removed after creation.
pub trait MutableEntity: Entity {
    type Patch: Serialize + Send + Sync + 'static;

    fn validate_patch(patch: &Self::Patch) -> Result<()>;
}

pub(crate) fn to_row<S: Serialize>(value: &S) -> Result<Row> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(SyncError::Decode(format!("expected an object, got {other}"))),
    }
}

pub(crate) fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn unsupported(table: Table, scope: Scope) -> SyncError {
    SyncError::validation(format!("{table} cannot be scoped by {scope}"))
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

impl Cached for Project {
    const ASCENDING: bool = false;

    fn key(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn in_scope(&self, scope: Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Team(team) => self.team_id == team,
            Scope::Project(_) | Scope::Global => false,
        }
    }
}

impl Entity for Project {
    type Draft = ProjectDraft;
    const TABLE: Table = Table::Projects;
    const POLICY: MutationPolicy = MutationPolicy::SyncConfirm;

    fn filter_for(scope: Scope) -> Result<Filter> {
        match scope {
            Scope::All => Ok(Filter::All),
            Scope::Team(team) => Ok(Filter::eq_id("team_id", team)),
            other => Err(unsupported(Self::TABLE, other)),
        }
    }

    fn validate_draft(draft: &ProjectDraft) -> Result<()> {
        require_text("project title", &draft.title)
    }
}

impl MutableEntity for Project {
    type Patch = ProjectPatch;

    fn validate_patch(patch: &ProjectPatch) -> Result<()> {
        match &patch.title {
            Some(title) => require_text("project title", title),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

impl Cached for Task {
    const ASCENDING: bool = false;

    fn key(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn in_scope(&self, scope: Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Project(project) => self.project_id == project,
            Scope::Team(_) | Scope::Global => false,
        }
    }
}

impl Entity for Task {
    type Draft = TaskDraft;
    const TABLE: Table = Table::Tasks;
    const POLICY: MutationPolicy = MutationPolicy::SyncConfirm;

    fn filter_for(scope: Scope) -> Result<Filter> {
        match scope {
            Scope::All => Ok(Filter::All),
            Scope::Project(project) => Ok(Filter::eq_id("project_id", project)),
            other => Err(unsupported(Self::TABLE, other)),
        }
    }

    fn validate_draft(draft: &TaskDraft) -> Result<()> {
        require_text("task title", &draft.title)
    }
}

impl MutableEntity for Task {
    type Patch = TaskPatch;

    fn validate_patch(patch: &TaskPatch) -> Result<()> {
        match &patch.title {
            Some(title) => require_text("task title", title),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

impl Cached for Message {
    const ASCENDING: bool = true;

    fn key(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn in_scope(&self, scope: Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Project(project) => self.project_id == Some(project),
            Scope::Global => self.project_id.is_none(),
            Scope::Team(_) => false,
        }
    }

    fn confirms(&self, placeholder: &Self) -> bool {
        self.sender_id == placeholder.sender_id
            && self.project_id == placeholder.project_id
            && self.message == placeholder.message
    }
}

impl Entity for Message {
    type Draft = MessageDraft;
    const TABLE: Table = Table::Messages;
    const POLICY: MutationPolicy = MutationPolicy::EchoWait;

    fn filter_for(scope: Scope) -> Result<Filter> {
        match scope {
            Scope::All => Ok(Filter::All),
            Scope::Project(project) => Ok(Filter::eq_id("project_id", project)),
            Scope::Global => Ok(Filter::is_null("project_id")),
            other => Err(unsupported(Self::TABLE, other)),
        }
    }

    fn validate_draft(draft: &MessageDraft) -> Result<()> {
        require_text("message", &draft.message)
    }

    fn placeholder(draft: &MessageDraft, temp_id: Uuid, at: DateTime<Utc>) -> Option<Self> {
        Some(Message {
            id: temp_id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            project_id: draft.project_id,
            message: draft.message.clone(),
            created_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use teamdesk_shared::models::TaskStatus;

    #[test]
    fn test_scope_support() {
        let id = Uuid::new_v4();
        assert!(Project::filter_for(Scope::Team(id)).is_ok());
        assert!(matches!(
            Project::filter_for(Scope::Project(id)),
            Err(SyncError::Validation(_))
        ));
        assert!(Task::filter_for(Scope::All).is_ok());
        assert!(Task::filter_for(Scope::Global).is_err());
        assert_eq!(
            Message::filter_for(Scope::Global).unwrap(),
            Filter::is_null("project_id")
        );
    }

    #[test]
    fn test_orders() {
        assert_eq!(Project::order(), Order::desc("created_at"));
        assert_eq!(Task::order(), Order::desc("created_at"));
        assert_eq!(Message::order(), Order::asc("created_at"));
    }

    #[test]
    fn test_blank_titles_rejected() {
        let draft = TaskDraft {
            project_id: Uuid::new_v4(),
            title: "   ".into(),
            description: None,
            status: TaskStatus::NotStarted,
            assigned_to: None,
            due_date: None,
        };
        assert!(matches!(
            Task::validate_draft(&draft),
            Err(SyncError::Validation(_))
        ));
        let patch = TaskPatch {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(Task::validate_patch(&patch).is_err());
        assert!(Task::validate_patch(&TaskPatch::default()).is_ok());
    }

    #[test]
    fn test_draft_row_has_no_server_columns() {
        let draft = MessageDraft {
            sender_id: Uuid::new_v4(),
            receiver_id: None,
            project_id: None,
            message: "hello".into(),
        };
        let row = to_row(&draft).unwrap();
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("created_at"));
        assert_eq!(row["project_id"], json!(null));
    }

    #[test]
    fn test_message_confirms_placeholder() {
        let draft = MessageDraft {
            sender_id: Uuid::new_v4(),
            receiver_id: None,
            project_id: Some(Uuid::new_v4()),
            message: "hello".into(),
        };
        let placeholder = Message::placeholder(&draft, Uuid::new_v4(), Utc::now()).unwrap();
        let canonical = Message {
            id: Uuid::new_v4(),
            ..placeholder.clone()
        };
        assert!(canonical.confirms(&placeholder));

        let other = Message {
            message: "different".into(),
            ..canonical
        };
        assert!(!other.confirms(&placeholder));
    }
}
