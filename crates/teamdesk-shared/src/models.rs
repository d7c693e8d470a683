//! Domain model structs exchanged with the remote backend.
//!
//! Canonical rows (`Project`, `Task`, `Message`, `ProfileRecord`) derive both
//! `Serialize` and `Deserialize` and map one-to-one onto backend columns.
//! Drafts omit everything the backend assigns (id, timestamps); patches carry
//! only the fields being changed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    Active,
    Completed,
    Archived,
}

/// A project owned by one team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub team_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    /// Free-form labels, in the order the author entered them.
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectDraft {
    pub team_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    Started,
    #[serde(rename = "In Progress")]
    InProgress,
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

/// A unit of work inside a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskDraft {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message. Immutable once the backend has accepted it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    /// Direct-message recipient. Carried through but not used for scoping.
    pub receiver_id: Option<Uuid>,
    /// `None` places the message in the global channel.
    pub project_id: Option<Uuid>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A record from the authentication service. Canonical for identity fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRecord {
    pub id: Uuid,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row of the `profiles` table, keyed by the auth record id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
}

/// The merged view of one person, built from an [`AuthRecord`] and an
/// optional [`ProfileRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Resolved display name. Never blank.
    pub username: String,
    pub phone: Option<String>,
    pub joined_at: DateTime<Utc>,
    /// Whether a profile row backs this user.
    pub has_profile: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_status_wire_names() {
        assert_eq!(
            serde_json::to_value(TaskStatus::NotStarted).unwrap(),
            json!("Not Started")
        );
        assert_eq!(
            serde_json::from_value::<TaskStatus>(json!("In Progress")).unwrap(),
            TaskStatus::InProgress
        );
    }

    #[test]
    fn test_patch_serializes_only_changed_fields() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            assigned_to: Some(None),
            ..Default::default()
        };
        let value = serde_json::to_value(patch).unwrap();
        assert_eq!(value, json!({ "status": "Completed", "assigned_to": null }));
    }

    #[test]
    fn test_project_tags_default_to_empty() {
        let now = Utc::now();
        let project: Project = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "team_id": Uuid::new_v4(),
            "title": "Launch",
            "description": null,
            "status": "Active",
            "created_at": now,
            "updated_at": now,
        }))
        .unwrap();
        assert!(project.tags.is_empty());
    }
}
