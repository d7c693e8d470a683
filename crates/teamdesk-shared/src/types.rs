use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A row as exchanged with the backend: a flat JSON object keyed by column.
pub type Row = serde_json::Map<String, Value>;

/// Remote tables the client reads from and writes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Projects,
    Tasks,
    Messages,
    Profiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Projects => "projects",
            Table::Tasks => "tasks",
            Table::Messages => "messages",
            Table::Profiles => "profiles",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row predicate for scoped reads and push subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row of the table.
    All,
    /// `column = value`.
    Eq { column: &'static str, value: Value },
    /// `column IS NULL`.
    IsNull { column: &'static str },
}

impl Filter {
    pub fn eq_id(column: &'static str, id: Uuid) -> Self {
        Filter::Eq {
            column,
            value: Value::String(id.to_string()),
        }
    }

    pub fn is_null(column: &'static str) -> Self {
        Filter::IsNull { column }
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { column, value } => row.get(*column) == Some(value),
            Filter::IsNull { column } => matches!(row.get(*column), None | Some(Value::Null)),
        }
    }
}

/// Sort order of a scoped read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

impl Order {
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Kind of change carried by a push notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// Set of [`EventKind`]s a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u8);

impl EventMask {
    pub const INSERT: Self = Self(0b001);
    pub const UPDATE: Self = Self(0b010);
    pub const DELETE: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        let bit = match kind {
            EventKind::Insert => Self::INSERT.0,
            EventKind::Update => Self::UPDATE.0,
            EventKind::Delete => Self::DELETE.0,
        };
        self.0 & bit != 0
    }
}

/// Handle identifying one registration against the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_eq_matches_string_ids() {
        let id = Uuid::new_v4();
        let filter = Filter::eq_id("project_id", id);
        assert!(filter.matches(&row(json!({ "project_id": id.to_string() }))));
        assert!(!filter.matches(&row(json!({ "project_id": Uuid::new_v4().to_string() }))));
        assert!(!filter.matches(&row(json!({ "project_id": null }))));
    }

    #[test]
    fn test_filter_is_null_treats_missing_as_null() {
        let filter = Filter::is_null("project_id");
        assert!(filter.matches(&row(json!({ "project_id": null }))));
        assert!(filter.matches(&row(json!({}))));
        assert!(!filter.matches(&row(json!({ "project_id": "x" }))));
    }

    #[test]
    fn test_event_mask() {
        assert!(EventMask::ALL.contains(EventKind::Delete));
        assert!(!EventMask::INSERT.contains(EventKind::Update));
        let mask = EventMask::INSERT.union(EventMask::DELETE);
        assert!(mask.contains(EventKind::Delete));
        assert!(!mask.contains(EventKind::Update));
    }
}
