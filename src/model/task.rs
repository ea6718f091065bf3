//! Task model.
//!
//! Tasks form a forest through `parent_id` and belong to one or more
//! categories. Only the fields the document mirror cares about are typed
//! strictly; the rest travel along unchanged.

use serde::{Deserialize, Serialize};

/// Completion state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Completed,
}

impl TaskStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
        }
    }

    /// Status for a checkbox state.
    #[must_use]
    pub const fn from_checked(checked: bool) -> Self {
        if checked { Self::Completed } else { Self::Open }
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

/// A task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (`task_` prefix)
    pub id: String,

    pub title: String,

    pub description: Option<String>,

    pub status: TaskStatus,

    /// Parent task; a dangling reference is treated as a root
    pub parent_id: Option<String>,

    /// Categories this task is exported under
    pub category_ids: Vec<String>,

    /// Manual order key among siblings (ascending)
    pub sort_order: i64,

    /// Due date (Unix milliseconds)
    pub due_at: Option<i64>,

    /// Free-form recurrence rule, carried but not interpreted
    pub recurrence: Option<String>,

    /// Set iff `status` is `Completed` (Unix milliseconds)
    pub completed_at: Option<i64>,

    pub created_at: i64,

    pub updated_at: i64,
}

impl Task {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub category_ids: Vec<String>,
    pub due_at: Option<i64>,
    pub recurrence: Option<String>,
    /// Explicit order key; appended after existing tasks when `None`
    pub sort_order: Option<i64>,
}

impl NewTask {
    /// A task with a title in a single category.
    #[must_use]
    pub fn in_category(title: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category_ids: vec![category_id.into()],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Partial field changes for a task.
///
/// `None` leaves a field untouched. For `parent_id`, `Some(None)` detaches
/// the task to the root level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl TaskChanges {
    /// Only a status change.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Only a parent change.
    #[must_use]
    pub fn parent(parent_id: Option<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    /// Returns true if no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.parent_id.is_none()
            && self.sort_order.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [TaskStatus::Open, TaskStatus::Completed] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_from_checked() {
        assert_eq!(TaskStatus::from_checked(true), TaskStatus::Completed);
        assert_eq!(TaskStatus::from_checked(false), TaskStatus::Open);
    }

    #[test]
    fn test_changes_is_empty() {
        assert!(TaskChanges::default().is_empty());
        assert!(!TaskChanges::status(TaskStatus::Completed).is_empty());
        assert!(!TaskChanges::parent(None).is_empty());
    }

    #[test]
    fn test_new_task_in_category() {
        let input = NewTask::in_category("Buy milk", "cat_1").with_parent(Some("task_2".into()));
        assert_eq!(input.category_ids, vec!["cat_1".to_string()]);
        assert_eq!(input.parent_id.as_deref(), Some("task_2"));
        assert!(input.sort_order.is_none());
    }
}
