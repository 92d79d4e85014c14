//! Data models for Ponder entities.
//!
//! This module defines the core data structures:
//! - `Feature` - Named groupings that own tasks
//! - `Task` - Units of work with status, priority, and timestamps
//! - `Dependency` - Directed edges from a task to its prerequisite
//! - `StagedItems` - A session's buffer of proposed entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    /// Parse from string, as stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    /// The database/string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named grouping that owns a set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Unique identifier (36-char opaque string)
    #[serde(default)]
    pub id: String,

    /// Feature name (max 55 chars, globally unique)
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub specification: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    /// Create a new feature with the given name. The store assigns the id
    /// and timestamps on insert.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            specification: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A unit of work belonging to exactly one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (36-char opaque string)
    #[serde(default)]
    pub id: String,

    /// Owning feature id
    #[serde(default)]
    pub feature_id: String,

    /// Task name (max 55 chars, unique within its feature)
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub specification: String,

    /// Priority 0-10, higher runs first
    #[serde(default)]
    pub priority: i64,

    /// Whether the agent is expected to write tests for this task
    #[serde(default = "default_true")]
    pub tests_required: bool,

    #[serde(default)]
    pub status: TaskStatus,

    /// Required to be set when status is `completed`
    #[serde(default)]
    pub completion_summary: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Set exactly once, on the first transition into `in_progress`
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Set exactly once, on the first transition into `completed`
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Owning feature name, populated by joined queries and used for
    /// staging resolution.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature_name: String,
}

fn default_true() -> bool {
    true
}

impl Task {
    /// Create a new pending task under the given feature. The store assigns
    /// the id and timestamps on insert.
    pub fn new(feature_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            feature_id: feature_id.into(),
            name: name.into(),
            description: String::new(),
            specification: String::new(),
            priority: 0,
            tests_required: true,
            status: TaskStatus::Pending,
            completion_summary: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            feature_name: String::new(),
        }
    }
}

/// A directed edge: `task_id` cannot run until `depends_on_task_id` is
/// completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub task_id: String,

    #[serde(default)]
    pub depends_on_task_id: String,

    // Name fields carried for staging and snapshot resolution, where edges
    // may refer to tasks that have no id yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub depends_on_task_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub depends_on_feature_name: String,
}

/// Proposed entities buffered under a single staging session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagedItems {
    pub features: Vec<Feature>,
    pub tasks: Vec<Task>,
    pub dependencies: Vec<Dependency>,
}

impl StagedItems {
    /// True when nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty() && self.tasks.is_empty() && self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, TaskStatus::Blocked);
    }

    #[test]
    fn test_task_new_defaults() {
        let t = Task::new("f1", "build parser");
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.tests_required);
        assert_eq!(t.priority, 0);
        assert!(t.id.is_empty());
    }

    #[test]
    fn test_staged_items_is_empty() {
        let mut items = StagedItems::default();
        assert!(items.is_empty());
        items.tasks.push(Task::new("f", "t"));
        assert!(!items.is_empty());
    }
}
