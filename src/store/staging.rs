//! Per-session staging buffers for proposed changes.
//!
//! Planners stage features, tasks, and dependencies under a session key and
//! commit them later as one transaction (see [`crate::store::batch`]).
//! Staging performs no validation beyond shape: a task may reference a
//! feature that only exists elsewhere in the same batch.

use crate::models::{Dependency, Feature, StagedItems, Task};
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe map of session key to staged items. Buffers are in-memory
/// only and lost on process exit.
#[derive(Debug, Default)]
pub struct StagingManager {
    staged: RwLock<HashMap<String, StagedItems>>,
}

impl StagingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a feature under the given session.
    pub fn add_feature(&self, session_id: &str, feature: Feature) {
        let mut staged = self.staged.write().unwrap();
        staged
            .entry(session_id.to_string())
            .or_default()
            .features
            .push(feature);
    }

    /// Stage a task under the given session. The task carries its owning
    /// feature by name.
    pub fn add_task(&self, session_id: &str, task: Task) {
        let mut staged = self.staged.write().unwrap();
        staged
            .entry(session_id.to_string())
            .or_default()
            .tasks
            .push(task);
    }

    /// Stage a dependency under the given session. Both endpoints are
    /// carried by (feature name, task name).
    pub fn add_dependency(&self, session_id: &str, dep: Dependency) {
        let mut staged = self.staged.write().unwrap();
        staged
            .entry(session_id.to_string())
            .or_default()
            .dependencies
            .push(dep);
    }

    /// Copy the staged items for a session without consuming them.
    /// Returns an empty buffer for an unknown session.
    pub fn peek(&self, session_id: &str) -> StagedItems {
        let staged = self.staged.read().unwrap();
        staged.get(session_id).cloned().unwrap_or_default()
    }

    /// Atomically take and remove all staged items for a session.
    /// Returns an empty buffer for an unknown session.
    pub fn get_and_clear(&self, session_id: &str) -> StagedItems {
        let mut staged = self.staged.write().unwrap();
        staged.remove(session_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_round_trip() {
        let staging = StagingManager::new();
        staging.add_feature("sess1", Feature::new("auth"));
        staging.add_task("sess1", Task::new("", "hash"));
        staging.add_dependency(
            "sess1",
            Dependency {
                task_name: "login".into(),
                feature_name: "auth".into(),
                depends_on_task_name: "hash".into(),
                depends_on_feature_name: "auth".into(),
                ..Default::default()
            },
        );

        let peeked = staging.peek("sess1");
        assert_eq!(peeked.features.len(), 1);
        assert_eq!(peeked.tasks.len(), 1);
        assert_eq!(peeked.dependencies.len(), 1);

        // Peek does not consume.
        assert!(!staging.peek("sess1").is_empty());

        let taken = staging.get_and_clear("sess1");
        assert_eq!(taken.features[0].name, "auth");
        assert!(staging.peek("sess1").is_empty());
        assert!(staging.get_and_clear("sess1").is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let staging = StagingManager::new();
        staging.add_feature("a", Feature::new("one"));
        staging.add_feature("b", Feature::new("two"));

        assert_eq!(staging.peek("a").features[0].name, "one");
        assert_eq!(staging.peek("b").features[0].name, "two");

        staging.get_and_clear("a");
        assert!(staging.peek("a").is_empty());
        assert_eq!(staging.peek("b").features.len(), 1);
    }

    #[test]
    fn test_unknown_session_returns_empty() {
        let staging = StagingManager::new();
        assert!(staging.peek("nope").is_empty());
        assert!(staging.get_and_clear("nope").is_empty());
    }
}
