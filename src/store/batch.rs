//! Atomic commit of staged changes.
//!
//! A session's staged features, tasks, and dependencies are applied inside
//! one transaction. Names are resolved against the batch first, then the
//! store, so a dependency may reference a task staged later in the same
//! batch. Any failure rolls the whole batch back.

use crate::store::{self, Store};
use crate::{Error, Result};
use std::collections::HashMap;

impl Store {
    /// Take the session's staged items and apply them as one transaction.
    /// An unknown or empty session is a no-op. Fires a single change
    /// notification on success.
    pub fn commit_batch(&self, session_id: &str) -> Result<()> {
        let items = self.staging.get_and_clear(session_id);
        if items.is_empty() {
            return Ok(());
        }

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            // Feature name -> id, for resolving tasks staged in this batch.
            let mut feature_ids: HashMap<String, String> = HashMap::new();
            // (feature name, task name) -> id, for resolving dependencies.
            let mut task_ids: HashMap<(String, String), String> = HashMap::new();

            for mut feature in items.features {
                store::insert_feature(&tx, &mut feature)?;
                feature_ids.insert(feature.name.clone(), feature.id.clone());
            }

            for mut task in items.tasks {
                if task.feature_id.is_empty() {
                    let feature_id = match feature_ids.get(&task.feature_name) {
                        Some(id) => id.clone(),
                        None => store::feature_by_name(&tx, &task.feature_name)?
                            .map(|f| f.id)
                            .ok_or_else(|| {
                                Error::UnresolvedReference(format!(
                                    "feature '{}' not found for task '{}'",
                                    task.feature_name, task.name
                                ))
                            })?,
                    };
                    task.feature_id = feature_id;
                }
                store::insert_task(&tx, &mut task)?;
                task_ids.insert(
                    (task.feature_name.clone(), task.name.clone()),
                    task.id.clone(),
                );
            }

            for dep in items.dependencies {
                let task_id = if dep.task_id.is_empty() {
                    let key = (dep.feature_name.clone(), dep.task_name.clone());
                    match task_ids.get(&key) {
                        Some(id) => id.clone(),
                        None => resolve_or_unresolved(&tx, &dep.feature_name, &dep.task_name)?,
                    }
                } else {
                    dep.task_id
                };

                let depends_on_id = if dep.depends_on_task_id.is_empty() {
                    let key = (
                        dep.depends_on_feature_name.clone(),
                        dep.depends_on_task_name.clone(),
                    );
                    match task_ids.get(&key) {
                        Some(id) => id.clone(),
                        None => resolve_or_unresolved(
                            &tx,
                            &dep.depends_on_feature_name,
                            &dep.depends_on_task_name,
                        )?,
                    }
                } else {
                    dep.depends_on_task_id
                };

                store::insert_dependency(&tx, &task_id, &depends_on_id)?;
            }

            tx.commit()?;
        }

        self.notify();
        Ok(())
    }
}

/// Name resolution against the store half of the batch: a missing entity is
/// a resolution failure, everything else propagates untouched.
fn resolve_or_unresolved(
    conn: &rusqlite::Connection,
    feature_name: &str,
    task_name: &str,
) -> Result<String> {
    match store::resolve_task_id(conn, feature_name, task_name) {
        Ok(id) => Ok(id),
        Err(Error::NotFound(_)) => Err(Error::UnresolvedReference(format!(
            "task '{feature_name}:{task_name}' not found for dependency"
        ))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dependency, Feature, Task, TaskStatus};
    use crate::test_utils::{mem_store, seed_feature, seed_task};

    fn staged_dep(feature: &str, task: &str, on_feature: &str, on_task: &str) -> Dependency {
        Dependency {
            feature_name: feature.into(),
            task_name: task.into(),
            depends_on_feature_name: on_feature.into(),
            depends_on_task_name: on_task.into(),
            ..Default::default()
        }
    }

    fn staged_task(feature: &str, name: &str, priority: i64) -> Task {
        let mut t = Task::new("", name);
        t.feature_name = feature.into();
        t.priority = priority;
        t
    }

    #[test]
    fn test_commit_empty_session_is_noop() {
        let store = mem_store();
        store.commit_batch("nothing-here").unwrap();
        assert!(store.list_features().unwrap().is_empty());
    }

    #[test]
    fn test_commit_resolves_forward_references() {
        let store = mem_store();
        store.staging.add_feature("sess1", Feature::new("auth"));
        store.staging.add_task("sess1", staged_task("auth", "hash", 7));
        // The dependency references "login" before it is staged.
        store
            .staging
            .add_dependency("sess1", staged_dep("auth", "login", "auth", "hash"));
        store.staging.add_task("sess1", staged_task("auth", "login", 9));

        store.commit_batch("sess1").unwrap();

        let feature = store.get_feature_by_name("auth").unwrap().unwrap();
        let hash = store.get_task_by_name("hash", &feature.id).unwrap().unwrap();
        let login = store
            .get_task_by_name("login", &feature.id)
            .unwrap()
            .unwrap();
        assert_eq!(hash.priority, 7);
        assert_eq!(login.priority, 9);

        let deps = store.get_dependencies(&login.id).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, hash.id);

        // Staging buffer was consumed.
        assert!(store.staging.peek("sess1").is_empty());
    }

    #[test]
    fn test_commit_resolves_against_store() {
        let store = mem_store();
        let f = seed_feature(&store, "auth");
        seed_task(&store, &f.id, "existing", 0);

        store.staging.add_task("s", staged_task("auth", "new-task", 3));
        store
            .staging
            .add_dependency("s", staged_dep("auth", "new-task", "auth", "existing"));
        store.commit_batch("s").unwrap();

        let new_task = store.get_task_by_name("new-task", &f.id).unwrap().unwrap();
        assert_eq!(store.get_dependencies(&new_task.id).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_unresolved_feature_rolls_back() {
        let store = mem_store();
        store.staging.add_feature("s", Feature::new("real"));
        store.staging.add_task("s", staged_task("ghost", "orphan", 0));

        let err = store.commit_batch("s").unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference(_)));

        // Nothing leaked, not even the valid feature.
        assert!(store.list_features().unwrap().is_empty());
        assert!(store.list_tasks(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_commit_unresolved_dependency_rolls_back() {
        let store = mem_store();
        store.staging.add_feature("s", Feature::new("auth"));
        store.staging.add_task("s", staged_task("auth", "real", 0));
        store
            .staging
            .add_dependency("s", staged_dep("auth", "real", "auth", "ghost"));

        assert!(matches!(
            store.commit_batch("s"),
            Err(Error::UnresolvedReference(_))
        ));
        assert!(store.list_features().unwrap().is_empty());
    }

    #[test]
    fn test_commit_cycle_rolls_back() {
        let store = mem_store();
        store.staging.add_feature("s", Feature::new("auth"));
        store.staging.add_task("s", staged_task("auth", "a", 0));
        store.staging.add_task("s", staged_task("auth", "b", 0));
        store
            .staging
            .add_dependency("s", staged_dep("auth", "a", "auth", "b"));
        store
            .staging
            .add_dependency("s", staged_dep("auth", "b", "auth", "a"));

        assert!(matches!(store.commit_batch("s"), Err(Error::CycleDetected)));
        assert!(store.list_features().unwrap().is_empty());
    }

    #[test]
    fn test_commit_duplicate_feature_rolls_back() {
        let store = mem_store();
        seed_feature(&store, "auth");
        store.staging.add_feature("s", Feature::new("auth"));
        store.staging.add_feature("s", Feature::new("fresh"));

        assert!(matches!(store.commit_batch("s"), Err(Error::Duplicate(_))));
        assert!(store.get_feature_by_name("fresh").unwrap().is_none());
    }

    #[test]
    fn test_commit_fires_single_notification() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let store = mem_store();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        store.set_on_change(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        store.staging.add_feature("s", Feature::new("auth"));
        store.staging.add_task("s", staged_task("auth", "one", 0));
        store.staging.add_task("s", staged_task("auth", "two", 0));
        store.commit_batch("s").unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_committed_tasks_are_pending() {
        let store = mem_store();
        store.staging.add_feature("s", Feature::new("auth"));
        store.staging.add_task("s", staged_task("auth", "t", 0));
        store.commit_batch("s").unwrap();

        let tasks = store.list_tasks(None, None).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }
}
