//! Persistent store for the Ponder task graph.
//!
//! The store owns the data model and enforces every invariant itself:
//! validation elsewhere is advisory, the store refuses violating writes.
//! A single SQLite connection behind a mutex gives single-writer semantics;
//! `claim_next_task` rides that lock plus an `UPDATE .. RETURNING` so two
//! concurrent claimers can never receive the same task.

pub mod batch;
pub mod graph;
pub mod schema;
pub mod snapshot;
pub mod staging;

pub use staging::StagingManager;

use crate::models::{Feature, Task, TaskStatus};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Maximum length for feature and task names.
pub const MAX_NAME_LEN: usize = 55;

/// Valid priority range for tasks.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i64> = 0..=10;

type OnChange = Arc<dyn Fn() + Send + Sync>;

/// Post-write notification hook. A missing callback or a suspended hub
/// means writes proceed silently.
#[derive(Default)]
struct NotifyHub {
    callback: Option<OnChange>,
    disabled: bool,
}

/// The persistent store. All writes serialize behind the connection mutex;
/// readers share the same connection and therefore the same lock.
pub struct Store {
    conn: Mutex<Connection>,
    /// Session-scoped buffers of proposed changes.
    pub staging: StagingManager,
    hub: RwLock<NotifyHub>,
}

impl Store {
    /// Open (or create) a store at the given path and apply the schema.
    /// Parent directories are created as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            staging: StagingManager::new(),
            hub: RwLock::new(NotifyHub::default()),
        })
    }

    // === Change notifications ===

    /// Install the post-write callback. Replaces any previous callback.
    pub fn set_on_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        let mut hub = self.hub.write().unwrap();
        hub.callback = Some(Arc::new(callback));
    }

    /// Temporarily suspend change notifications without uninstalling the
    /// callback.
    pub fn disable_on_change(&self) {
        self.hub.write().unwrap().disabled = true;
    }

    /// Re-enable change notifications.
    pub fn enable_on_change(&self) {
        self.hub.write().unwrap().disabled = false;
    }

    /// Export a JSONL snapshot to `path` after every successful write.
    /// Export errors are logged and never fail the originating write.
    pub fn enable_auto_snapshot(self: &Arc<Self>, path: impl Into<PathBuf>) {
        let path = path.into();
        let weak = Arc::downgrade(self);
        self.set_on_change(move || {
            if let Some(store) = weak.upgrade() {
                if let Err(e) = store.export_snapshot(&path) {
                    tracing::warn!("snapshot export failed: {e}");
                }
            }
        });
    }

    /// Fire the change callback. Callers must have released the connection
    /// lock first: the callback may re-enter the store.
    pub(crate) fn notify(&self) {
        let callback = {
            let hub = self.hub.read().unwrap();
            if hub.disabled {
                return;
            }
            hub.callback.clone()
        };
        if let Some(cb) = callback {
            cb();
        }
    }

    // === Features ===

    /// Insert a new feature. Assigns an id if empty and sets timestamps.
    pub fn create_feature(&self, feature: &mut Feature) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            insert_feature(&conn, feature)?;
        }
        self.notify();
        Ok(())
    }

    /// Look up a feature by id. Not-found is `Ok(None)`.
    pub fn get_feature(&self, id: &str) -> Result<Option<Feature>> {
        let conn = self.conn.lock().unwrap();
        feature_by_id(&conn, id)
    }

    /// Look up a feature by name. Not-found is `Ok(None)`.
    pub fn get_feature_by_name(&self, name: &str) -> Result<Option<Feature>> {
        let conn = self.conn.lock().unwrap();
        feature_by_name(&conn, name)
    }

    /// All features, newest first.
    pub fn list_features(&self) -> Result<Vec<Feature>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, specification, created_at, updated_at
             FROM features ORDER BY created_at DESC, id",
        )?;
        let features = stmt
            .query_map([], feature_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(features)
    }

    /// Update a feature's name, description, and specification.
    pub fn update_feature(&self, feature: &mut Feature) -> Result<()> {
        validate_name("feature", &feature.name)?;
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now();
            let changed = conn
                .execute(
                    "UPDATE features SET name = ?1, description = ?2, specification = ?3,
                     updated_at = ?4 WHERE id = ?5",
                    params![
                        feature.name,
                        feature.description,
                        feature.specification,
                        now,
                        feature.id
                    ],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        Error::Duplicate(format!("feature '{}'", feature.name))
                    } else {
                        e.into()
                    }
                })?;
            if changed == 0 {
                return Err(Error::NotFound(format!("feature {}", feature.id)));
            }
            feature.updated_at = now;
        }
        self.notify();
        Ok(())
    }

    /// Delete a feature. Cascades to its tasks and their dependency rows.
    pub fn delete_feature(&self, id: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            let changed = conn.execute("DELETE FROM features WHERE id = ?1", [id])?;
            if changed == 0 {
                return Err(Error::NotFound(format!("feature {id}")));
            }
        }
        self.notify();
        Ok(())
    }

    // === Tasks ===

    /// Insert a new task. Assigns an id if empty and sets timestamps.
    /// Rejects unknown features and duplicate (name, feature) pairs.
    pub fn create_task(&self, task: &mut Task) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            insert_task(&conn, task)?;
        }
        self.notify();
        Ok(())
    }

    /// Look up a task by id. Not-found is `Ok(None)`.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        task_by_id(&conn, id)
    }

    /// Look up a task by name within a feature. Not-found is `Ok(None)`.
    pub fn get_task_by_name(&self, name: &str, feature_id: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        task_by_name(&conn, name, feature_id)
    }

    /// List tasks, optionally filtered by status and feature name.
    /// Ordered by priority (descending) then creation time.
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        feature_name: Option<&str>,
    ) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT t.id, t.feature_id, t.name, t.description, t.specification,
                    t.priority, t.tests_required, t.status, t.completion_summary,
                    t.created_at, t.updated_at, t.started_at, t.completed_at,
                    f.name AS feature_name
             FROM tasks t
             LEFT JOIN features f ON t.feature_id = f.id
             WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = status {
            sql.push_str(" AND t.status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(feature) = feature_name {
            sql.push_str(" AND f.name = ?");
            args.push(feature.to_string());
        }
        sql.push_str(" ORDER BY t.priority DESC, t.created_at ASC, t.id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(rusqlite::params_from_iter(args), task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Update a task's mutable fields (name, description, specification,
    /// priority, tests_required, owning feature). Status changes go through
    /// [`Store::update_task_status`].
    pub fn update_task(&self, task: &mut Task) -> Result<()> {
        validate_name("task", &task.name)?;
        validate_priority(task.priority)?;
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now();
            let changed = conn
                .execute(
                    "UPDATE tasks SET name = ?1, description = ?2, specification = ?3,
                     priority = ?4, tests_required = ?5, feature_id = ?6, updated_at = ?7
                     WHERE id = ?8",
                    params![
                        task.name,
                        task.description,
                        task.specification,
                        task.priority,
                        task.tests_required as i64,
                        task.feature_id,
                        now,
                        task.id
                    ],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        Error::Duplicate(format!("task '{}'", task.name))
                    } else if is_foreign_key_violation(&e) {
                        Error::NotFound(format!("feature {}", task.feature_id))
                    } else {
                        e.into()
                    }
                })?;
            if changed == 0 {
                return Err(Error::NotFound(format!("task {}", task.id)));
            }
            task.updated_at = now;
        }
        self.notify();
        Ok(())
    }

    /// Transition a task's status, validating against the status machine.
    ///
    /// `started_at` is recorded on the first transition into `in_progress`
    /// and `completed_at` on the first transition into `completed`; neither
    /// is ever overwritten or cleared. Completing requires a summary.
    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            let current =
                task_by_id(&conn, id)?.ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            validate_transition(current.status, status)?;
            if status == TaskStatus::Completed && summary.map_or(true, |s| s.trim().is_empty()) {
                return Err(Error::InvalidInput(
                    "a completion summary is required to complete a task".into(),
                ));
            }
            let now = Utc::now();
            conn.execute(
                "UPDATE tasks SET status = ?1, completion_summary = ?2, updated_at = ?3,
                 started_at = CASE WHEN ?1 = 'in_progress'
                     THEN COALESCE(started_at, ?3) ELSE started_at END,
                 completed_at = CASE WHEN ?1 = 'completed'
                     THEN COALESCE(completed_at, ?3) ELSE completed_at END
                 WHERE id = ?4",
                params![status.as_str(), summary, now, id],
            )?;
        }
        self.notify();
        Ok(())
    }

    /// Delete a task and every dependency edge touching it.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            if changed == 0 {
                return Err(Error::NotFound(format!("task {id}")));
            }
        }
        self.notify();
        Ok(())
    }

    // === Scheduling ===

    /// Tasks that are ready to run: pending with every prerequisite
    /// completed. Ordered by priority (descending), then creation time.
    pub fn get_available_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, feature_id, name, description, specification, priority,
                    tests_required, status, completion_summary, created_at,
                    updated_at, started_at, completed_at, feature_name
             FROM v_available_tasks
             ORDER BY priority DESC, created_at ASC, id ASC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Number of tasks ready to run, without claiming any.
    pub fn count_available_tasks(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM v_available_tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Atomically claim the next available task: the head of the ready
    /// ordering flips to `in_progress` and is returned. Concurrent callers
    /// receive disjoint tasks; `None` means nothing is claimable.
    pub fn claim_next_task(&self) -> Result<Option<Task>> {
        let claimed = {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now();
            let mut task = conn
                .query_row(
                    "UPDATE tasks
                     SET status = 'in_progress',
                         started_at = COALESCE(started_at, ?1),
                         updated_at = ?1
                     WHERE id IN (
                         SELECT id FROM v_available_tasks
                         ORDER BY priority DESC, created_at ASC, id ASC
                         LIMIT 1
                     )
                     RETURNING id, feature_id, name, description, specification,
                               priority, tests_required, status, completion_summary,
                               created_at, updated_at, started_at, completed_at,
                               NULL AS feature_name",
                    params![now],
                    task_from_row,
                )
                .optional()?;
            if let Some(task) = task.as_mut() {
                task.feature_name = conn
                    .query_row(
                        "SELECT name FROM features WHERE id = ?1",
                        [&task.feature_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or_default();
            }
            task
        };
        if claimed.is_some() {
            self.notify();
        }
        Ok(claimed)
    }

    /// Flip every `in_progress` task back to `pending`. Used on supervisor
    /// startup to reclaim tasks orphaned by a crash. `started_at` is kept:
    /// only the first-ever start is recorded.
    pub fn reset_in_progress_tasks(&self) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now();
            conn.execute(
                "UPDATE tasks SET status = 'pending', updated_at = ?1
                 WHERE status = 'in_progress'",
                params![now],
            )?;
        }
        self.notify();
        Ok(())
    }

    // === Dependencies ===

    /// Add an edge: `task_id` depends on `depends_on_task_id`. Rejects
    /// self-edges, unknown endpoints, duplicate edges, and edges that would
    /// close a cycle.
    pub fn create_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            insert_dependency(&conn, task_id, depends_on_task_id)?;
        }
        self.notify();
        Ok(())
    }

    /// Remove an edge. Unlike reads, a missing edge here is an error.
    pub fn delete_dependency(&self, task_id: &str, depends_on_task_id: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            let changed = conn.execute(
                "DELETE FROM dependencies WHERE task_id = ?1 AND depends_on_task_id = ?2",
                params![task_id, depends_on_task_id],
            )?;
            if changed == 0 {
                return Err(Error::NotFound(format!(
                    "dependency {task_id} -> {depends_on_task_id}"
                )));
            }
        }
        self.notify();
        Ok(())
    }

    /// Tasks that `task_id` depends on (its prerequisites).
    pub fn get_dependencies(&self, task_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.feature_id, t.name, t.description, t.specification,
                    t.priority, t.tests_required, t.status, t.completion_summary,
                    t.created_at, t.updated_at, t.started_at, t.completed_at,
                    f.name AS feature_name
             FROM tasks t
             JOIN dependencies d ON t.id = d.depends_on_task_id
             LEFT JOIN features f ON t.feature_id = f.id
             WHERE d.task_id = ?1
             ORDER BY t.priority DESC, t.created_at ASC, t.id ASC",
        )?;
        let tasks = stmt
            .query_map([task_id], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Tasks that depend on `task_id`.
    pub fn get_dependents(&self, task_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.feature_id, t.name, t.description, t.specification,
                    t.priority, t.tests_required, t.status, t.completion_summary,
                    t.created_at, t.updated_at, t.started_at, t.completed_at,
                    f.name AS feature_name
             FROM tasks t
             JOIN dependencies d ON t.id = d.task_id
             LEFT JOIN features f ON t.feature_id = f.id
             WHERE d.depends_on_task_id = ?1
             ORDER BY t.priority DESC, t.created_at ASC, t.id ASC",
        )?;
        let tasks = stmt
            .query_map([task_id], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Resolve a task id from its (feature name, task name) pair.
    pub fn resolve_task_id(&self, feature_name: &str, task_name: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        resolve_task_id(&conn, feature_name, task_name)
    }
}

// === Connection-level helpers ===
//
// These take a plain `&Connection` so the batch committer and snapshot
// importer can reuse them inside a transaction (rusqlite transactions deref
// to the connection).

pub(crate) fn insert_feature(conn: &Connection, feature: &mut Feature) -> Result<()> {
    validate_name("feature", &feature.name)?;
    if feature.id.is_empty() {
        feature.id = Uuid::new_v4().to_string();
    }
    let now = Utc::now();
    feature.created_at = now;
    feature.updated_at = now;
    conn.execute(
        "INSERT INTO features (id, name, description, specification, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            feature.id,
            feature.name,
            feature.description,
            feature.specification,
            now,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::Duplicate(format!("feature '{}'", feature.name))
        } else {
            e.into()
        }
    })?;
    Ok(())
}

pub(crate) fn insert_task(conn: &Connection, task: &mut Task) -> Result<()> {
    validate_name("task", &task.name)?;
    validate_priority(task.priority)?;
    if task.id.is_empty() {
        task.id = Uuid::new_v4().to_string();
    }
    let now = Utc::now();
    task.created_at = now;
    task.updated_at = now;
    conn.execute(
        "INSERT INTO tasks (id, feature_id, name, description, specification,
                            priority, tests_required, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task.id,
            task.feature_id,
            task.name,
            task.description,
            task.specification,
            task.priority,
            task.tests_required as i64,
            task.status.as_str(),
            now,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::Duplicate(format!("task '{}' in feature {}", task.name, task.feature_id))
        } else if is_foreign_key_violation(&e) {
            Error::NotFound(format!("feature {}", task.feature_id))
        } else {
            e.into()
        }
    })?;
    Ok(())
}

pub(crate) fn insert_dependency(
    conn: &Connection,
    task_id: &str,
    depends_on_task_id: &str,
) -> Result<()> {
    if task_id == depends_on_task_id {
        return Err(Error::InvalidInput("a task cannot depend on itself".into()));
    }
    if task_by_id(conn, task_id)?.is_none() {
        return Err(Error::NotFound(format!("task {task_id}")));
    }
    if task_by_id(conn, depends_on_task_id)?.is_none() {
        return Err(Error::NotFound(format!("task {depends_on_task_id}")));
    }
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dependencies
         WHERE task_id = ?1 AND depends_on_task_id = ?2)",
        params![task_id, depends_on_task_id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(Error::Duplicate(format!(
            "dependency {task_id} -> {depends_on_task_id}"
        )));
    }
    if would_create_cycle(conn, task_id, depends_on_task_id)? {
        return Err(Error::CycleDetected);
    }
    conn.execute(
        "INSERT INTO dependencies (task_id, depends_on_task_id) VALUES (?1, ?2)",
        params![task_id, depends_on_task_id],
    )?;
    Ok(())
}

/// Would adding the edge task -> prerequisite close a cycle? True when the
/// task is already reachable from the prerequisite by walking depends-on
/// edges.
fn would_create_cycle(conn: &Connection, task_id: &str, depends_on_task_id: &str) -> Result<bool> {
    let mut visited = std::collections::HashSet::new();
    let mut stack = vec![depends_on_task_id.to_string()];

    let mut stmt =
        conn.prepare("SELECT depends_on_task_id FROM dependencies WHERE task_id = ?1")?;

    while let Some(current) = stack.pop() {
        if current == task_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let next: Vec<String> = stmt
            .query_map([&current], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for dep in next {
            if !visited.contains(&dep) {
                stack.push(dep);
            }
        }
    }
    Ok(false)
}

pub(crate) fn feature_by_id(conn: &Connection, id: &str) -> Result<Option<Feature>> {
    let feature = conn
        .query_row(
            "SELECT id, name, description, specification, created_at, updated_at
             FROM features WHERE id = ?1",
            [id],
            feature_from_row,
        )
        .optional()?;
    Ok(feature)
}

pub(crate) fn feature_by_name(conn: &Connection, name: &str) -> Result<Option<Feature>> {
    let feature = conn
        .query_row(
            "SELECT id, name, description, specification, created_at, updated_at
             FROM features WHERE name = ?1",
            [name],
            feature_from_row,
        )
        .optional()?;
    Ok(feature)
}

pub(crate) fn task_by_id(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT t.id, t.feature_id, t.name, t.description, t.specification,
                    t.priority, t.tests_required, t.status, t.completion_summary,
                    t.created_at, t.updated_at, t.started_at, t.completed_at,
                    f.name AS feature_name
             FROM tasks t
             LEFT JOIN features f ON t.feature_id = f.id
             WHERE t.id = ?1",
            [id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

pub(crate) fn task_by_name(conn: &Connection, name: &str, feature_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT t.id, t.feature_id, t.name, t.description, t.specification,
                    t.priority, t.tests_required, t.status, t.completion_summary,
                    t.created_at, t.updated_at, t.started_at, t.completed_at,
                    f.name AS feature_name
             FROM tasks t
             LEFT JOIN features f ON t.feature_id = f.id
             WHERE t.name = ?1 AND t.feature_id = ?2",
            params![name, feature_id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

pub(crate) fn resolve_task_id(
    conn: &Connection,
    feature_name: &str,
    task_name: &str,
) -> Result<String> {
    let feature = feature_by_name(conn, feature_name)?
        .ok_or_else(|| Error::NotFound(format!("feature '{feature_name}'")))?;
    let task = task_by_name(conn, task_name, &feature.id)?.ok_or_else(|| {
        Error::NotFound(format!("task '{task_name}' in feature '{feature_name}'"))
    })?;
    Ok(task.id)
}

fn feature_from_row(row: &Row) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        specification: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        feature_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        specification: row.get(4)?,
        priority: row.get(5)?,
        tests_required: row.get::<_, i64>(6)? != 0,
        status: TaskStatus::parse(&status).unwrap_or_default(),
        completion_summary: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        feature_name: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
    })
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{kind} name is required")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "{kind} name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_priority(priority: i64) -> Result<()> {
    if !PRIORITY_RANGE.contains(&priority) {
        return Err(Error::InvalidInput(format!(
            "priority must be between {} and {}",
            PRIORITY_RANGE.start(),
            PRIORITY_RANGE.end()
        )));
    }
    Ok(())
}

/// The status machine. Same-state transitions are no-ops; anything not
/// listed is rejected.
fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    use TaskStatus::*;
    if from == to {
        return Ok(());
    }
    let allowed = match from {
        Pending => matches!(to, InProgress | Blocked),
        InProgress => matches!(to, Completed | Blocked | Pending),
        Blocked => matches!(to, Pending | InProgress),
        // Completed tasks may be re-opened.
        Completed => matches!(to, InProgress),
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
