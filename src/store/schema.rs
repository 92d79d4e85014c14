//! Embedded SQL schema for the Ponder store.

/// Schema applied on every open. All statements are idempotent so opening an
/// existing database is a no-op.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS features (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK (length(name) <= 55),
    description TEXT NOT NULL DEFAULT '',
    specification TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    feature_id TEXT NOT NULL REFERENCES features(id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (length(name) <= 55),
    description TEXT NOT NULL DEFAULT '',
    specification TEXT NOT NULL DEFAULT '',
    priority INTEGER NOT NULL DEFAULT 0 CHECK (priority BETWEEN 0 AND 10),
    tests_required INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'blocked')),
    completion_summary TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE (feature_id, name)
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_id);

CREATE TABLE IF NOT EXISTS dependencies (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on_task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (task_id, depends_on_task_id),
    CHECK (task_id != depends_on_task_id)
);

CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on
    ON dependencies(depends_on_task_id);

-- A task is available when it is pending and every prerequisite is
-- completed. Tasks with no dependency rows qualify.
CREATE VIEW IF NOT EXISTS v_available_tasks AS
SELECT t.id, t.feature_id, t.name, t.description, t.specification,
       t.priority, t.tests_required, t.status, t.completion_summary,
       t.created_at, t.updated_at, t.started_at, t.completed_at,
       f.name AS feature_name
FROM tasks t
LEFT JOIN features f ON t.feature_id = f.id
WHERE t.status = 'pending'
  AND NOT EXISTS (
    SELECT 1
    FROM dependencies d
    JOIN tasks dep ON dep.id = d.depends_on_task_id
    WHERE d.task_id = t.id
      AND dep.status != 'completed'
  );
"#;
