//! JSONL snapshot export and import.
//!
//! Snapshots are one JSON object per line, each tagged with a
//! `record_type`. Tasks and dependencies refer to features and tasks by
//! name so a snapshot is portable across id spaces: import merges by name,
//! updating existing entities and creating missing ones.

use crate::models::{Feature, TaskStatus};
use crate::store::Store;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Current snapshot schema version, written into the meta line.
const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    record_type: String,
    schema_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskRecord {
    record_type: String,
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    specification: String,
    feature_name: String,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    tests_required: bool,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    completion_summary: Option<String>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DependencyRecord {
    record_type: String,
    #[serde(default)]
    task_id: String,
    task_name: String,
    task_feature_name: String,
    #[serde(default)]
    depends_on_task_id: String,
    depends_on_task_name: String,
    depends_on_task_feature_name: String,
}

#[derive(Debug, Deserialize)]
struct BaseRecord {
    record_type: String,
}

impl Store {
    /// Write the full graph to `path` as JSONL, atomically via a temp file
    /// in the same directory. Emission order: meta, features by name, tasks
    /// by name, dependencies by (task name, prerequisite name).
    pub fn export_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut lines = Vec::new();
        {
            let conn = self.conn.lock().unwrap();

            lines.push(serde_json::to_string(&MetaRecord {
                record_type: "meta".into(),
                schema_version: SCHEMA_VERSION.into(),
            })?);

            let mut stmt = conn.prepare(
                "SELECT id, name, description, specification, created_at, updated_at
                 FROM features ORDER BY name",
            )?;
            let features = stmt
                .query_map([], |row| {
                    Ok(Feature {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        specification: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for f in features {
                let mut value = serde_json::to_value(&f)?;
                value["record_type"] = "feature".into();
                lines.push(serde_json::to_string(&value)?);
            }

            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.description, t.specification, f.name,
                        t.priority, t.tests_required, t.status, t.completion_summary,
                        t.created_at, t.updated_at, t.started_at, t.completed_at
                 FROM tasks t
                 JOIN features f ON t.feature_id = f.id
                 ORDER BY t.name, f.name",
            )?;
            let tasks = stmt
                .query_map([], |row| {
                    let status: String = row.get(7)?;
                    Ok(TaskRecord {
                        record_type: "task".into(),
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        specification: row.get(3)?,
                        feature_name: row.get(4)?,
                        priority: row.get(5)?,
                        tests_required: row.get::<_, i64>(6)? != 0,
                        status: TaskStatus::parse(&status).unwrap_or_default(),
                        completion_summary: row.get(8)?,
                        created_at: row.get(9)?,
                        updated_at: row.get(10)?,
                        started_at: row.get(11)?,
                        completed_at: row.get(12)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for t in tasks {
                lines.push(serde_json::to_string(&t)?);
            }

            let mut stmt = conn.prepare(
                "SELECT d.task_id, t.name, tf.name,
                        d.depends_on_task_id, p.name, pf.name
                 FROM dependencies d
                 JOIN tasks t ON d.task_id = t.id
                 JOIN features tf ON t.feature_id = tf.id
                 JOIN tasks p ON d.depends_on_task_id = p.id
                 JOIN features pf ON p.feature_id = pf.id
                 ORDER BY t.name, p.name",
            )?;
            let deps = stmt
                .query_map([], |row| {
                    Ok(DependencyRecord {
                        record_type: "dependency".into(),
                        task_id: row.get(0)?,
                        task_name: row.get(1)?,
                        task_feature_name: row.get(2)?,
                        depends_on_task_id: row.get(3)?,
                        depends_on_task_name: row.get(4)?,
                        depends_on_task_feature_name: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for d in deps {
                lines.push(serde_json::to_string(&d)?);
            }
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for line in &lines {
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(())
    }

    /// Read a JSONL snapshot and merge it into the store inside one
    /// transaction. Entities are matched by name: existing rows are
    /// updated in place (keeping their local ids), missing ones are
    /// created. Dependency lines fail the import when either endpoint
    /// cannot be resolved.
    pub fn import_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = fs::read_to_string(path.as_ref())?;

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            // Snapshot id -> local id, for dependency lines that carry ids.
            let mut feature_snapshot_ids: HashMap<String, String> = HashMap::new();
            let mut task_snapshot_ids: HashMap<String, String> = HashMap::new();

            // Name -> local id, seeded from what already exists.
            let mut feature_names: HashMap<String, String> = {
                let mut stmt = tx.prepare("SELECT name, id FROM features")?;
                let pairs = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
                pairs.into_iter().collect()
            };
            let mut task_names: HashMap<String, String> = {
                let mut stmt = tx.prepare(
                    "SELECT f.name || '/' || t.name, t.id
                     FROM tasks t JOIN features f ON t.feature_id = f.id",
                )?;
                let pairs = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
                pairs.into_iter().collect()
            };

            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let base: BaseRecord = serde_json::from_str(line)?;
                match base.record_type.as_str() {
                    "meta" => {}
                    "feature" => {
                        let mut f: Feature = serde_json::from_str(line)?;
                        let snapshot_id = f.id.clone();
                        let local_id = match feature_names.get(&f.name) {
                            Some(local) => {
                                tx.execute(
                                    "UPDATE features SET description = ?1, specification = ?2,
                                     created_at = ?3, updated_at = ?4 WHERE id = ?5",
                                    rusqlite::params![
                                        f.description,
                                        f.specification,
                                        f.created_at,
                                        f.updated_at,
                                        local
                                    ],
                                )?;
                                local.clone()
                            }
                            None => {
                                if f.id.is_empty() {
                                    f.id = Uuid::new_v4().to_string();
                                }
                                tx.execute(
                                    "INSERT INTO features
                                     (id, name, description, specification, created_at, updated_at)
                                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                                    rusqlite::params![
                                        f.id,
                                        f.name,
                                        f.description,
                                        f.specification,
                                        f.created_at,
                                        f.updated_at
                                    ],
                                )?;
                                f.id.clone()
                            }
                        };
                        if !snapshot_id.is_empty() {
                            feature_snapshot_ids.insert(snapshot_id, local_id.clone());
                        }
                        feature_names.insert(f.name.clone(), local_id);
                    }
                    "task" => {
                        let mut t: TaskRecord = serde_json::from_str(line)?;
                        let feature_id =
                            feature_names.get(&t.feature_name).cloned().ok_or_else(|| {
                                Error::UnresolvedReference(format!(
                                    "feature '{}' not found for task '{}'",
                                    t.feature_name, t.name
                                ))
                            })?;
                        let key = format!("{}/{}", t.feature_name, t.name);
                        let snapshot_id = t.id.clone();
                        let local_id = match task_names.get(&key) {
                            Some(local) => {
                                tx.execute(
                                    "UPDATE tasks SET feature_id = ?1, description = ?2,
                                     specification = ?3, priority = ?4, tests_required = ?5,
                                     status = ?6, completion_summary = ?7, created_at = ?8,
                                     updated_at = ?9, started_at = ?10, completed_at = ?11
                                     WHERE id = ?12",
                                    rusqlite::params![
                                        feature_id,
                                        t.description,
                                        t.specification,
                                        t.priority,
                                        t.tests_required as i64,
                                        t.status.as_str(),
                                        t.completion_summary,
                                        t.created_at,
                                        t.updated_at,
                                        t.started_at,
                                        t.completed_at,
                                        local
                                    ],
                                )?;
                                local.clone()
                            }
                            None => {
                                if t.id.is_empty() {
                                    t.id = Uuid::new_v4().to_string();
                                }
                                tx.execute(
                                    "INSERT INTO tasks
                                     (id, feature_id, name, description, specification, priority,
                                      tests_required, status, completion_summary, created_at,
                                      updated_at, started_at, completed_at)
                                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                                    rusqlite::params![
                                        t.id,
                                        feature_id,
                                        t.name,
                                        t.description,
                                        t.specification,
                                        t.priority,
                                        t.tests_required as i64,
                                        t.status.as_str(),
                                        t.completion_summary,
                                        t.created_at,
                                        t.updated_at,
                                        t.started_at,
                                        t.completed_at
                                    ],
                                )?;
                                t.id.clone()
                            }
                        };
                        if !snapshot_id.is_empty() {
                            task_snapshot_ids.insert(snapshot_id, local_id.clone());
                        }
                        task_names.insert(key, local_id);
                    }
                    "dependency" => {
                        let d: DependencyRecord = serde_json::from_str(line)?;
                        let task_id = task_snapshot_ids
                            .get(&d.task_id)
                            .or_else(|| {
                                task_names
                                    .get(&format!("{}/{}", d.task_feature_name, d.task_name))
                            })
                            .cloned()
                            .ok_or_else(|| {
                                Error::UnresolvedReference(format!(
                                    "task '{}/{}' not found for dependency",
                                    d.task_feature_name, d.task_name
                                ))
                            })?;
                        let depends_on_id = task_snapshot_ids
                            .get(&d.depends_on_task_id)
                            .or_else(|| {
                                task_names.get(&format!(
                                    "{}/{}",
                                    d.depends_on_task_feature_name, d.depends_on_task_name
                                ))
                            })
                            .cloned()
                            .ok_or_else(|| {
                                Error::UnresolvedReference(format!(
                                    "task '{}/{}' not found for dependency",
                                    d.depends_on_task_feature_name, d.depends_on_task_name
                                ))
                            })?;
                        tx.execute(
                            "INSERT OR IGNORE INTO dependencies (task_id, depends_on_task_id)
                             VALUES (?1, ?2)",
                            rusqlite::params![task_id, depends_on_id],
                        )?;
                    }
                    other => {
                        // Unknown record types from newer snapshots are
                        // skipped rather than failing the whole import.
                        tracing::warn!("skipping unknown snapshot record type '{other}'");
                    }
                }
            }

            tx.commit()?;
        }

        self.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use crate::test_utils::{mem_store, seed_feature, seed_task};
    use tempfile::TempDir;

    #[test]
    fn test_export_order_and_meta() {
        let store = mem_store();
        let f = seed_feature(&store, "zeta");
        seed_feature(&store, "alpha");
        let b = seed_task(&store, &f.id, "b-task", 0);
        let a = seed_task(&store, &f.id, "a-task", 0);
        store.create_dependency(&a.id, &b.id).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        store.export_snapshot(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);

        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["record_type"], "meta");
        assert_eq!(meta["schema_version"], "1");

        let first_feature: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first_feature["record_type"], "feature");
        assert_eq!(first_feature["name"], "alpha");
        let second_feature: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(second_feature["name"], "zeta");

        let first_task: serde_json::Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(first_task["record_type"], "task");
        assert_eq!(first_task["name"], "a-task");
        assert_eq!(first_task["feature_name"], "zeta");

        let dep: serde_json::Value = serde_json::from_str(lines[4]).unwrap();
        assert_eq!(dep["record_type"], "dependency");
        assert_eq!(dep["task_name"], "a-task");
        assert_eq!(dep["depends_on_task_name"], "b-task");
    }

    #[test]
    fn test_round_trip_into_fresh_store() {
        let source = mem_store();
        let f = seed_feature(&source, "auth");
        let hash = seed_task(&source, &f.id, "hash", 7);
        let login = seed_task(&source, &f.id, "login", 9);
        source.create_dependency(&login.id, &hash.id).unwrap();
        source
            .update_task_status(&hash.id, TaskStatus::InProgress, None)
            .unwrap();
        source
            .update_task_status(&hash.id, TaskStatus::Completed, Some("hashed"))
            .unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        source.export_snapshot(&path).unwrap();

        let target = mem_store();
        target.import_snapshot(&path).unwrap();

        let feature = target.get_feature_by_name("auth").unwrap().unwrap();
        let hash2 = target
            .get_task_by_name("hash", &feature.id)
            .unwrap()
            .unwrap();
        assert_eq!(hash2.status, TaskStatus::Completed);
        assert_eq!(hash2.completion_summary.as_deref(), Some("hashed"));
        assert_eq!(hash2.priority, 7);
        assert!(hash2.started_at.is_some());

        let login2 = target
            .get_task_by_name("login", &feature.id)
            .unwrap()
            .unwrap();
        let deps = target.get_dependencies(&login2.id).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "hash");
    }

    #[test]
    fn test_import_merges_by_name_preserving_ids() {
        let store = mem_store();
        let f = seed_feature(&store, "auth");
        let t = seed_task(&store, &f.id, "login", 1);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        let lines = [
            r#"{"record_type": "meta", "schema_version": "1"}"#.to_string(),
            format!(
                r#"{{"record_type": "feature", "id": "snap-f", "name": "auth", "description": "merged", "specification": "s", "created_at": "{0}", "updated_at": "{0}"}}"#,
                Utc::now().to_rfc3339()
            ),
            format!(
                r#"{{"record_type": "task", "id": "snap-t", "feature_name": "auth", "name": "login", "description": "merged task", "specification": "s", "priority": 4, "status": "pending", "created_at": "{0}", "updated_at": "{0}"}}"#,
                Utc::now().to_rfc3339()
            ),
        ];
        fs::write(&path, lines.join("\n")).unwrap();

        store.import_snapshot(&path).unwrap();

        // Same rows, updated payloads, original ids.
        let feature = store.get_feature_by_name("auth").unwrap().unwrap();
        assert_eq!(feature.id, f.id);
        assert_eq!(feature.description, "merged");
        let task = store.get_task_by_name("login", &f.id).unwrap().unwrap();
        assert_eq!(task.id, t.id);
        assert_eq!(task.priority, 4);
        assert_eq!(store.list_tasks(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_import_assigns_ids_when_missing() {
        let store = mem_store();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        let lines = [
            r#"{"record_type": "meta", "schema_version": "1"}"#,
            r#"{"record_type": "feature", "name": "fresh", "description": "d", "specification": "s"}"#,
            r#"{"record_type": "task", "feature_name": "fresh", "name": "t", "description": "d", "specification": "s", "status": "pending"}"#,
        ];
        fs::write(&path, lines.join("\n")).unwrap();

        store.import_snapshot(&path).unwrap();
        let feature = store.get_feature_by_name("fresh").unwrap().unwrap();
        assert_eq!(feature.id.len(), 36);
        let task = store.get_task_by_name("t", &feature.id).unwrap().unwrap();
        assert_eq!(task.id.len(), 36);
    }

    #[test]
    fn test_import_fails_closed_on_unresolved_dependency() {
        let store = mem_store();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        let lines = [
            r#"{"record_type": "meta", "schema_version": "1"}"#,
            r#"{"record_type": "feature", "name": "f1", "description": "d", "specification": "s"}"#,
            r#"{"record_type": "task", "feature_name": "f1", "name": "t1", "description": "d", "specification": "s", "status": "pending"}"#,
            r#"{"record_type": "dependency", "task_name": "t1", "task_feature_name": "f1", "depends_on_task_name": "ghost", "depends_on_task_feature_name": "f1"}"#,
        ];
        fs::write(&path, lines.join("\n")).unwrap();

        assert!(matches!(
            store.import_snapshot(&path),
            Err(Error::UnresolvedReference(_))
        ));
        // Transaction rolled back entirely.
        assert!(store.get_feature_by_name("f1").unwrap().is_none());
    }

    #[test]
    fn test_auto_snapshot_on_change() {
        use std::sync::Arc;

        let store = Arc::new(mem_store());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.jsonl");
        store.enable_auto_snapshot(&path);

        let f = seed_feature(&store, "auth");
        assert!(path.exists());

        let mut t = Task::new(&f.id, "task");
        store.create_task(&mut t).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"record_type\":\"task\""));
    }
}
