//! Graph document for read-only consumers (web UI, tools).

use crate::models::TaskStatus;
use crate::store::Store;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// One task as a graph node.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub feature_name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub completion_summary: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Elapsed seconds between start and completion, when both are known.
    pub completion_seconds: Option<i64>,
    /// Whether the task is currently claimable.
    pub is_available: bool,
}

/// One dependency edge: `from` depends on `to`.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// The complete task graph.
#[derive(Debug, Clone, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Store {
    /// Materialize the full graph document in one consistent read: nodes,
    /// edges, and availability all reflect the same store state.
    pub fn graph(&self) -> Result<Graph> {
        let conn = self.conn.lock().unwrap();

        let available: HashSet<String> = {
            let mut stmt = conn.prepare("SELECT id FROM v_available_tasks")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };

        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, f.name AS feature_name, t.description, t.status,
                    t.priority, t.completion_summary, t.started_at, t.completed_at
             FROM tasks t
             LEFT JOIN features f ON t.feature_id = f.id
             ORDER BY t.priority DESC, t.created_at ASC, t.id ASC",
        )?;
        let nodes = stmt
            .query_map([], |row| {
                let status: String = row.get(4)?;
                let started_at: Option<DateTime<Utc>> = row.get(7)?;
                let completed_at: Option<DateTime<Utc>> = row.get(8)?;
                let id: String = row.get(0)?;
                Ok(GraphNode {
                    is_available: available.contains(&id),
                    completion_seconds: match (started_at, completed_at) {
                        (Some(start), Some(end)) => Some((end - start).num_seconds()),
                        _ => None,
                    },
                    id,
                    name: row.get(1)?,
                    feature_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    description: row.get(3)?,
                    status: TaskStatus::parse(&status).unwrap_or_default(),
                    priority: row.get(5)?,
                    completion_summary: row.get(6)?,
                    started_at,
                    completed_at,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT task_id, depends_on_task_id FROM dependencies
             ORDER BY task_id, depends_on_task_id",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(GraphEdge {
                    from: row.get(0)?,
                    to: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Graph { nodes, edges })
    }

    /// The graph document serialized as a JSON string.
    pub fn graph_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.graph()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mem_store, seed_feature, seed_task};

    #[test]
    fn test_graph_nodes_and_edges() {
        let store = mem_store();
        let f = seed_feature(&store, "auth");
        let hash = seed_task(&store, &f.id, "hash", 7);
        let login = seed_task(&store, &f.id, "login", 9);
        store.create_dependency(&login.id, &hash.id).unwrap();

        let graph = store.graph().unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, login.id);
        assert_eq!(graph.edges[0].to, hash.id);

        let login_node = graph.nodes.iter().find(|n| n.id == login.id).unwrap();
        assert_eq!(login_node.feature_name, "auth");
        assert!(!login_node.is_available);

        let hash_node = graph.nodes.iter().find(|n| n.id == hash.id).unwrap();
        assert!(hash_node.is_available);
        assert!(hash_node.completion_seconds.is_none());
    }

    #[test]
    fn test_graph_completion_seconds() {
        let store = mem_store();
        let f = seed_feature(&store, "auth");
        let t = seed_task(&store, &f.id, "t", 0);
        store
            .update_task_status(&t.id, crate::models::TaskStatus::InProgress, None)
            .unwrap();
        store
            .update_task_status(&t.id, crate::models::TaskStatus::Completed, Some("done"))
            .unwrap();

        let graph = store.graph().unwrap();
        let node = &graph.nodes[0];
        assert!(node.completion_seconds.is_some());
        assert!(node.completion_seconds.unwrap() >= 0);
        assert!(!node.is_available);
    }

    #[test]
    fn test_graph_json_shape() {
        let store = mem_store();
        let f = seed_feature(&store, "auth");
        seed_task(&store, &f.id, "task-one", 5);

        let json = store.graph_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"][0]["name"], "task-one");
        assert_eq!(value["nodes"][0]["feature_name"], "auth");
        assert_eq!(value["nodes"][0]["status"], "pending");
        assert_eq!(value["nodes"][0]["is_available"], true);
        assert!(value["edges"].as_array().unwrap().is_empty());
    }
}
