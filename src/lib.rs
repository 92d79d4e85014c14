//! Ponder - a persistent task graph and agent orchestrator.
//!
//! This library backs the `ponder` CLI tool. It keeps features, tasks, and
//! their dependency edges in an embedded SQLite store, lets planners stage
//! batches of proposed work that commit atomically, and dispatches ready
//! tasks to external agent subprocesses through a supervised worker pool.

pub mod cli;
pub mod commands;
pub mod config;
pub mod mcp;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod store;
pub mod web;

use crate::models::TaskStatus;

/// Library-level error type for Ponder operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Cycle detected in dependencies")]
    CycleDetected,

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Operation canceled")]
    Canceled,
}

/// Result type alias for Ponder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Test helpers shared across unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use crate::models::{Feature, Task};
    use crate::store::Store;

    /// Open an in-memory store with the schema applied.
    pub fn mem_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    /// Create a feature with the given name and return it.
    pub fn seed_feature(store: &Store, name: &str) -> Feature {
        let mut f = Feature::new(name);
        store.create_feature(&mut f).unwrap();
        f
    }

    /// Create a pending task under the given feature and return it.
    pub fn seed_task(store: &Store, feature_id: &str, name: &str, priority: i64) -> Task {
        let mut t = Task::new(feature_id, name);
        t.priority = priority;
        store.create_task(&mut t).unwrap();
        t
    }
}
