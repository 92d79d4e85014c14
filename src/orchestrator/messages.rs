//! Typed messages the orchestrator publishes for UI consumers.

use crate::models::Task;

/// Supervisor-level messages use worker id 0.
pub const SUPERVISOR_ID: usize = 0;

/// A message on the orchestrator's bounded bus. The send policy is
/// drop-on-timeout: consumers are informational and must never throttle
/// the supervisor.
#[derive(Debug, Clone)]
pub enum Message {
    /// A worker slot was allocated for a claimed task.
    WorkerStarted { worker_id: usize, task: Task },
    /// The worker began executing its task.
    TaskStarted { worker_id: usize, task_name: String },
    /// A chunk of agent stdout/stderr.
    Output { worker_id: usize, text: String },
    /// Free-form status line (worker id 0 for the supervisor).
    Status { worker_id: usize, text: String },
    /// The worker finished, successfully or not.
    TaskCompleted {
        worker_id: usize,
        task_name: String,
        success: bool,
    },
    /// The supervisor transitioned into or out of the idle state.
    Idle(bool),
    /// A supervisor-level error worth surfacing.
    Error(String),
}
