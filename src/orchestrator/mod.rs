//! Concurrent task orchestration.
//!
//! One supervisor loop maintains a pool of worker tasks. Each worker claims
//! exactly one ready task from the store, runs the external agent with a
//! composed prompt on stdin, and reports the outcome. Failed tasks go back
//! to pending under a per-task backoff so a hot-looping failure cannot
//! starve the pool.

pub mod messages;

pub use messages::{Message, SUPERVISOR_ID};

use crate::models::{Task, TaskStatus};
use crate::store::Store;
use crate::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Supervisor tick.
const TICK: Duration = Duration::from_millis(100);
/// How often stale backoff entries are dropped.
const BACKOFF_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
/// Bus send deadline; messages are dropped past it.
const SEND_TIMEOUT: Duration = Duration::from_millis(100);
/// Joint wait for workers during shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);
/// Deadline for a failed worker's task reset.
const RESET_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the shutdown-time reclamation of leftover tasks.
const SHUTDOWN_RESET_TIMEOUT: Duration = Duration::from_secs(10);
/// Message bus capacity.
const BUS_CAPACITY: usize = 100;

/// Store operations the orchestrator needs. `Store` implements this; tests
/// substitute lighter fakes.
pub trait TaskStore: Send + Sync + 'static {
    fn claim_next_task(&self) -> Result<Option<Task>>;
    fn update_task_status(&self, id: &str, status: TaskStatus, summary: Option<&str>)
        -> Result<()>;
    fn count_available_tasks(&self) -> Result<usize>;
    fn reset_in_progress_tasks(&self) -> Result<()>;
    fn disable_on_change(&self);
    fn enable_on_change(&self);
}

impl TaskStore for Store {
    fn claim_next_task(&self) -> Result<Option<Task>> {
        Store::claim_next_task(self)
    }

    fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        Store::update_task_status(self, id, status, summary)
    }

    fn count_available_tasks(&self) -> Result<usize> {
        Store::count_available_tasks(self)
    }

    fn reset_in_progress_tasks(&self) -> Result<()> {
        Store::reset_in_progress_tasks(self)
    }

    fn disable_on_change(&self) {
        Store::disable_on_change(self)
    }

    fn enable_on_change(&self) {
        Store::enable_on_change(self)
    }
}

/// Builds the agent invocation for a model. Swapped out in tests.
type CommandFactory = Arc<dyn Fn(&str) -> Command + Send + Sync>;

fn default_command_factory(model: &str) -> Command {
    let mut cmd = Command::new("opencode");
    cmd.arg("run").arg("--model").arg(model);
    cmd
}

/// Orchestrator tuning. `Default` matches production behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard ceiling on concurrent workers.
    pub max_workers: usize,
    /// Initial target; clamped to `max_workers`. Defaults to the ceiling.
    pub target_workers: Option<usize>,
    /// Model handed to the agent.
    pub model: String,
    /// When idle: zero means exit, anything else keeps polling.
    pub polling_interval: Duration,
    /// Re-dispatch suppression window after a task failure.
    pub backoff: Duration,
    /// Minimum gap between consecutive spawns.
    pub min_spawn_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            target_workers: None,
            model: crate::config::DEFAULT_MODEL.to_string(),
            polling_interval: Duration::ZERO,
            backoff: Duration::from_secs(30),
            min_spawn_interval: Duration::from_millis(500),
        }
    }
}

struct WorkerHandle {
    task: Task,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

struct FailureInfo {
    failed_at: Instant,
    fail_count: u32,
}

/// Supervises up to `max_workers` concurrent workers, each executing one
/// claimed task via an agent subprocess.
pub struct Orchestrator<S: TaskStore + ?Sized = Store> {
    store: Arc<S>,
    max_workers: usize,
    target_workers: AtomicUsize,
    model: Mutex<String>,
    available_models: Mutex<Vec<String>>,
    workers: Mutex<HashMap<usize, WorkerHandle>>,
    total_tasks: AtomicUsize,
    completed_tasks: AtomicUsize,
    msg_tx: mpsc::Sender<Message>,
    failed_tasks: Mutex<HashMap<String, FailureInfo>>,
    backoff: Duration,
    min_spawn_interval: Duration,
    last_spawn: Mutex<Option<Instant>>,
    polling_interval: Duration,
    idle: Mutex<bool>,
    cancel: CancellationToken,
    command_factory: CommandFactory,
}

impl<S: TaskStore + ?Sized> Orchestrator<S> {
    /// Create an orchestrator and the receiving end of its message bus.
    pub fn new(store: Arc<S>, config: OrchestratorConfig) -> (Arc<Self>, mpsc::Receiver<Message>) {
        Self::with_command_factory(store, config, Arc::new(default_command_factory))
    }

    /// As [`Orchestrator::new`], with the agent invocation replaced. Used
    /// by tests to substitute trivial commands for the real agent.
    pub fn with_command_factory(
        store: Arc<S>,
        config: OrchestratorConfig,
        command_factory: CommandFactory,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let max_workers = config.max_workers.max(1);
        let target = config.target_workers.unwrap_or(max_workers).min(max_workers);
        let model = if config.model.is_empty() {
            crate::config::DEFAULT_MODEL.to_string()
        } else {
            config.model
        };
        let (msg_tx, msg_rx) = mpsc::channel(BUS_CAPACITY);
        let orch = Arc::new(Self {
            store,
            max_workers,
            target_workers: AtomicUsize::new(target),
            available_models: Mutex::new(vec![model.clone()]),
            model: Mutex::new(model),
            workers: Mutex::new(HashMap::new()),
            total_tasks: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            msg_tx,
            failed_tasks: Mutex::new(HashMap::new()),
            backoff: config.backoff,
            min_spawn_interval: config.min_spawn_interval,
            last_spawn: Mutex::new(None),
            polling_interval: config.polling_interval,
            idle: Mutex::new(false),
            cancel: CancellationToken::new(),
            command_factory,
        });
        (orch, msg_rx)
    }

    /// Request shutdown. `run` performs the orderly stop and returns.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The supervisor loop. Reclaims orphaned tasks, then ticks: spawning
    /// workers for ready tasks, cleaning stale backoff entries, and
    /// watching for the idle condition. Returns `Ok(())` when idle with no
    /// polling configured, `Err(Error::Canceled)` after a requested stop.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.store.reset_in_progress_tasks() {
            self.send(Message::Status {
                worker_id: SUPERVISOR_ID,
                text: format!("error resetting in-progress tasks: {e}"),
            })
            .await;
        }

        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(BACKOFF_CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.stop_all_workers().await;
                    return Err(Error::Canceled);
                }
                _ = cleanup.tick() => {
                    self.cleanup_failed_tasks();
                }
                _ = tick.tick() => {
                    self.try_spawn_workers().await;

                    let idle = self.active_workers() == 0 && !self.has_more_tasks();
                    self.set_idle(idle).await;

                    if idle && self.polling_interval.is_zero() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One spawn pass: claim and dispatch ready tasks up to the current
    /// target, respecting the global spawn rate limit and per-task backoff.
    async fn try_spawn_workers(self: &Arc<Self>) {
        if !self.can_spawn() {
            return;
        }

        let active = self.active_workers();
        let target = self.target_workers().min(self.max_workers);
        if active >= target {
            return;
        }

        let available = match self.store.count_available_tasks() {
            Ok(n) => n,
            Err(e) => {
                self.send(Message::Status {
                    worker_id: SUPERVISOR_ID,
                    text: format!("error counting available tasks: {e}"),
                })
                .await;
                return;
            }
        };
        if available == 0 {
            return;
        }

        let want = available.min(target - active).min(self.max_workers - active);
        for _ in 0..want {
            if !self.can_spawn() {
                return;
            }

            let task = match self.store.claim_next_task() {
                Ok(Some(task)) => task,
                Ok(None) => return,
                Err(e) => {
                    self.send(Message::Status {
                        worker_id: SUPERVISOR_ID,
                        text: format!("error claiming task: {e}"),
                    })
                    .await;
                    return;
                }
            };

            // A claimed task still in backoff is not dispatched: put it
            // back so the next claim can pick something else.
            if self.is_in_backoff(&task.id) {
                if let Err(e) =
                    self.store
                        .update_task_status(&task.id, TaskStatus::Pending, None)
                {
                    tracing::warn!("failed to release backoff task {}: {e}", task.id);
                }
                continue;
            }

            self.update_spawn_time();
            self.spawn_worker(task).await;
        }
    }

    /// True when enough time has passed since the last spawn.
    fn can_spawn(&self) -> bool {
        let last = self.last_spawn.lock().unwrap();
        match *last {
            None => true,
            Some(at) => at.elapsed() >= self.min_spawn_interval,
        }
    }

    fn update_spawn_time(&self) {
        *self.last_spawn.lock().unwrap() = Some(Instant::now());
    }

    fn is_in_backoff(&self, task_id: &str) -> bool {
        let failed = self.failed_tasks.lock().unwrap();
        failed
            .get(task_id)
            .is_some_and(|info| info.failed_at.elapsed() < self.backoff)
    }

    fn record_task_failure(&self, task_id: &str) {
        let mut failed = self.failed_tasks.lock().unwrap();
        failed
            .entry(task_id.to_string())
            .and_modify(|info| {
                info.fail_count += 1;
                info.failed_at = Instant::now();
            })
            .or_insert(FailureInfo {
                failed_at: Instant::now(),
                fail_count: 1,
            });
    }

    /// Drop backoff entries that are well past their window.
    fn cleanup_failed_tasks(&self) {
        let mut failed = self.failed_tasks.lock().unwrap();
        failed.retain(|_, info| info.failed_at.elapsed() <= self.backoff * 2);
    }

    /// Allocate the lowest free worker id and launch the worker task.
    async fn spawn_worker(self: &Arc<Self>, task: Task) {
        let (worker_id, cancel, done_tx) = {
            let mut workers = self.workers.lock().unwrap();
            let Some(id) = (1..=self.max_workers).find(|id| !workers.contains_key(id)) else {
                return;
            };
            let cancel = self.cancel.child_token();
            let (done_tx, done_rx) = watch::channel(false);
            workers.insert(
                id,
                WorkerHandle {
                    task: task.clone(),
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
            self.total_tasks.fetch_add(1, Ordering::SeqCst);
            (id, cancel, done_tx)
        };

        self.send(Message::WorkerStarted {
            worker_id,
            task: task.clone(),
        })
        .await;

        let orch = Arc::clone(self);
        tokio::spawn(async move {
            orch.run_worker(worker_id, task, cancel).await;
            let _ = done_tx.send(true);
        });
    }

    /// Execute one task: compose the prompt, run the agent, stream its
    /// output, and on failure record backoff and return the task to
    /// pending. The reset runs outside the cancellation scope: it must
    /// land even while the orchestrator is coming down.
    async fn run_worker(self: Arc<Self>, worker_id: usize, task: Task, cancel: CancellationToken) {
        self.send(Message::TaskStarted {
            worker_id,
            task_name: task.name.clone(),
        })
        .await;

        let prompt = crate::prompt::compose(&task);
        let success = match self.execute_agent(worker_id, &prompt, &cancel).await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                self.send(Message::Output {
                    worker_id,
                    text: format!("--- agent exited with {status} ---"),
                })
                .await;
                false
            }
            Err(e) => {
                self.send(Message::Output {
                    worker_id,
                    text: format!("--- error: {e} ---"),
                })
                .await;
                false
            }
        };

        if success {
            self.completed_tasks.fetch_add(1, Ordering::SeqCst);
        } else {
            self.record_task_failure(&task.id);
            let store = Arc::clone(&self.store);
            let task_id = task.id.clone();
            let reset = tokio::time::timeout(
                RESET_TIMEOUT,
                tokio::task::spawn_blocking(move || {
                    store.update_task_status(&task_id, TaskStatus::Pending, None)
                }),
            )
            .await;
            match reset {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    self.send(Message::Status {
                        worker_id,
                        text: format!("failed to reset task {}: {e}", task.name),
                    })
                    .await;
                }
                _ => {
                    self.send(Message::Status {
                        worker_id,
                        text: format!("timed out resetting task {}", task.name),
                    })
                    .await;
                }
            }
        }

        self.send(Message::TaskCompleted {
            worker_id,
            task_name: task.name.clone(),
            success,
        })
        .await;

        self.workers.lock().unwrap().remove(&worker_id);
    }

    /// Spawn the agent child process, feed it the prompt, stream its
    /// stdout/stderr onto the bus, and wait for exit or cancellation.
    async fn execute_agent(
        &self,
        worker_id: usize,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<std::process::ExitStatus> {
        let model = self.model();
        let mut cmd = (self.command_factory)(&model);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        // Feed stdin from a separate task: a child that never reads must
        // not wedge the wait below.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(self.msg_tx.clone(), worker_id, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(self.msg_tx.clone(), worker_id, stderr));
        }

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(Error::Canceled)
            }
        }
    }

    /// Orderly shutdown: cancel every worker, wait up to the joint
    /// deadline, then reclaim any task whose worker did not finish in
    /// time. Notifications stay suspended during reclamation so the
    /// snapshot exporter is not hammered while tearing down.
    async fn stop_all_workers(&self) {
        let snapshot: Vec<(CancellationToken, watch::Receiver<bool>)> = {
            let workers = self.workers.lock().unwrap();
            workers
                .values()
                .map(|w| (w.cancel.clone(), w.done.clone()))
                .collect()
        };

        for (cancel, _) in &snapshot {
            cancel.cancel();
        }

        let waits = snapshot.into_iter().map(|(_, mut done)| async move {
            let _ = done.wait_for(|finished| *finished).await;
        });
        let _ = tokio::time::timeout(SHUTDOWN_WAIT, futures::future::join_all(waits)).await;

        self.store.disable_on_change();

        let leftovers: Vec<Task> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain().map(|(_, w)| w.task).collect()
        };
        for task in leftovers {
            let store = Arc::clone(&self.store);
            let task_id = task.id.clone();
            let _ = tokio::time::timeout(
                SHUTDOWN_RESET_TIMEOUT,
                tokio::task::spawn_blocking(move || {
                    store.update_task_status(&task_id, TaskStatus::Pending, None)
                }),
            )
            .await;
        }

        self.store.enable_on_change();
    }

    fn has_more_tasks(&self) -> bool {
        self.store.count_available_tasks().map(|n| n > 0).unwrap_or(false)
    }

    async fn set_idle(&self, idle: bool) {
        let changed = {
            let mut current = self.idle.lock().unwrap();
            if *current != idle {
                *current = idle;
                true
            } else {
                false
            }
        };
        if changed {
            self.send(Message::Idle(idle)).await;
        }
    }

    /// Send with the drop-on-timeout policy: a full bus never blocks
    /// progress for longer than the deadline.
    async fn send(&self, msg: Message) {
        let _ = self.msg_tx.send_timeout(msg, SEND_TIMEOUT).await;
    }

    // === Introspection & controls ===

    /// Number of currently running workers.
    pub fn active_workers(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Names of the tasks currently being worked, keyed by worker id.
    pub fn active_tasks(&self) -> HashMap<usize, String> {
        let workers = self.workers.lock().unwrap();
        workers
            .iter()
            .map(|(id, w)| (*id, w.task.name.clone()))
            .collect()
    }

    /// (total dispatched, completed successfully) counters.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.total_tasks.load(Ordering::SeqCst),
            self.completed_tasks.load(Ordering::SeqCst),
        )
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn target_workers(&self) -> usize {
        self.target_workers.load(Ordering::SeqCst)
    }

    /// Set the worker target, clamped to `[0, max_workers]`.
    pub fn set_target_workers(&self, n: usize) {
        self.target_workers
            .store(n.min(self.max_workers), Ordering::SeqCst);
    }

    /// Raise the target by one if below the ceiling. Returns whether it
    /// changed.
    pub fn increase_workers(&self) -> bool {
        self.target_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t < self.max_workers).then_some(t + 1)
            })
            .is_ok()
    }

    /// Lower the target by one, but only while at least one slot is idle.
    /// Never cancels a running worker. Returns whether it changed.
    pub fn decrease_workers_if_idle(&self) -> bool {
        let active = self.active_workers();
        self.target_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t > active).then_some(t - 1)
            })
            .is_ok()
    }

    pub fn model(&self) -> String {
        self.model.lock().unwrap().clone()
    }

    /// Switch the agent model. Newly spawned workers pick it up; running
    /// workers keep the model they started with.
    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        if model.is_empty() {
            return;
        }
        *self.model.lock().unwrap() = model.clone();
        let mut models = self.available_models.lock().unwrap();
        if !models.contains(&model) {
            models.push(model);
        }
    }

    /// The selectable model list: deduplicated, no empty entries, always
    /// containing the current model.
    pub fn available_models(&self) -> Vec<String> {
        self.available_models.lock().unwrap().clone()
    }

    pub fn set_available_models(&self, models: Vec<String>) {
        let current = self.model();
        let mut deduped: Vec<String> = Vec::new();
        for model in models {
            if !model.is_empty() && !deduped.contains(&model) {
                deduped.push(model);
            }
        }
        if !deduped.contains(&current) {
            deduped.push(current);
        }
        *self.available_models.lock().unwrap() = deduped;
    }
}

/// Forward a child stream onto the bus, one line per message.
async fn pump_output(
    tx: mpsc::Sender<Message>,
    worker_id: usize,
    reader: impl AsyncRead + Unpin,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = tx
            .send_timeout(Message::Output { worker_id, text: line }, SEND_TIMEOUT)
            .await;
    }
}
