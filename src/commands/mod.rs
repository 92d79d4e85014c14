//! Command implementations for the Ponder CLI.

use crate::config::{self, Defaults};
use crate::models::{Feature, TaskStatus};
use crate::orchestrator::{Message, Orchestrator, OrchestratorConfig, SUPERVISOR_ID};
use crate::store::Store;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default database location relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".ponder/ponder.db";

/// Default snapshot location relative to the working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = ".ponder/snapshot.jsonl";

/// Description of the seeded catch-all feature.
const MISC_FEATURE_DESCRIPTION: &str = "Default feature for uncategorized tasks";

/// `ponder init [dir]`: create the `.ponder/` layout, initialize the
/// schema, and either import an existing snapshot or seed the default
/// `misc` feature.
pub fn init(db_path: &Path, snapshot_path: &Path, target_dir: Option<PathBuf>) -> Result<()> {
    let target_dir = target_dir.unwrap_or_else(|| PathBuf::from("."));
    let ponder_dir = target_dir.join(".ponder");
    fs::create_dir_all(&ponder_dir)?;
    println!("✓ Created .ponder/ directory");

    let gitignore_path = ponder_dir.join(".gitignore");
    fs::write(&gitignore_path, "ponder.db*\n")?;
    println!("✓ Created .ponder/.gitignore");

    let config_path = ponder_dir.join("config.json");
    if !config_path.exists() {
        config::write_default_config(&config_path)?;
        println!("✓ Created .ponder/config.json");
    }

    // With default paths, anchor the database and snapshot inside the
    // target directory rather than the working directory.
    let db_path = if db_path == Path::new(DEFAULT_DB_PATH) {
        ponder_dir.join("ponder.db")
    } else {
        db_path.to_path_buf()
    };
    let snapshot_path = if snapshot_path == Path::new(DEFAULT_SNAPSHOT_PATH) {
        ponder_dir.join("snapshot.jsonl")
    } else {
        snapshot_path.to_path_buf()
    };

    let store = Store::open(&db_path)?;
    println!("✓ Initialized database at {}", db_path.display());

    if snapshot_path.exists() {
        store.import_snapshot(&snapshot_path)?;
        println!("✓ Imported snapshot from {}", snapshot_path.display());
    } else if store.get_feature_by_name("misc")?.is_none() {
        let mut misc = Feature::new("misc");
        misc.description = MISC_FEATURE_DESCRIPTION.to_string();
        store.create_feature(&mut misc)?;
        println!("✓ Seeded default 'misc' feature");
    }

    println!("✓ Ponder initialized successfully");
    Ok(())
}

/// `ponder list-features`: table of all features.
pub fn list_features(store: &Store) -> Result<()> {
    let features = store.list_features()?;
    println!("{:<20} {:<30}", "NAME", "DESCRIPTION");
    println!("{}", "-".repeat(60));
    for f in features {
        println!("{:<20} {:<30}", f.name, f.description);
    }
    Ok(())
}

/// `ponder list-tasks [--status ..] [--feature ..]`: table of tasks.
pub fn list_tasks(store: &Store, status: Option<&str>, feature: Option<&str>) -> Result<()> {
    let status = match status {
        Some(s) => Some(
            TaskStatus::parse(s)
                .ok_or_else(|| Error::InvalidInput(format!("invalid status '{s}'")))?,
        ),
        None => None,
    };

    let tasks = store.list_tasks(status, feature)?;
    println!(
        "{:<30} {:<15} {:<10} {:<15}",
        "NAME", "FEATURE", "PRIORITY", "STATUS"
    );
    println!("{}", "-".repeat(70));
    for t in tasks {
        println!(
            "{:<30} {:<15} {:<10} {:<15}",
            t.name, t.feature_name, t.priority, t.status
        );
    }
    Ok(())
}

/// `ponder status`: summary counts and the next available tasks.
pub fn status(store: &Store) -> Result<()> {
    let features = store.list_features()?;
    let tasks = store.list_tasks(None, None)?;
    let available = store.get_available_tasks()?;

    println!("Ponder Project Status");
    println!("=====================");
    println!("Features:        {}", features.len());
    println!("Total Tasks:     {}", tasks.len());
    println!("Available Tasks: {}", available.len());

    let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
    println!("\nTask Breakdown:");
    println!("  Pending:     {}", count(TaskStatus::Pending));
    println!("  In Progress: {}", count(TaskStatus::InProgress));
    println!("  Completed:   {}", count(TaskStatus::Completed));
    println!("  Blocked:     {}", count(TaskStatus::Blocked));

    if !available.is_empty() {
        println!("\nNext Available Tasks:");
        for t in available.iter().take(5) {
            println!("  - {} (priority: {})", t.name, t.priority);
        }
    }

    Ok(())
}

/// Flags that feed the orchestrator run.
pub struct WorkOptions {
    pub max_concurrency: Option<usize>,
    pub model: Option<String>,
    pub interval: Duration,
    pub web: bool,
    pub port: u16,
}

/// Run the orchestrator headlessly: bus messages become log lines, Ctrl-C
/// triggers the orderly shutdown.
pub fn run_orchestrator(db_path: &Path, snapshot_path: &Path, options: WorkOptions) -> Result<()> {
    let defaults = config::load_defaults(db_path)?;
    let Defaults {
        model,
        max_concurrency,
        available_models,
    } = defaults;

    let max_workers = options.max_concurrency.unwrap_or(max_concurrency);
    let model = options.model.unwrap_or(model);

    let store = Arc::new(Store::open(db_path)?);
    store.enable_auto_snapshot(snapshot_path);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (orch, mut rx) = Orchestrator::new(
            Arc::clone(&store),
            OrchestratorConfig {
                max_workers,
                model,
                polling_interval: options.interval,
                ..OrchestratorConfig::default()
            },
        );
        orch.set_available_models(available_models);

        let printer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                print_message(msg);
            }
        });

        let web_shutdown = tokio_util::sync::CancellationToken::new();
        if options.web {
            let store = Arc::clone(&store);
            let port = options.port;
            let shutdown = web_shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::web::serve_with_shutdown(store, port, shutdown).await {
                    tracing::error!("web server error: {e}");
                }
            });
        }

        let signal_orch = Arc::clone(&orch);
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_orch.stop();
            }
        });

        let result = orch.run().await;
        web_shutdown.cancel();
        // Drop every Arc holding the bus sender so the printer drains out.
        signal_task.abort();
        let _ = signal_task.await;
        drop(orch);
        let _ = printer.await;

        match result {
            // A requested stop is a clean exit.
            Err(Error::Canceled) => Ok(()),
            other => other,
        }
    })
}

fn print_message(msg: Message) {
    match msg {
        Message::WorkerStarted { worker_id, task } => {
            println!("[worker {worker_id}] claimed '{}' ({})", task.name, task.feature_name);
        }
        Message::TaskStarted { worker_id, task_name } => {
            println!("[worker {worker_id}] running '{task_name}'");
        }
        Message::Output { worker_id, text } => {
            println!("[worker {worker_id}] {text}");
        }
        Message::Status { worker_id, text } => {
            if worker_id == SUPERVISOR_ID {
                println!("--- {text} ---");
            } else {
                println!("[worker {worker_id}] {text}");
            }
        }
        Message::TaskCompleted {
            worker_id,
            task_name,
            success,
        } => {
            if success {
                println!("[worker {worker_id}] finished '{task_name}'");
            } else {
                println!("[worker {worker_id}] failed '{task_name}', returned to pending");
            }
        }
        Message::Idle(idle) => {
            if idle {
                println!("--- idle: no runnable tasks ---");
            }
        }
        Message::Error(e) => {
            eprintln!("orchestrator error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_layout_and_seeds_misc() {
        let dir = TempDir::new().unwrap();
        init(
            Path::new(DEFAULT_DB_PATH),
            Path::new(DEFAULT_SNAPSHOT_PATH),
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let ponder_dir = dir.path().join(".ponder");
        assert_eq!(
            fs::read_to_string(ponder_dir.join(".gitignore")).unwrap(),
            "ponder.db*\n"
        );
        assert!(ponder_dir.join("config.json").exists());

        let store = Store::open(ponder_dir.join("ponder.db")).unwrap();
        let misc = store.get_feature_by_name("misc").unwrap().unwrap();
        assert_eq!(misc.description, MISC_FEATURE_DESCRIPTION);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = Some(dir.path().to_path_buf());
        init(
            Path::new(DEFAULT_DB_PATH),
            Path::new(DEFAULT_SNAPSHOT_PATH),
            target.clone(),
        )
        .unwrap();
        init(
            Path::new(DEFAULT_DB_PATH),
            Path::new(DEFAULT_SNAPSHOT_PATH),
            target,
        )
        .unwrap();

        let store = Store::open(dir.path().join(".ponder/ponder.db")).unwrap();
        // Still exactly one misc feature.
        assert_eq!(store.list_features().unwrap().len(), 1);
    }

    #[test]
    fn test_init_imports_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let ponder_dir = dir.path().join(".ponder");
        fs::create_dir_all(&ponder_dir).unwrap();
        fs::write(
            ponder_dir.join("snapshot.jsonl"),
            concat!(
                r#"{"record_type": "meta", "schema_version": "1"}"#,
                "\n",
                r#"{"record_type": "feature", "name": "imported", "description": "d", "specification": "s"}"#,
                "\n",
            ),
        )
        .unwrap();

        init(
            Path::new(DEFAULT_DB_PATH),
            Path::new(DEFAULT_SNAPSHOT_PATH),
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let store = Store::open(ponder_dir.join("ponder.db")).unwrap();
        assert!(store.get_feature_by_name("imported").unwrap().is_some());
        // Snapshot import takes the place of seeding.
        assert!(store.get_feature_by_name("misc").unwrap().is_none());
    }
}
