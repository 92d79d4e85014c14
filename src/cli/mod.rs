//! CLI argument definitions for Ponder.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Ponder - a task graph store and agent orchestrator.
///
/// Running `ponder` with no command starts the orchestrator: it claims
/// ready tasks and dispatches them to agent subprocesses until idle.
#[derive(Parser, Debug)]
#[command(name = "ponder")]
#[command(version, about = "Task graph store and agent orchestrator", long_about = None)]
pub struct Cli {
    /// Path to the database file
    #[arg(
        long = "db-path",
        global = true,
        default_value = ".ponder/ponder.db",
        env = "PONDER_DB_PATH"
    )]
    pub db_path: PathBuf,

    /// Path to the snapshot file
    #[arg(
        long = "snapshot-path",
        global = true,
        default_value = ".ponder/snapshot.jsonl",
        env = "PONDER_SNAPSHOT_PATH"
    )]
    pub snapshot_path: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Maximum number of concurrent workers
    #[arg(long = "max_concurrency")]
    pub max_concurrency: Option<usize>,

    /// Model to use for workers
    #[arg(long)]
    pub model: Option<String>,

    /// Polling interval in seconds when idle (0 to exit when idle)
    #[arg(long, default_value_t = 5)]
    pub interval: u64,

    /// Serve the web UI alongside the orchestrator
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub web: bool,

    /// Port for the web UI
    #[arg(long, default_value_t = crate::web::DEFAULT_PORT)]
    pub port: u16,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize Ponder in a directory
    Init {
        /// Target directory (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Start the MCP server on stdio
    Mcp,

    /// Start the read-only web server
    Web {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// List all features
    ListFeatures,

    /// List tasks
    ListTasks {
        /// Filter by status (pending, in_progress, completed, blocked)
        #[arg(long)]
        status: Option<String>,

        /// Filter by feature name
        #[arg(long)]
        feature: Option<String>,
    },

    /// Show project status
    Status,

    /// Database commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

/// `ponder db` subcommands.
#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Show database status
    Status,
}
