//! Ponder CLI - task graph store and agent orchestrator.

use clap::Parser;
use ponder::cli::{Cli, Commands, DbCommands};
use ponder::commands::{self, WorkOptions};
use ponder::store::Store;
use ponder::web;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "ponder=debug" } else { "ponder=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> ponder::Result<()> {
    match cli.command {
        Some(Commands::Init { dir }) => commands::init(&cli.db_path, &cli.snapshot_path, dir),
        Some(Commands::Mcp) => {
            let store = Arc::new(Store::open(&cli.db_path)?);
            store.enable_auto_snapshot(&cli.snapshot_path);
            ponder::mcp::serve(store);
            Ok(())
        }
        Some(Commands::Web { port }) => {
            let store = Arc::new(Store::open(&cli.db_path)?);
            let port = port.unwrap_or(cli.port);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(web::serve(store, port))
        }
        Some(Commands::ListFeatures) => {
            let store = Store::open(&cli.db_path)?;
            commands::list_features(&store)
        }
        Some(Commands::ListTasks { status, feature }) => {
            let store = Store::open(&cli.db_path)?;
            commands::list_tasks(&store, status.as_deref(), feature.as_deref())
        }
        Some(Commands::Status) | Some(Commands::Db {
            command: DbCommands::Status,
        }) => {
            let store = Store::open(&cli.db_path)?;
            commands::status(&store)
        }
        None => commands::run_orchestrator(
            &cli.db_path,
            &cli.snapshot_path,
            WorkOptions {
                max_concurrency: cli.max_concurrency,
                model: cli.model,
                interval: Duration::from_secs(cli.interval),
                web: cli.web,
                port: cli.port,
            },
        ),
    }
}
