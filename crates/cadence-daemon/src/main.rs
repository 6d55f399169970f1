use std::sync::Arc;

use cadence_core::{CadenceConfig, CadenceError};
use cadence_scheduler::{JobStore, Scheduler, SchedulerSettings, SqliteJobStore};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod maintenance;
mod report;

#[derive(Debug, Parser)]
#[command(name = "cadence-daemon", version, about = "Persistent periodic job scheduler")]
struct Cli {
    /// Config file (default: $CADENCE_CONFIG or ~/.cadence/cadence.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C (default).
    Run,
    /// List scheduled jobs.
    Jobs,
    /// Show recent executions.
    History {
        /// Only show executions of this job.
        #[arg(long)]
        job: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Re-enable a job.
    Enable { name: String },
    /// Stop dispatching a job without deleting it.
    Disable { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_daemon=info,cadence_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let store = open_store(&config.database.path).inspect_err(|e| {
        error!(code = e.code(), path = %config.database.path, "could not open job store: {e}")
    })?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Jobs => report::print_jobs(store.as_ref()),
        Command::History { job, limit } => {
            report::print_history(store.as_ref(), job.as_deref(), limit)
        }
        Command::Enable { name } => {
            store.set_job_enabled(&name, true)?;
            println!("{name}: enabled");
            Ok(())
        }
        Command::Disable { name } => {
            store.set_job_enabled(&name, false)?;
            println!("{name}: disabled");
            Ok(())
        }
    }
}

async fn run(config: CadenceConfig, store: Arc<dyn JobStore>) -> anyhow::Result<()> {
    let scheduler = Scheduler::with_settings(store, SchedulerSettings::from(&config.scheduler));
    maintenance::register_builtin_jobs(&scheduler, &config.maintenance)?;

    scheduler.start()?;
    info!("cadence daemon running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.stop().await;
    Ok(())
}

/// Open (creating if needed) the SQLite file and initialise the schema.
fn open_store(db_path: &str) -> cadence_core::Result<Arc<dyn JobStore>> {
    ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)
        .map_err(|e| CadenceError::Database(e.to_string()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| CadenceError::Database(e.to_string()))?;
    let store = SqliteJobStore::new(conn).map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(Arc::new(store))
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
