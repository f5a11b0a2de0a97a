//! doorman - kiosk sync engine demo.
//!
//! Wires simulated SyncUnits into the engine and plays a short session:
//! login, a push, a contact sync, a connectivity drop, logout.
//!
//! Usage:
//!   doorman --config doorman.toml [--db sync.db] [--failure-rate 0.2]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use doorman_core::app::tasks::ALL_TASKS;
use doorman_core::impls::{NetworkMonitor, SqliteTaskStore};
use doorman_core::{EngineBuilder, JobEngine, SessionEvent, SyncConfig, SyncOrchestrator};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info};

mod demo;

#[derive(Debug, Parser)]
#[command(name = "doorman", version, about = "Kiosk sync engine demo")]
struct Args {
    /// Path to the TOML config file (missing file = defaults).
    #[arg(long, default_value = "doorman.toml")]
    config: PathBuf,

    /// Override `database_path` from the config.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Probability that a simulated unit fails with a transient error.
    #[arg(long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Seconds to keep running after the scripted session before shutting down.
    #[arg(long, default_value_t = 60)]
    linger_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("doorman failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SyncConfig::load(&args.config)?;
    if let Some(db) = args.db {
        config.database_path = db;
    }
    info!(
        database = %config.database_path.display(),
        workers = config.workers,
        "doorman starting"
    );

    let network = Arc::new(NetworkMonitor::new(true));
    let store = Arc::new(SqliteTaskStore::open(&config.database_path)?);
    let units = demo::simulated_units(args.failure_rate, &network);

    let engine = EngineBuilder::new()
        .store(store)
        .network(network.clone())
        .history_limit(config.history_limit)
        .register_all(units.definitions(&config))?
        .expect_tasks(&ALL_TASKS)
        .build()?;
    let workers = engine.start(config.workers).await?;

    let orchestrator = SyncOrchestrator::new(Arc::clone(&engine));
    let (session_tx, session_rx) = mpsc::channel(8);
    let listener = orchestrator.spawn_session_listener(session_rx);

    let script = async {
        session_tx.send(SessionEvent::LoggedIn).await?;
        sleep(Duration::from_secs(2)).await;
        report(&engine)?;

        orchestrator.enqueue_push().await;
        orchestrator.enqueue_contact_sync().await;
        orchestrator.enqueue_contact_sync().await;

        info!("simulating connectivity loss");
        network.set_online(false);
        orchestrator.enqueue_push().await;
        sleep(Duration::from_secs(5)).await;
        report(&engine)?;

        network.set_online(true);
        sleep(Duration::from_secs(5)).await;
        report(&engine)?;

        session_tx.send(SessionEvent::LoggedOut).await?;
        sleep(Duration::from_secs(args.linger_secs)).await;
        Ok::<_, Box<dyn std::error::Error>>(())
    };

    tokio::select! {
        result = script => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    drop(session_tx);
    if let Err(e) = listener.await {
        error!(error = %e, "session listener failed");
    }
    workers.shutdown_and_join().await;
    report(&engine)?;
    info!("doorman stopped");
    Ok(())
}

fn report(engine: &JobEngine) -> Result<(), Box<dyn std::error::Error>> {
    let counts = engine.counts()?;
    println!("{}", serde_json::to_string(&counts)?);
    Ok(())
}
