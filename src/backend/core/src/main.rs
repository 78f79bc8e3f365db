//! OurArchive stats service - main entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ourarchive_stats::{
    api::{self, AppState},
    config::{Config, StoreBackend, StoreConfig},
    jobs::{AggregateStatsJob, JobScheduler},
    observability,
    stats::Aggregator,
    store::{DocumentStore, FirestoreStore, InMemoryStore},
};

#[derive(Parser)]
#[command(name = "ourarchive-stats", version, about = "OurArchive public stats aggregator")]
struct Cli {
    /// Configuration file; environment variables override its values
    #[arg(short, long, env = "OURARCHIVE_STATS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP trigger and run the daily schedule
    Serve,
    /// Aggregate once, print the snapshot as JSON and exit
    Aggregate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    observability::init("ourarchive-stats", &config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting OurArchive stats");

    let store = build_store(&config.store)?;
    let aggregator = Aggregator::with_config(store, config.aggregator.clone());

    match cli.command {
        Command::Serve => serve(config, aggregator).await,
        Command::Aggregate => {
            let snapshot = aggregator.compute_and_publish_stats().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Firestore => {
            let firestore = config.firestore_config()?;
            tracing::info!(
                project = %firestore.project_id,
                endpoint = %firestore.endpoint,
                "Using Firestore store"
            );
            Arc::new(FirestoreStore::new(firestore)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; published stats are not persisted");
            Arc::new(InMemoryStore::new())
        }
    };
    Ok(store)
}

async fn serve(config: Config, aggregator: Aggregator) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new();
    let mut scheduled = Vec::new();
    if config.scheduler.enabled {
        let job = AggregateStatsJob::new(aggregator.clone())
            .with_retry_policy(config.scheduler.retry_policy());
        let id = scheduler
            .schedule_cron(&config.scheduler.cron, Arc::new(job))
            .await?;
        tracing::info!(job_id = %id, cron = %config.scheduler.cron, "Daily aggregation scheduled");
        scheduled = scheduler.start().await;
    } else {
        tracing::info!("Scheduler disabled; aggregation runs on demand only");
    }

    let app = api::build_router(AppState::new(aggregator));

    let addr = config.server.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    scheduler.shutdown();
    for handle in scheduled {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
