use std::sync::Arc;

use process_orchestrator::channel::{MessageType, ProcessEvent};
use process_orchestrator::client::OrchestratorClient;
use process_orchestrator::config::{OrchestratorConfig, load_seed_file};
use process_orchestrator::store::{LibSqlBackend, ProcessStore};
use process_orchestrator::worker::ExecutorRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OrchestratorConfig::from_env()?;

    eprintln!("Process Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Default interval: {:?}", config.default_interval);
    eprintln!("   Press Ctrl-C to stop.\n");

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn ProcessStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Client + event logging ──────────────────────────────────────────
    let client = OrchestratorClient::new(Arc::clone(&store), config.clone());

    client
        .add_listener(MessageType::StatusChanged, |event| {
            if let ProcessEvent::StatusChanged {
                process_id,
                status,
                error_message,
                ..
            } = event
            {
                match error_message {
                    Some(message) => tracing::warn!(process_id = %process_id, status = %status, "{message}"),
                    None => tracing::info!(process_id = %process_id, status = %status, "Status changed"),
                }
            }
        })
        .await;
    client
        .add_listener(MessageType::ExecutionResult, |event| {
            tracing::debug!(process_id = %event.process_id(), "Execution result stored");
        })
        .await;
    client
        .add_listener(MessageType::ProcessStopped, |event| {
            tracing::info!(process_id = %event.process_id(), "Process stopped");
        })
        .await;

    // ── Worker (Sync re-arms processes persisted as running) ────────────
    let worker = client
        .spawn_worker(ExecutorRegistry::with_defaults(&config))
        .await?;

    // ── Seed processes ──────────────────────────────────────────────────
    if let Some(ref seed_path) = config.seed_file {
        let seeds = load_seed_file(seed_path)?;
        let mut started = 0;
        for seed in seeds {
            match client.start_process(&seed.id, seed.kind, seed.payload).await {
                Ok(_) => started += 1,
                Err(e) => tracing::warn!(process_id = %seed.id, "Failed to start seed process: {e}"),
            }
        }
        tracing::info!(started, path = %seed_path.display(), "Seed processes started");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    client.detach_worker().await;
    worker.shutdown().await;

    Ok(())
}
