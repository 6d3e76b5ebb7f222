use clap::Parser;
use jobcoord::config::WorkerConfig;
use jobcoord::worker::Worker;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Run a worker process: claim-execute-report loop plus heartbeat, against
/// the shared database. Multiple workers may run concurrently and even on
/// different hosts; the coordination protocol is the only thing they share.
#[derive(Parser, Debug)]
#[command(name = "worker", version, about)]
struct Args {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _args = Args::parse();
    let (config, database_url) = WorkerConfig::from_env()?;
    let pool = jobcoord::db::connect(&database_url, 5).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let worker = Worker::new(pool, config);
    let worker_id = worker.worker_id().to_string();
    let run_task = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!(worker_id, "shutdown requested, stopping worker...");
    let _ = shutdown_tx.send(());

    match run_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "worker exited with error");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "worker task panicked");
            std::process::exit(1);
        }
    }

    tracing::info!("worker stopped");
    Ok(())
}
