use clap::Parser;
use jobcoord::config::SchedulerConfig;
use jobcoord::scheduler::Scheduler;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// Run the scheduler control loop: dispatch, timeout sweep, worker reaper
/// and cleanup, all coordinated through the shared database.
#[derive(Parser, Debug)]
#[command(name = "scheduler", version, about)]
struct Args {
    /// Run pending migrations before starting the control loop.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let (config, database_url) = SchedulerConfig::from_env()?;
    let pool = jobcoord::db::connect(&database_url, 10).await?;

    if args.migrate {
        jobcoord::db::migrate(&pool).await?;
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let scheduler = Scheduler::new(pool, config);
    let mut run_task = tokio::spawn(scheduler.run(shutdown_rx));

    // Race ctrl_c against the control loop itself: §7's consecutive-failure
    // budget can end the loop on its own (e.g. a database stuck down), and
    // that must actually terminate the process for supervision to restart
    // it rather than hang here waiting for a signal that may never come.
    let exit_result = tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c?;
            tracing::info!("shutdown requested, stopping scheduler...");
            let _ = shutdown_tx.send(());
            run_task.await
        }
        result = &mut run_task => result,
    };

    match exit_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "scheduler exited with error");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "scheduler task panicked");
            std::process::exit(1);
        }
    }

    tracing::info!("scheduler stopped");
    Ok(())
}
