//! The Worker (§4.3): a claim-execute-report loop with optimistic locking,
//! a standalone heartbeat task, backoff polling, and graceful shutdown.
//!
//! Grounded in the same main-loop-plus-heartbeat-task split the Scheduler
//! uses (see `crate::scheduler`), generalized here to two independently
//! spawned tasks that share only the `PgPool` handle — the main loop owns
//! claim/execute/report state, the heartbeat task only ever touches
//! `last_heartbeat`, so neither can corrupt the other's view of what this
//! worker is doing.

pub mod executor;

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{AppError, AppResult};
use crate::model::{DispatchStatus, ExecutionStatus, JobDispatch, ScheduledJob, WorkerStatus};
use crate::repository::{dispatches, jobs, logs, workers};
use crate::scheduler::terminal_status_for_exit;

pub struct Worker {
    pool: PgPool,
    config: WorkerConfig,
    worker_id: String,
    hostname: String,
    platform: String,
}

impl Worker {
    pub fn new(pool: PgPool, config: WorkerConfig) -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
        Self {
            pool,
            config,
            worker_id: Uuid::new_v4().to_string(),
            hostname,
            platform: std::env::consts::OS.to_string(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn register(&self) -> AppResult<()> {
        let now = Utc::now();
        let pid = std::process::id() as i32;
        workers::register(&self.pool, &self.worker_id, &self.hostname, &self.platform, pid, now).await?;
        Ok(())
    }

    /// Run the claim-execute-report loop until `shutdown` fires. Registers
    /// on entry and deregisters on exit (§4.3: a worker's registration row
    /// only ever lives for the lifetime of its process).
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> AppResult<()> {
        self.register().await?;
        info!(worker_id = %self.worker_id, "worker registered");

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            self.pool.clone(),
            self.worker_id.clone(),
            self.config.heartbeat_interval(),
            stop_rx,
        ));

        let result = self.main_loop(&mut shutdown).await;

        let _ = stop_tx.send(true);
        let _ = heartbeat_handle.await;

        if let Err(e) = workers::deregister(&self.pool, &self.worker_id).await {
            warn!(error = %e, "failed to deregister worker on shutdown");
        }
        info!(worker_id = %self.worker_id, "worker shut down");
        result
    }

    async fn main_loop(&self, shutdown: &mut oneshot::Receiver<()>) -> AppResult<()> {
        let mut poll_interval = self.config.poll_interval();

        loop {
            // Checked up front (not just in the empty-queue sleep branch
            // below) so a backlog of PENDING dispatches can't starve
            // shutdown: "stop accepting new claims" applies before every
            // claim attempt, not just while idle.
            if shutdown.try_recv().is_ok() {
                info!(worker_id = %self.worker_id, "worker received shutdown signal, stopping claims");
                return Ok(());
            }

            let candidate = dispatches::oldest_pending(&self.pool).await?;
            let Some(dispatch) = candidate else {
                poll_interval = next_backoff(poll_interval, self.config.backoff_factor, self.config.max_poll_interval());
                tokio::select! {
                    biased;
                    _ = &mut *shutdown => {
                        info!(worker_id = %self.worker_id, "worker received shutdown signal while idle");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            };

            let claimed = dispatches::try_claim(&self.pool, dispatch.id, &self.worker_id, Utc::now()).await?;
            if !claimed {
                // Another worker won the race; poll again immediately.
                poll_interval = self.config.poll_interval();
                continue;
            }
            poll_interval = self.config.poll_interval();

            // Step 4 ("Loop"): re-poll immediately after reporting, so a
            // worker with a full backlog drains it back-to-back instead of
            // paying a poll_interval sleep between every job.
            self.process_claimed(dispatch, shutdown).await?;
        }
    }

    async fn process_claimed(&self, dispatch: JobDispatch, shutdown: &mut oneshot::Receiver<()>) -> AppResult<()> {
        let job = match jobs::get(&self.pool, dispatch.job_id).await? {
            Some(job) => job,
            None => {
                // §7's one named invariant-violation example: a claimed
                // dispatch whose job no longer exists. Treated as FAILED
                // with a diagnostic error_message; never retried.
                let err = AppError::invariant(format!(
                    "dispatch {} claims job {} which no longer exists",
                    dispatch.id, dispatch.job_id
                ));
                warn!(dispatch_id = dispatch.id, job_id = dispatch.job_id, error = %err, "invariant violation");
                dispatches::complete(&self.pool, dispatch.id, DispatchStatus::Failed, Utc::now(), Some(&err.to_string())).await?;
                return Ok(());
            }
        };

        workers::heartbeat(&self.pool, &self.worker_id, WorkerStatus::Busy, Some(job.id), Utc::now()).await?;
        info!(dispatch_id = dispatch.id, job_id = job.id, worker_id = %self.worker_id, "claimed dispatch");

        let script_path = match self.config.resolve_script_path(&job.script_id) {
            Ok(path) => path,
            Err(e) => {
                // Full detail (which path, which root) is worth logging,
                // but §4.3 step 2 quotes the persisted error_message
                // literally as "invalid script path".
                warn!(dispatch_id = dispatch.id, error = %e, "refusing to execute unsafe script path");
                self.report_terminal(&dispatch, &job, DispatchStatus::Failed, ExecutionStatus::Error, "invalid script path").await?;
                return Ok(());
            }
        };

        let exec_fut = Box::pin(executor::execute(&script_path, self.config.job_timeout(), self.config.max_log_bytes));

        tokio::select! {
            biased;
            _ = &mut *shutdown => {
                warn!(dispatch_id = dispatch.id, "shutdown requested mid-execution; granting grace period");
                self.wait_out_grace(dispatch, job, exec_fut).await?;
            }
            outcome = exec_fut => {
                self.finish_execution(&dispatch, &job, outcome?).await?;
            }
        }
        Ok(())
    }

    async fn wait_out_grace(
        &self,
        dispatch: JobDispatch,
        job: ScheduledJob,
        mut exec_fut: std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<executor::ExecutionOutcome>> + Send>>,
    ) -> AppResult<()> {
        match tokio::time::timeout(self.config.shutdown_grace(), &mut exec_fut).await {
            Ok(outcome) => self.finish_execution(&dispatch, &job, outcome?).await,
            Err(_elapsed) => {
                warn!(dispatch_id = dispatch.id, "shutdown grace period expired; releasing dispatch for another worker");
                dispatches::release(&self.pool, dispatch.id, &self.worker_id).await
            }
        }
    }

    async fn finish_execution(&self, dispatch: &JobDispatch, job: &ScheduledJob, outcome: executor::ExecutionOutcome) -> AppResult<()> {
        let status = terminal_status_for_exit(outcome.success);
        let exec_status = if outcome.timed_out {
            ExecutionStatus::Timeout
        } else if outcome.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        };
        self.report_terminal(dispatch, job, status, exec_status, &outcome.output).await
    }

    async fn report_terminal(
        &self,
        dispatch: &JobDispatch,
        job: &ScheduledJob,
        status: DispatchStatus,
        exec_status: ExecutionStatus,
        output: &str,
    ) -> AppResult<()> {
        let now = Utc::now();
        let error_message = (exec_status != ExecutionStatus::Success).then_some(output);

        let mut tx = self.pool.begin().await?;
        dispatches::complete(&mut *tx, dispatch.id, status, now, error_message).await?;
        logs::insert(&mut *tx, job.id, dispatch.claimed_at.unwrap_or(dispatch.created_at), exec_status, output).await?;
        tx.commit().await?;

        workers::mark_idle_after_job(&self.pool, &self.worker_id, Utc::now()).await?;
        info!(dispatch_id = dispatch.id, job_id = job.id, ?status, "dispatch reported terminal");
        Ok(())
    }
}

fn next_backoff(current: Duration, factor: f64, cap: Duration) -> Duration {
    let scaled = current.as_secs_f64() * factor;
    Duration::from_secs_f64(scaled.min(cap.as_secs_f64()))
}

/// Standalone heartbeat task: owns nothing but the pool and this worker's
/// id, so it cannot race the main loop's status/current_job_id writes.
async fn heartbeat_loop(pool: PgPool, worker_id: String, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = workers::touch_heartbeat(&pool, &worker_id, Utc::now()).await {
                    warn!(worker_id = %worker_id, error = %e, "heartbeat update failed");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let cap = Duration::from_secs(60);
        let mut interval = Duration::from_secs(5);
        for _ in 0..20 {
            interval = next_backoff(interval, 1.5, cap);
        }
        assert_eq!(interval, cap);
    }

    #[test]
    fn backoff_does_not_exceed_cap_on_first_step() {
        let interval = next_backoff(Duration::from_secs(50), 1.5, Duration::from_secs(60));
        assert_eq!(interval, Duration::from_secs(60));
    }
}
