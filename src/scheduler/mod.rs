//! The Scheduler control loop (§4.2): four cooperating periodic tasks
//! driven off independent cadences, shut down cooperatively via a
//! `oneshot::Receiver`.
//!
//! Grounded in the donor's `Scheduler::run` shape — a `tokio::select!` over
//! timers plus a shutdown future — generalized from one wake-and-dispatch
//! timer to four independent `tokio::time::interval`s, since the
//! coordination protocol's four sub-tasks run on different cadences and
//! must not block each other.

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::model::{DispatchStatus, ExecutionStatus};
use crate::repository::{dispatches, jobs, workers};
use crate::schedule;

pub struct Scheduler {
    pool: PgPool,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(pool: PgPool, config: SchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Run all four sub-tasks until `shutdown` fires, or until too many
    /// sub-task failures in a row (§7: "after N consecutive failures, the
    /// loop exits and the process terminates to be restarted by
    /// supervision"). Each sub-task is sequential internally (§5: "work
    /// inside each sub-task is sequential") but the four cadences
    /// interleave independently.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> AppResult<()> {
        info!("scheduler control loop started");

        let mut dispatch_tick = tokio::time::interval(self.config.poll_interval());
        let mut timeout_tick = tokio::time::interval(self.config.timeout_sweep_interval());
        let mut reaper_tick = tokio::time::interval(self.config.reaper_interval());
        let mut cleanup_tick = tokio::time::interval(self.config.cleanup_interval());

        let mut consecutive_failures: u32 = 0;

        loop {
            let outcome: Result<(), (&'static str, crate::error::AppError)> = tokio::select! {
                _ = dispatch_tick.tick() => self.dispatch_cycle().await.map_err(|e| ("dispatch cycle", e)),
                _ = timeout_tick.tick() => self.timeout_sweep().await.map_err(|e| ("timeout sweep", e)),
                _ = reaper_tick.tick() => self.worker_reaper().await.map_err(|e| ("worker reaper", e)),
                _ = cleanup_tick.tick() => self.cleanup().await.map_err(|e| ("cleanup", e)),
                _ = &mut shutdown => {
                    info!("scheduler control loop shutting down");
                    return Ok(());
                }
            };

            match outcome {
                Ok(()) => consecutive_failures = 0,
                Err((task, e)) => {
                    consecutive_failures += 1;
                    warn!(error = %e, task, consecutive_failures, "sub-task failed");
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        tracing::error!(
                            consecutive_failures,
                            task,
                            "too many consecutive sub-task failures, terminating for supervision to restart"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Task 1 (~10s default): create exactly one PENDING dispatch for every
    /// due, unlocked active job, in one transaction per cycle.
    async fn dispatch_cycle(&self) -> AppResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let due = jobs::lock_due_jobs(&mut tx, now).await?;

        for job in due {
            let next_run = match schedule::compute_next_run(&job, now) {
                Ok(next) => next,
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "skipping job with invalid schedule");
                    continue;
                }
            };

            dispatches::insert_pending(&mut *tx, job.id, 0, now).await?;
            let lock_until = now + self.config.dispatch_lock_duration();
            jobs::mark_dispatched(&mut tx, job.id, next_run, now, lock_until).await?;
            info!(job_id = job.id, ?next_run, "dispatched job");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Task 2 (~60s default): reclaim dispatches stuck IN_PROGRESS past the
    /// timeout threshold, retrying them up to `max_retry_attempts`.
    async fn timeout_sweep(&self) -> AppResult<()> {
        let now = Utc::now();
        let cutoff = now - self.config.timeout_threshold();
        let stuck = dispatches::in_progress_older_than(&self.pool, cutoff).await?;

        for dispatch in stuck {
            if let Some(worker_id) = &dispatch.worker_id {
                let still_alive = workers::get(&self.pool, worker_id)
                    .await?
                    .is_some_and(|w| w.last_heartbeat >= now - self.config.worker_offline_threshold());
                if still_alive {
                    // Genuinely still running past the claim age but the
                    // worker is heartbeating; leave it — the job's own
                    // wall-clock timeout is the Worker-side backstop.
                    continue;
                }
            }

            let mut tx = self.pool.begin().await?;
            dispatches::mark_timeout(&mut *tx, dispatch.id, now).await?;
            crate::repository::logs::insert(
                &mut *tx,
                dispatch.job_id,
                dispatch.claimed_at.unwrap_or(dispatch.created_at),
                ExecutionStatus::Timeout,
                "worker timeout",
            )
            .await?;

            if dispatch.retry_count < self.config.max_retry_attempts {
                dispatches::insert_pending(&mut *tx, dispatch.job_id, dispatch.retry_count + 1, now)
                    .await?;
                info!(
                    dispatch_id = dispatch.id,
                    job_id = dispatch.job_id,
                    retry_count = dispatch.retry_count + 1,
                    "timed-out dispatch retried"
                );
            } else {
                warn!(
                    dispatch_id = dispatch.id,
                    job_id = dispatch.job_id,
                    "timed-out dispatch exhausted retry budget"
                );
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Task 3 (~100s default): delete stale WorkerRegistration rows. The
    /// FK `ON DELETE SET NULL` on `job_dispatches.worker_id` hands any
    /// dispatch those workers held back to the timeout sweep.
    async fn worker_reaper(&self) -> AppResult<()> {
        let cutoff = Utc::now() - self.config.worker_offline_threshold();
        let reaped = workers::reap_stale(&self.pool, cutoff).await?;
        for worker_id in &reaped {
            info!(worker_id, "reaped stale worker registration");
        }
        Ok(())
    }

    /// Task 4 (~3600s default): delete terminal dispatches past the
    /// retention window.
    async fn cleanup(&self) -> AppResult<()> {
        let cutoff = Utc::now() - self.config.cleanup_retention();
        let deleted = dispatches::delete_terminal_older_than(&self.pool, cutoff).await?;
        if deleted > 0 {
            info!(deleted, "cleaned up terminal dispatch rows");
        }
        Ok(())
    }
}

/// Status values a completed/failed dispatch may report; kept here rather
/// than inlined at call sites for readability of `dispatches::complete`
/// callers outside this module (the Worker).
pub fn terminal_status_for_exit(success: bool) -> DispatchStatus {
    if success {
        DispatchStatus::Completed
    } else {
        DispatchStatus::Failed
    }
}
