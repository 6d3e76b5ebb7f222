//! Read-only views the management UI would consume (§6). The UI itself is
//! out of scope, but its read surface is exposed here as plain functions so
//! a future CLI or dashboard can depend on this library instead of
//! hand-rolling SQL against the schema.

use chrono::Utc;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::model::{JobDispatch, ScheduledJob, WorkerRegistration};

use super::{dispatches, jobs, workers};

/// All job definitions, active and inactive, ordered by id.
pub async fn job_overview(pool: &PgPool) -> AppResult<Vec<ScheduledJob>> {
    let rows = sqlx::query_as::<_, ScheduledJob>(
        r#"
        SELECT id, name, script_id, schedule_type, interval_seconds, schedule_time,
               schedule_minute, schedule_day, is_active, next_run, last_dispatched_at,
               dispatch_lock_until
        FROM scheduled_jobs
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn job_by_id(pool: &PgPool, job_id: i64) -> AppResult<Option<ScheduledJob>> {
    jobs::get(pool, job_id).await
}

/// `WorkerRegistration` rows whose heartbeat is fresher than
/// `offline_threshold` — the "active workers" view named in §6.
pub async fn active_workers(
    pool: &PgPool,
    offline_threshold: chrono::Duration,
) -> AppResult<Vec<WorkerRegistration>> {
    workers::active(pool, Utc::now() - offline_threshold).await
}

pub async fn dispatch_history_for_job(
    pool: &PgPool,
    job_id: i64,
    limit: i64,
) -> AppResult<Vec<JobDispatch>> {
    dispatches::history_for_job(pool, job_id, limit).await
}
