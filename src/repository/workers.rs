//! `worker_registrations` access: registration, heartbeat, and reaping.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::AppResult;
use crate::model::{WorkerRegistration, WorkerStatus};

pub async fn register<'e, E: PgExecutor<'e>>(
    executor: E,
    worker_id: &str,
    hostname: &str,
    platform: &str,
    process_id: i32,
    now: DateTime<Utc>,
) -> AppResult<WorkerRegistration> {
    let worker = sqlx::query_as::<_, WorkerRegistration>(
        r#"
        INSERT INTO worker_registrations
            (worker_id, hostname, platform, started_at, last_heartbeat, status,
             jobs_processed, current_job_id, process_id)
        VALUES ($1, $2, $3, $4, $4, 'IDLE', 0, NULL, $5)
        RETURNING worker_id, hostname, platform, started_at, last_heartbeat, status,
                  jobs_processed, current_job_id, process_id
        "#,
    )
    .bind(worker_id)
    .bind(hostname)
    .bind(platform)
    .bind(now)
    .bind(process_id)
    .fetch_one(executor)
    .await?;
    Ok(worker)
}

pub async fn heartbeat<'e, E: PgExecutor<'e>>(
    executor: E,
    worker_id: &str,
    status: WorkerStatus,
    current_job_id: Option<i64>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE worker_registrations
        SET last_heartbeat = $2, status = $3, current_job_id = $4
        WHERE worker_id = $1
        "#,
    )
    .bind(worker_id)
    .bind(now)
    .bind(status)
    .bind(current_job_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Mark this worker idle and bump its completed-job counter, in the same
/// transaction that reports the dispatch outcome.
pub async fn mark_idle_after_job<'e, E: PgExecutor<'e>>(
    executor: E,
    worker_id: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE worker_registrations
        SET status = 'IDLE', current_job_id = NULL, jobs_processed = jobs_processed + 1,
            last_heartbeat = $2
        WHERE worker_id = $1
        "#,
    )
    .bind(worker_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get<'e, E: PgExecutor<'e>>(
    executor: E,
    worker_id: &str,
) -> AppResult<Option<WorkerRegistration>> {
    let worker = sqlx::query_as::<_, WorkerRegistration>(
        r#"
        SELECT worker_id, hostname, platform, started_at, last_heartbeat, status,
               jobs_processed, current_job_id, process_id
        FROM worker_registrations WHERE worker_id = $1
        "#,
    )
    .bind(worker_id)
    .fetch_optional(executor)
    .await?;
    Ok(worker)
}

/// Update only `last_heartbeat`, leaving `status`/`current_job_id` alone.
/// Used by the worker's standalone heartbeat task, which shares nothing
/// with the main loop but the pool handle and so cannot know what job (if
/// any) is currently claimed.
pub async fn touch_heartbeat<'e, E: PgExecutor<'e>>(
    executor: E,
    worker_id: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query("UPDATE worker_registrations SET last_heartbeat = $2 WHERE worker_id = $1")
        .bind(worker_id)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

/// Graceful shutdown: remove this worker's own registration row.
pub async fn deregister<'e, E: PgExecutor<'e>>(executor: E, worker_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM worker_registrations WHERE worker_id = $1")
        .bind(worker_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Delete registrations whose heartbeat is older than `cutoff`. Returns the
/// deleted worker_ids so the reaper can log which workers it reaped.
pub async fn reap_stale<'e, E: PgExecutor<'e>>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> AppResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "DELETE FROM worker_registrations WHERE last_heartbeat < $1 RETURNING worker_id",
    )
    .bind(cutoff)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Workers whose heartbeat is fresher than `cutoff` — the "active workers"
/// view the management UI reads (§6).
pub async fn active<'e, E: PgExecutor<'e>>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> AppResult<Vec<WorkerRegistration>> {
    let rows = sqlx::query_as::<_, WorkerRegistration>(
        r#"
        SELECT worker_id, hostname, platform, started_at, last_heartbeat, status,
               jobs_processed, current_job_id, process_id
        FROM worker_registrations
        WHERE last_heartbeat > $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
