//! `job_dispatches` access: dispatch creation, the claim CAS, the timeout
//! sweep, and terminal-row cleanup.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::AppResult;
use crate::model::{DispatchStatus, JobDispatch};

/// Insert a fresh `PENDING` dispatch. `retry_count` is 0 for an original
/// dispatch and `previous.retry_count + 1` for a dispatch spawned by the
/// timeout sweep's retry logic.
pub async fn insert_pending<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    retry_count: i32,
    now: DateTime<Utc>,
) -> AppResult<JobDispatch> {
    let dispatch = sqlx::query_as::<_, JobDispatch>(
        r#"
        INSERT INTO job_dispatches (job_id, created_at, status, retry_count)
        VALUES ($1, $2, 'PENDING', $3)
        RETURNING id, job_id, created_at, claimed_at, completed_at, status, worker_id,
                  retry_count, error_message
        "#,
    )
    .bind(job_id)
    .bind(now)
    .bind(retry_count)
    .fetch_one(executor)
    .await?;
    Ok(dispatch)
}

/// Select the oldest `PENDING` dispatch without claiming it. The Worker
/// attempts the CAS in `try_claim` next; if it loses the race the loop
/// simply polls again, so there is no need to lock this read.
pub async fn oldest_pending<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<Option<JobDispatch>> {
    let dispatch = sqlx::query_as::<_, JobDispatch>(
        r#"
        SELECT id, job_id, created_at, claimed_at, completed_at, status, worker_id,
               retry_count, error_message
        FROM job_dispatches
        WHERE status = 'PENDING'
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(executor)
    .await?;
    Ok(dispatch)
}

/// Atomically claim dispatch `id` for `worker_id`, conditioned on it still
/// being `PENDING`. Returns `true` iff this call won the race — the sole
/// correctness mechanism behind "at most one worker observes its claim
/// succeed" (testable property 1).
pub async fn try_claim<'e, E: PgExecutor<'e>>(
    executor: E,
    dispatch_id: i64,
    worker_id: &str,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE job_dispatches
        SET status = 'IN_PROGRESS', worker_id = $2, claimed_at = $3
        WHERE id = $1 AND status = 'PENDING'
        "#,
    )
    .bind(dispatch_id)
    .bind(worker_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Record a terminal outcome reached by the Worker: `COMPLETED` on exit 0,
/// `FAILED` otherwise.
pub async fn complete<'e, E: PgExecutor<'e>>(
    executor: E,
    dispatch_id: i64,
    status: DispatchStatus,
    now: DateTime<Utc>,
    error_message: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE job_dispatches
        SET status = $2, completed_at = $3, error_message = $4
        WHERE id = $1
        "#,
    )
    .bind(dispatch_id)
    .bind(status)
    .bind(now)
    .bind(error_message)
    .execute(executor)
    .await?;
    Ok(())
}

/// Release a dispatch this worker still holds, for graceful shutdown:
/// reset it to `PENDING` so another worker can pick it up.
pub async fn release<'e, E: PgExecutor<'e>>(
    executor: E,
    dispatch_id: i64,
    worker_id: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE job_dispatches
        SET status = 'PENDING', worker_id = NULL, claimed_at = NULL
        WHERE id = $1 AND worker_id = $2 AND status = 'IN_PROGRESS'
        "#,
    )
    .bind(dispatch_id)
    .bind(worker_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Dispatches stuck `IN_PROGRESS` whose claim is older than the timeout
/// threshold — the timeout sweep's candidate set.
pub async fn in_progress_older_than<'e, E: PgExecutor<'e>>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> AppResult<Vec<JobDispatch>> {
    let rows = sqlx::query_as::<_, JobDispatch>(
        r#"
        SELECT id, job_id, created_at, claimed_at, completed_at, status, worker_id,
               retry_count, error_message
        FROM job_dispatches
        WHERE status = 'IN_PROGRESS' AND claimed_at < $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn mark_timeout<'e, E: PgExecutor<'e>>(
    executor: E,
    dispatch_id: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE job_dispatches
        SET status = 'TIMEOUT', completed_at = $2, error_message = 'worker timeout'
        WHERE id = $1
        "#,
    )
    .bind(dispatch_id)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Delete terminal dispatches past the retention window (§4.2 task 4).
/// Returns the number of rows removed, purely for logging — callers never
/// branch on the count.
pub async fn delete_terminal_older_than<'e, E: PgExecutor<'e>>(
    executor: E,
    cutoff: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM job_dispatches
        WHERE status IN ('COMPLETED', 'FAILED', 'TIMEOUT') AND completed_at < $1
        "#,
    )
    .bind(cutoff)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn history_for_job<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    limit: i64,
) -> AppResult<Vec<JobDispatch>> {
    let rows = sqlx::query_as::<_, JobDispatch>(
        r#"
        SELECT id, job_id, created_at, claimed_at, completed_at, status, worker_id,
               retry_count, error_message
        FROM job_dispatches
        WHERE job_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(job_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
