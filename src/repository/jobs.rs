//! `scheduled_jobs` access: due-job selection for the dispatch cycle plus
//! the management-facing CRUD surface (§6).

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::AppResult;
use crate::model::{ScheduleType, ScheduledJob};

/// Select active jobs whose `next_run <= now` and whose dispatch lock has
/// expired (or was never set), row-locking with `SKIP LOCKED` so a
/// concurrent Scheduler instance selecting the same window doesn't block
/// on — or double-dispatch — a row another instance already grabbed.
///
/// Must be called against an open transaction; the caller commits after
/// writing the new dispatch and lock for each returned job.
pub async fn lock_due_jobs(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    now: DateTime<Utc>,
) -> AppResult<Vec<ScheduledJob>> {
    let jobs = sqlx::query_as::<_, ScheduledJob>(
        r#"
        SELECT id, name, script_id, schedule_type, interval_seconds, schedule_time,
               schedule_minute, schedule_day, is_active, next_run, last_dispatched_at,
               dispatch_lock_until
        FROM scheduled_jobs
        WHERE is_active
          AND next_run IS NOT NULL
          AND next_run <= $1
          AND (dispatch_lock_until IS NULL OR dispatch_lock_until < $1)
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .fetch_all(&mut **tx)
    .await?;
    Ok(jobs)
}

/// Record that a dispatch was just created for `job_id`: advance
/// `next_run`, stamp `last_dispatched_at`, and open a new dispatch-lock
/// window.
pub async fn mark_dispatched(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: i64,
    next_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lock_until: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE scheduled_jobs
        SET next_run = $2, last_dispatched_at = $3, dispatch_lock_until = $4
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(next_run)
    .bind(now)
    .bind(lock_until)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get<'e, E: PgExecutor<'e>>(executor: E, job_id: i64) -> AppResult<Option<ScheduledJob>> {
    let job = sqlx::query_as::<_, ScheduledJob>(
        r#"
        SELECT id, name, script_id, schedule_type, interval_seconds, schedule_time,
               schedule_minute, schedule_day, is_active, next_run, last_dispatched_at,
               dispatch_lock_until
        FROM scheduled_jobs WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(executor)
    .await?;
    Ok(job)
}

#[allow(clippy::too_many_arguments)]
pub async fn create<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
    script_id: &str,
    schedule_type: ScheduleType,
    interval_seconds: Option<i64>,
    schedule_time: Option<&str>,
    schedule_minute: Option<i32>,
    schedule_day: Option<i32>,
    initial_next_run: Option<DateTime<Utc>>,
) -> AppResult<ScheduledJob> {
    let job = sqlx::query_as::<_, ScheduledJob>(
        r#"
        INSERT INTO scheduled_jobs
            (name, script_id, schedule_type, interval_seconds, schedule_time,
             schedule_minute, schedule_day, is_active, next_run)
        VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8)
        RETURNING id, name, script_id, schedule_type, interval_seconds, schedule_time,
                  schedule_minute, schedule_day, is_active, next_run, last_dispatched_at,
                  dispatch_lock_until
        "#,
    )
    .bind(name)
    .bind(script_id)
    .bind(schedule_type)
    .bind(interval_seconds)
    .bind(schedule_time)
    .bind(schedule_minute)
    .bind(schedule_day)
    .bind(initial_next_run)
    .fetch_one(executor)
    .await?;
    Ok(job)
}

/// Toggle `is_active`. Flipping to inactive does not clear `next_run`; the
/// dispatch cycle's `WHERE is_active` guard is what stops it from firing.
pub async fn set_active<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    is_active: bool,
) -> AppResult<()> {
    sqlx::query("UPDATE scheduled_jobs SET is_active = $2 WHERE id = $1")
        .bind(job_id)
        .bind(is_active)
        .execute(executor)
        .await?;
    Ok(())
}

/// "Run Now": set `next_run = now` so the next dispatch cycle picks the job
/// up regardless of `schedule_type`.
pub async fn run_now<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query("UPDATE scheduled_jobs SET next_run = $2 WHERE id = $1")
        .bind(job_id)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, job_id: i64) -> AppResult<()> {
    sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(())
}
