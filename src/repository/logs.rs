//! `job_execution_logs` access: write-once terminal-outcome records.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::error::AppResult;
use crate::model::{ExecutionStatus, JobExecutionLog};

pub async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    run_time: DateTime<Utc>,
    status: ExecutionStatus,
    log_output: &str,
) -> AppResult<JobExecutionLog> {
    let log = sqlx::query_as::<_, JobExecutionLog>(
        r#"
        INSERT INTO job_execution_logs (job_id, run_time, status, log_output)
        VALUES ($1, $2, $3, $4)
        RETURNING id, job_id, run_time, status, log_output
        "#,
    )
    .bind(job_id)
    .bind(run_time)
    .bind(status)
    .bind(log_output)
    .fetch_one(executor)
    .await?;
    Ok(log)
}

pub async fn for_job<'e, E: PgExecutor<'e>>(
    executor: E,
    job_id: i64,
    limit: i64,
) -> AppResult<Vec<JobExecutionLog>> {
    let rows = sqlx::query_as::<_, JobExecutionLog>(
        r#"
        SELECT id, job_id, run_time, status, log_output
        FROM job_execution_logs
        WHERE job_id = $1
        ORDER BY run_time DESC
        LIMIT $2
        "#,
    )
    .bind(job_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}
