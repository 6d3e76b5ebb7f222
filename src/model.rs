//! Entity types for the coordination protocol's five durable tables.
//!
//! Plain structs mapped to rows via `sqlx::FromRow`, with no inherited
//! base-class machinery — schema mapping is a thin derive, not a
//! framework-coupled model layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ScheduleType {
    Interval,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum DispatchStatus {
    #[sqlx(rename = "PENDING")]
    Pending,
    #[sqlx(rename = "IN_PROGRESS")]
    InProgress,
    #[sqlx(rename = "COMPLETED")]
    Completed,
    #[sqlx(rename = "FAILED")]
    Failed,
    #[sqlx(rename = "TIMEOUT")]
    Timeout,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum WorkerStatus {
    #[sqlx(rename = "IDLE")]
    Idle,
    #[sqlx(rename = "BUSY")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum ExecutionStatus {
    #[sqlx(rename = "SUCCESS")]
    Success,
    #[sqlx(rename = "FAILURE")]
    Failure,
    #[sqlx(rename = "ERROR")]
    Error,
    #[sqlx(rename = "TIMEOUT")]
    Timeout,
}

/// The durable definition of a recurring or manual task.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub script_id: String,
    pub schedule_type: ScheduleType,
    pub interval_seconds: Option<i64>,
    /// `"HH:MM"` UTC for daily/weekly/monthly.
    pub schedule_time: Option<String>,
    /// Minute `0..=59` for hourly schedules; kept separate from
    /// `schedule_time` to avoid the "HH:MM" parse ambiguity the source had.
    pub schedule_minute: Option<i32>,
    /// 0-6 weekday for weekly; 1-31 day-of-month for monthly.
    pub schedule_day: Option<i32>,
    pub is_active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub dispatch_lock_until: Option<DateTime<Utc>>,
}

/// One concrete execution attempt.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct JobDispatch {
    pub id: i64,
    pub job_id: i64,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: DispatchStatus,
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// The liveness record of a worker process.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub hostname: String,
    pub platform: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    pub jobs_processed: i64,
    pub current_job_id: Option<i64>,
    pub process_id: i32,
}

/// Immutable record of a completed execution.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: i64,
    pub job_id: i64,
    pub run_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub log_output: String,
}
