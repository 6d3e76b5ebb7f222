//! Configuration for the scheduler and worker processes.
//!
//! Loaded from environment variables via `figment`, layered over the
//! defaults listed in the coordination protocol spec (§6). Both configs
//! refuse to build without a database URL — see `AppError::Config`.

use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

fn db_url_from_env() -> AppResult<String> {
    std::env::var("JOB_SCHEDULER_DB_URL").map_err(|_| {
        AppError::config("JOB_SCHEDULER_DB_URL must be set (a Postgres connection string)")
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub dispatch_lock_duration_secs: u64,
    pub timeout_threshold_secs: u64,
    pub max_retry_attempts: i32,
    pub cleanup_retention_days: i64,
    pub worker_offline_threshold_secs: u64,
    pub timeout_sweep_interval_secs: u64,
    pub reaper_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// §7: consecutive sub-task failures (e.g. a database stuck down)
    /// before the control loop gives up and exits for supervision to
    /// restart the process.
    pub max_consecutive_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            dispatch_lock_duration_secs: 300,
            timeout_threshold_secs: 600,
            max_retry_attempts: 3,
            cleanup_retention_days: 30,
            worker_offline_threshold_secs: 180,
            timeout_sweep_interval_secs: 60,
            reaper_interval_secs: 100,
            cleanup_interval_secs: 3600,
            max_consecutive_failures: 5,
        }
    }
}

impl SchedulerConfig {
    /// Build configuration from `SCHEDULER_*` environment variables layered
    /// over the defaults above, plus `JOB_SCHEDULER_DB_URL`.
    pub fn from_env() -> AppResult<(Self, String)> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("SCHEDULER_"))
            .extract()
            .map_err(|e| AppError::config(format!("invalid scheduler configuration: {e}")))?;
        Ok((config, db_url_from_env()?))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_sweep_interval_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn dispatch_lock_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_lock_duration_secs as i64)
    }

    pub fn timeout_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_threshold_secs as i64)
    }

    pub fn worker_offline_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.worker_offline_threshold_secs as i64)
    }

    pub fn cleanup_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.cleanup_retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub max_poll_interval_secs: u64,
    pub backoff_factor: f64,
    pub heartbeat_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub script_root: String,
    pub max_log_bytes: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_poll_interval_secs: 60,
            backoff_factor: 1.5,
            heartbeat_interval_secs: 30,
            job_timeout_secs: 600,
            script_root: "./scripts".to_string(),
            max_log_bytes: 1024 * 1024,
            shutdown_grace_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Build configuration from `WORKER_*` environment variables layered
    /// over the defaults above, plus `JOB_SCHEDULER_DB_URL`. Validates that
    /// `script_root` exists.
    pub fn from_env() -> AppResult<(Self, String)> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("WORKER_"))
            .extract()
            .map_err(|e| AppError::config(format!("invalid worker configuration: {e}")))?;

        let root = std::path::Path::new(&config.script_root);
        if !root.is_dir() {
            return Err(AppError::config(format!(
                "worker.script_root {:?} does not exist or is not a directory",
                root
            )));
        }
        Ok((config, db_url_from_env()?))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Resolve `script_id` against `script_root`, rejecting any path that
    /// would escape the sandbox root (absolute paths, `..` components that
    /// climb out, symlinks pointing outside).
    pub fn resolve_script_path(&self, script_id: &str) -> AppResult<std::path::PathBuf> {
        let root = std::path::Path::new(&self.script_root)
            .canonicalize()
            .map_err(|e| AppError::config(format!("cannot canonicalize script_root: {e}")))?;
        let candidate = root.join(script_id);
        let canonical = candidate.canonicalize().map_err(|_| AppError::UnsafeScriptPath {
            path: candidate.clone(),
            root: root.clone(),
        })?;
        if !canonical.starts_with(&root) {
            return Err(AppError::UnsafeScriptPath {
                path: canonical,
                root,
            });
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_rejects_path_escaping_root() {
        let dir = std::env::temp_dir().join("jobcoord-test-scripts-escape");
        std::fs::create_dir_all(&dir).unwrap();
        let config = WorkerConfig {
            script_root: dir.to_string_lossy().to_string(),
            ..Default::default()
        };
        let err = config.resolve_script_path("../../../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn worker_resolves_script_within_root() {
        let dir = std::env::temp_dir().join("jobcoord-test-scripts-ok");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hello.sh"), "#!/bin/sh\necho hi\n").unwrap();
        let config = WorkerConfig {
            script_root: dir.to_string_lossy().to_string(),
            ..Default::default()
        };
        let resolved = config.resolve_script_path("hello.sh").unwrap();
        assert!(resolved.starts_with(dir.canonicalize().unwrap()));
    }
}
