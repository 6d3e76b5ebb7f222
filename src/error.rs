//! Unified error type for the scheduler, worker and coordination layer.
//!
//! Mirrors the variant-per-concern shape used throughout the donor stack's
//! error handling (configuration, database, execution, validation) instead
//! of letting each module invent its own error enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invariant violation: {message}")]
    Invariant { message: String },

    #[error("script path {path:?} escapes script root {root:?}")]
    UnsafeScriptPath {
        path: std::path::PathBuf,
        root: std::path::PathBuf,
    },

    #[error("script execution failed: {message}")]
    ScriptExecution { message: String },

    #[error("script execution timed out after {timeout_secs}s")]
    ScriptTimeout { timeout_secs: u64 },
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn script_execution(message: impl Into<String>) -> Self {
        Self::ScriptExecution {
            message: message.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
