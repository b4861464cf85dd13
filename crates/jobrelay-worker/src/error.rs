//! Errors raised by units of work and by the futures that track them.

use thiserror::Error;

use jobrelay_core::error::AppError;

/// Failure raised from inside a subtask's `work()`.
#[derive(Debug, Error)]
pub enum SubtaskError {
    /// Generic failure reported by the subtask itself.
    #[error("{0}")]
    Failed(String),

    /// The subtask was handed settings it cannot use.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// IO error while doing the work.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An external command exited with a non-zero status.
    #[error("Command '{command}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        /// The program that was run.
        command: String,
        /// The exit code, `-1` when terminated by a signal.
        code: i32,
        /// Captured standard error output (truncated).
        stderr: String,
    },

    /// An external command exceeded its time budget.
    #[error("Command '{command}' timed out after {timeout_seconds}s")]
    Timeout {
        /// The program that was run.
        command: String,
        /// The timeout that was exceeded.
        timeout_seconds: u64,
    },
}

impl SubtaskError {
    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a job future resolves to when it does not produce a result.
///
/// Cloneable so it can be observed by more than one waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The worker returned an error from `execute`.
    #[error("Job '{job}' failed: {message}")]
    Failed {
        /// Name of the failed job.
        job: String,
        /// Rendered worker error.
        message: String,
    },

    /// The worker panicked; the pool contained the panic.
    #[error("Job '{job}' panicked: {message}")]
    Panicked {
        /// Name of the failed job.
        job: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The job was cancelled before a worker picked it up.
    #[error("Job '{job}' was cancelled")]
    Cancelled {
        /// Name of the cancelled job.
        job: String,
    },

    /// The pool was shut down before the job could be dispatched.
    #[error("Worker pool is closed")]
    PoolClosed,
}

impl JobError {
    /// Wrap a worker failure.
    pub fn failed(job: impl Into<String>, err: &SubtaskError) -> Self {
        Self::Failed {
            job: job.into(),
            message: err.to_string(),
        }
    }

    /// Wrap a panic captured by the blocking worker thread.
    pub fn panicked(job: impl Into<String>, err: tokio::task::JoinError) -> Self {
        let message = match err.try_into_panic() {
            Ok(payload) => payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string()),
            Err(err) => err.to_string(),
        };
        Self::Panicked {
            job: job.into(),
            message,
        }
    }
}

impl From<SubtaskError> for AppError {
    fn from(err: SubtaskError) -> Self {
        AppError::worker_failure(err.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::Cancelled { .. } => AppError::cancelled(err.to_string()),
            JobError::PoolClosed => AppError::service_unavailable(err.to_string()),
            JobError::Failed { .. } | JobError::Panicked { .. } => {
                AppError::worker_failure(err.to_string())
            }
        }
    }
}
