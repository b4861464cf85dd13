//! Convenience result type alias for JobRelay.

use crate::error::AppError;

/// A specialized `Result` type for JobRelay operations.
pub type AppResult<T> = Result<T, AppError>;
