//! Validation error model.

use thiserror::Error;

use crate::id::JobId;

/// Result type used for synchronous input validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Input rejected before any work is dispatched.
///
/// Validation happens up front: when one of these is returned, no job record
/// has been created and nothing has been sent to the inference engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A batch must contain at least one job.
    #[error("batch contains no jobs")]
    EmptyBatch,

    /// Identifiers are opaque but must not be blank.
    #[error("job identifier is empty")]
    EmptyIdentifier,

    /// The same identifier appears more than once in one batch.
    #[error("duplicate job identifier: {0}")]
    DuplicateIdentifier(JobId),

    /// Concurrency level must be a positive integer.
    #[error("invalid concurrency level: {0} (must be >= 1)")]
    InvalidConcurrency(usize),
}

impl ValidationError {
    pub fn duplicate(id: impl Into<JobId>) -> Self {
        Self::DuplicateIdentifier(id.into())
    }

    /// Validate a concurrency level, returning it unchanged when positive.
    pub fn check_concurrency(level: usize) -> ValidationResult<usize> {
        if level == 0 {
            return Err(Self::InvalidConcurrency(level));
        }
        Ok(level)
    }
}
