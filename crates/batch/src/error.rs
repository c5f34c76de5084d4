//! Errors surfaced synchronously to callers of the orchestrator.
//!
//! Per-job inference failures are not here: they are recorded on the job and
//! never propagate out of a run.

use thiserror::Error;

use orbitscope_core::{JobId, ValidationError};

use crate::jobs::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// One controller drives one batch at a time.
    #[error("a batch is already running on this controller")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    /// Retry is only valid from `failed`.
    #[error("job {job} is {status}, only failed jobs can be retried")]
    NotFailed { job: JobId, status: JobStatus },

    /// The job set still belongs to a running batch.
    #[error("batch is still running")]
    BatchActive,

    /// Nothing has been run yet, so there is nothing to retry.
    #[error("no batch has been run")]
    NoBatch,

    /// The retry task ended without recording an outcome.
    #[error("retry of {0} did not complete")]
    Interrupted(JobId),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to encode export: {0}")]
    Encode(String),

    #[error("failed to encode artifact {path}: {reason}")]
    Artifact { path: String, reason: String },

    #[error("export io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
