use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure returned by the inference engine for one job.
///
/// These never abort a batch: the orchestrator records them on the job and
/// moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    EngineFailed(String),

    #[error("invalid engine output: {0}")]
    InvalidOutput(String),

    #[error("inference engine unavailable: {0}")]
    Unavailable(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

impl InferenceError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::EngineFailed(msg.into())
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            InferenceError::InvalidInput(_) => FailureKind::InvalidInput,
            InferenceError::EngineFailed(_) => FailureKind::Engine,
            InferenceError::InvalidOutput(_) => FailureKind::InvalidOutput,
            InferenceError::Unavailable(_) => FailureKind::Unavailable,
            InferenceError::Timeout(_) => FailureKind::Timeout,
        }
    }
}

/// Coarse classification of a job failure, kept on the job record next to the
/// human-readable message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    Engine,
    InvalidOutput,
    Unavailable,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Engine => "engine",
            FailureKind::InvalidOutput => "invalid_output",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
