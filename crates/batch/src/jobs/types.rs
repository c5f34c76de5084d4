//! Job record and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbitscope_ai::{FailureKind, InferenceError, Prediction};
use orbitscope_core::JobId;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Seeded, waiting for a free slot
    Pending,
    /// Handed to the inference engine
    Running,
    /// Engine returned a prediction
    Completed,
    /// Engine call failed; eligible for retry
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&InferenceError> for FailureReason {
    fn from(err: &InferenceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One unit of work and its current state.
///
/// Fields are private so the invariant holds by construction: a `result` is
/// present only when `Completed`, a `failure` only when `Failed`, and never
/// both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    identifier: JobId,
    status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureReason>,
    /// Number of times the job was handed to the engine.
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a record in `Pending`.
    pub fn new(identifier: JobId) -> Self {
        Self {
            identifier,
            status: JobStatus::Pending,
            result: None,
            failure: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn identifier(&self) -> &JobId {
        &self.identifier
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Prediction> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall time of the latest attempt, once it has finished.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    /// Mark job as running. Clears any previous outcome.
    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.result = None;
        self.failure = None;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    /// Record the engine's answer for the running attempt.
    pub(crate) fn mark_finished(&mut self, outcome: Result<Prediction, InferenceError>) {
        self.finished_at = Some(Utc::now());
        match outcome {
            Ok(prediction) => {
                self.status = JobStatus::Completed;
                self.result = Some(prediction);
                self.failure = None;
            }
            Err(err) => {
                self.status = JobStatus::Failed;
                self.result = None;
                self.failure = Some(FailureReason::from(&err));
            }
        }
    }
}
