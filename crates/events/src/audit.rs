//! Audit events.
//!
//! The orchestrator does not persist audit records. It emits them through
//! [`AuditSink`] and the host application decides where they go.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orbitscope_core::{BatchId, JobId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    BatchStarted,
    /// A job's inference completed successfully.
    Inference,
    InferenceFailed,
    BatchSettled,
    BatchCancelled,
    Retry,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BatchStarted => "BATCH_STARTED",
            AuditAction::Inference => "INFERENCE",
            AuditAction::InferenceFailed => "INFERENCE_FAILED",
            AuditAction::BatchSettled => "BATCH_SETTLED",
            AuditAction::BatchCancelled => "BATCH_CANCELLED",
            AuditAction::Retry => "RETRY",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub details: String,
    pub batch_id: Option<BatchId>,
    pub job: Option<JobId>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            action,
            details: details.into(),
            batch_id: None,
            job: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    /// Successful analysis of one job.
    pub fn inference_completed(job: &JobId, final_label: &str) -> Self {
        Self::new(
            AuditAction::Inference,
            format!("analysis complete: {final_label} ({job})"),
        )
        .with_job(job.clone())
    }
}

/// Destination for audit events.
///
/// Must not block: it is called from the batch's dispatch path.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: AuditEvent);
}

/// Discards everything.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    inner: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<AuditEvent> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.all().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}
