//! Re-running individual failed jobs after a batch has settled.

use std::sync::Arc;

use tracing::{error, info, warn};

use orbitscope_ai::InferenceClient;
use orbitscope_core::{BatchId, JobId};
use orbitscope_events::{AuditAction, AuditEvent, AuditSink, NoopAuditSink};

use crate::error::RetryError;
use crate::jobs::{JobRecord, JobSet, JobStatus};
use crate::scheduler::invoke;

/// Retries one failed job at a time against a settled job set.
///
/// A retry bypasses the concurrency limit: each call is a single engine call
/// made on behalf of the caller. Retries of distinct jobs may run
/// concurrently; a second retry of the same job is rejected while the first
/// is in flight because the job is then `running`.
pub struct RetryExecutor<C: InferenceClient> {
    client: Arc<C>,
    jobs: JobSet,
    audit: Arc<dyn AuditSink>,
}

impl<C: InferenceClient> RetryExecutor<C> {
    pub fn new(client: Arc<C>, jobs: JobSet) -> Self {
        Self {
            client,
            jobs,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Move the job back to `running`, call the engine once, and record the
    /// new outcome on the same record.
    ///
    /// The engine call and the recording step run in their own task, so the
    /// outcome lands on the record even if the returned future is dropped.
    /// The returned record is a copy taken right after the outcome was
    /// applied.
    pub async fn retry(&self, identifier: &str) -> Result<JobRecord, RetryError> {
        let (batch_id, job) = {
            let mut table = self.jobs.lock();
            let job = table.begin_retry(identifier)?;
            (table.batch_id(), job)
        };
        info!(batch_id = %batch_id, job = %job, "retrying failed job");

        let attempt = tokio::spawn(attempt(
            self.client.clone(),
            self.jobs.clone(),
            self.audit.clone(),
            batch_id,
            job.clone(),
        ));
        match attempt.await {
            Ok(result) => result,
            Err(e) => {
                error!(batch_id = %batch_id, job = %job, error = %e, "retry task failed");
                Err(RetryError::Interrupted(job))
            }
        }
    }
}

async fn attempt<C: InferenceClient>(
    client: Arc<C>,
    jobs: JobSet,
    audit: Arc<dyn AuditSink>,
    batch_id: BatchId,
    job: JobId,
) -> Result<JobRecord, RetryError> {
    let outcome = invoke(client, job.clone()).await;
    let details = match &outcome {
        Ok(p) => format!("retry succeeded: {} ({job})", p.final_label),
        Err(e) => {
            warn!(batch_id = %batch_id, job = %job, kind = %e.kind(), error = %e, "retry failed");
            format!("retry failed: {e} ({job})")
        }
    };

    let record = {
        let mut table = jobs.lock();
        table.finish(&job, outcome);
        table
            .get(job.as_str())
            .cloned()
            .ok_or_else(|| RetryError::UnknownJob(job.clone()))?
    };

    audit.record(
        AuditEvent::new(AuditAction::Retry, details)
            .with_batch(batch_id)
            .with_job(job),
    );
    if record.status() == JobStatus::Completed {
        info!(batch_id = %batch_id, job = %record.identifier(), attempts = record.attempts(), "retry completed");
    }
    Ok(record)
}
