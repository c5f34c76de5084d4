//! Concurrency-bounded scheduler.
//!
//! One scheduler drives one batch. It owns the set of in-flight engine calls
//! and is the only writer of the batch's job table while the run is active:
//! - at most `limit` calls are outstanding at any instant
//! - pending jobs are dispatched FIFO, each exactly once
//! - a completion refills the freed slot before progress is published
//! - a failed job is recorded and the batch carries on
//! - after cancellation nothing new is dispatched; in-flight calls finish
//!   and their outcomes are still recorded

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use orbitscope_ai::{InferenceClient, InferenceError, Prediction};
use orbitscope_core::JobId;
use orbitscope_events::{AuditAction, AuditEvent, AuditSink, ProgressReporter};

use crate::config::ConcurrencyLimit;
use crate::jobs::{JobSet, JobTable};

type Completion = (JobId, Result<Prediction, InferenceError>);

/// Call the engine for one job.
///
/// The call runs in its own task so a panicking client becomes a failed job
/// instead of taking the batch down. Payloads that break the engine contract
/// are turned into `InvalidOutput` failures.
pub(crate) async fn invoke<C: InferenceClient>(
    client: Arc<C>,
    job: JobId,
) -> Result<Prediction, InferenceError> {
    let task_job = job.clone();
    let joined = tokio::spawn(async move { client.infer(&task_job).await }).await;

    match joined {
        Ok(Ok(prediction)) => prediction.validate().map(|()| prediction),
        Ok(Err(e)) => Err(e),
        Err(e) => {
            error!(job = %job, error = %e, "inference task aborted");
            Err(InferenceError::engine(format!("inference task aborted: {e}")))
        }
    }
}

pub struct Scheduler<C: InferenceClient> {
    client: Arc<C>,
    jobs: JobSet,
    limit: ConcurrencyLimit,
    cancel: CancellationToken,
    reporter: Arc<ProgressReporter>,
    audit: Arc<dyn AuditSink>,
}

impl<C: InferenceClient> Scheduler<C> {
    pub fn new(
        client: Arc<C>,
        jobs: JobSet,
        limit: ConcurrencyLimit,
        cancel: CancellationToken,
        reporter: Arc<ProgressReporter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            client,
            jobs,
            limit,
            cancel,
            reporter,
            audit,
        }
    }

    /// Begin dispatching in a background task and return immediately.
    ///
    /// The handle resolves once nothing is running and either nothing is
    /// pending or the run was cancelled.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.dispatch_loop())
    }

    async fn dispatch_loop(self) {
        let batch_id = self.jobs.batch_id();
        debug!(batch_id = %batch_id, limit = self.limit.get(), "scheduler started");

        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                let mut table = self.jobs.lock();
                table.mark_cancelled();
                info!(
                    batch_id = %batch_id,
                    running = table.running_count(),
                    abandoned = table.pending_count(),
                    "cancellation observed; draining in-flight jobs"
                );
            }

            // Dispatch round: fill every free slot, publish once.
            if !cancelled {
                let mut table = self.jobs.lock();
                if self.fill_slots(&mut table, &mut in_flight) > 0 {
                    self.reporter.publish(&table.progress(false));
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => match joined {
                    Some(Ok((job, outcome))) => self.complete(job, outcome, &mut in_flight, cancelled),
                    Some(Err(e)) => error!(batch_id = %batch_id, error = %e, "in-flight task failed to join"),
                    None => {}
                },
                _ = self.cancel.cancelled(), if !cancelled => {}
                _ = self.limit.changed() => {}
            }
        }

        debug!(batch_id = %batch_id, "scheduler finished");
    }

    /// Dispatch pending jobs while below the current limit.
    fn fill_slots(&self, table: &mut JobTable, in_flight: &mut JoinSet<Completion>) -> usize {
        let limit = self.limit.get();
        let mut dispatched = 0;

        while table.running_count() < limit {
            let Some(job) = table.dispatch_next() else {
                break;
            };
            debug!(
                batch_id = %table.batch_id(),
                job = %job,
                running = table.running_count(),
                limit,
                "job dispatched"
            );

            let client = self.client.clone();
            in_flight.spawn(async move {
                let outcome = invoke(client, job.clone()).await;
                (job, outcome)
            });
            dispatched += 1;
        }

        dispatched
    }

    /// Record one outcome, refill, then publish.
    fn complete(
        &self,
        job: JobId,
        outcome: Result<Prediction, InferenceError>,
        in_flight: &mut JoinSet<Completion>,
        cancelled: bool,
    ) {
        let audit_event = match &outcome {
            Ok(prediction) => AuditEvent::inference_completed(&job, &prediction.final_label),
            Err(e) => {
                warn!(job = %job, kind = %e.kind(), error = %e, "inference failed");
                AuditEvent::new(AuditAction::InferenceFailed, format!("analysis failed: {e} ({job})"))
                    .with_job(job.clone())
            }
        };

        let mut table = self.jobs.lock();
        let Some(status) = table.finish(&job, outcome) else {
            return;
        };
        debug!(batch_id = %table.batch_id(), job = %job, status = %status, "job finished");
        self.audit.record(audit_event.with_batch(table.batch_id()));

        if !cancelled && !self.cancel.is_cancelled() {
            self.fill_slots(&mut table, in_flight);
        }
        self.reporter.publish(&table.progress(false));
    }
}
