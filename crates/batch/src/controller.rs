//! Batch run controller: the caller-facing entry point.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orbitscope_ai::InferenceClient;
use orbitscope_core::{BatchId, JobId, ValidationResult};
use orbitscope_events::{AuditAction, AuditEvent, AuditSink, NoopAuditSink, ProgressReporter};

use crate::config::{BatchConfig, ConcurrencyLimit};
use crate::error::{BatchError, RetryError};
use crate::jobs::{BatchSummary, JobRecord, JobSet, JobTable};
use crate::retry::RetryExecutor;
use crate::scheduler::Scheduler;

struct ActiveRun {
    batch_id: BatchId,
    token: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Settles a run once its scheduler is done: publishes the final snapshot,
/// audits the outcome, keeps the job set for retries and exports, and frees
/// the controller for the next run.
///
/// Lives inside the task that drives the scheduler, so a run settles the same
/// way whether `run` is awaited to the end or its future is dropped.
struct Settlement {
    batch_id: BatchId,
    jobs: JobSet,
    reporter: Arc<ProgressReporter>,
    audit: Arc<dyn AuditSink>,
    current: Arc<Mutex<Option<ActiveRun>>>,
    last: Arc<Mutex<Option<JobSet>>>,
}

impl Drop for Settlement {
    fn drop(&mut self) {
        let summary = {
            let mut table = self.jobs.lock();
            table.set_active(false);
            self.reporter.publish(&table.progress(true));
            table.summary()
        };

        let (action, details) = if summary.cancelled {
            (
                AuditAction::BatchCancelled,
                format!(
                    "batch cancelled: {} completed, {} failed, {} not started",
                    summary.completed, summary.failed, summary.abandoned
                ),
            )
        } else {
            (
                AuditAction::BatchSettled,
                format!("batch settled: {} completed, {} failed", summary.completed, summary.failed),
            )
        };
        info!(
            batch_id = %self.batch_id,
            completed = summary.completed,
            failed = summary.failed,
            abandoned = summary.abandoned,
            cancelled = summary.cancelled,
            "batch finished"
        );
        self.audit.record(AuditEvent::new(action, details).with_batch(self.batch_id));

        *lock(&self.last) = Some(self.jobs.clone());
        *lock(&self.current) = None;
    }
}

/// Runs batches of inference jobs against one engine.
///
/// A controller drives one batch at a time. After a run settles its job set
/// stays available through [`jobs`](Self::jobs) for retries and exports
/// until the next run replaces it.
pub struct BatchController<C: InferenceClient> {
    client: Arc<C>,
    limit: ConcurrencyLimit,
    reporter: Arc<ProgressReporter>,
    audit: Arc<dyn AuditSink>,
    audit_enabled: bool,
    current: Arc<Mutex<Option<ActiveRun>>>,
    last: Arc<Mutex<Option<JobSet>>>,
}

impl<C: InferenceClient> BatchController<C> {
    pub fn new(client: Arc<C>, config: BatchConfig) -> ValidationResult<Self> {
        config.validate()?;
        Ok(Self {
            client,
            limit: ConcurrencyLimit::new(config.concurrency)?,
            reporter: Arc::new(ProgressReporter::new()),
            audit: Arc::new(NoopAuditSink),
            audit_enabled: config.audit,
            current: Arc::default(),
            last: Arc::default(),
        })
    }

    /// Send audit events to `audit`. Ignored when auditing is disabled in
    /// the config.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        if self.audit_enabled {
            self.audit = audit;
        }
        self
    }

    /// The progress channel. Subscribing replaces any earlier observer.
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn concurrency(&self) -> usize {
        self.limit.get()
    }

    /// Change the concurrency limit, also while a run is active.
    ///
    /// Raising it dispatches into the new slots right away. Lowering it never
    /// interrupts in-flight jobs; dispatch resumes once the running count
    /// drops below the new value.
    pub fn set_concurrency(&self, level: usize) -> ValidationResult<()> {
        self.limit.set(level)
    }

    /// Whether a run is active on this controller, including one still
    /// draining after its `run` future was dropped.
    pub fn is_running(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Run a batch to completion (or cancellation).
    ///
    /// Returns once every dispatched job has finished. Per-job failures are
    /// recorded on the jobs and never fail the run.
    pub async fn run<I>(&self, identifiers: I, concurrency: usize) -> Result<BatchSummary, BatchError>
    where
        I: IntoIterator,
        I::Item: Into<JobId>,
    {
        let table = JobTable::seed(identifiers)?;
        let batch_id = table.batch_id();
        let total = table.len();

        let token = CancellationToken::new();
        {
            let mut current = lock(&self.current);
            if current.is_some() {
                return Err(BatchError::AlreadyRunning);
            }
            self.limit.set(concurrency)?;
            *current = Some(ActiveRun {
                batch_id,
                token: token.clone(),
            });
        }
        let jobs = JobSet::new(table);
        jobs.lock().set_active(true);

        info!(batch_id = %batch_id, total, concurrency, "batch started");
        self.audit.record(
            AuditEvent::new(
                AuditAction::BatchStarted,
                format!("batch started: {total} jobs, concurrency {concurrency}"),
            )
            .with_batch(batch_id),
        );

        let scheduler = Scheduler::new(
            self.client.clone(),
            jobs.clone(),
            self.limit.clone(),
            token.clone(),
            self.reporter.clone(),
            self.audit.clone(),
        );
        let settlement = Settlement {
            batch_id,
            jobs: jobs.clone(),
            reporter: self.reporter.clone(),
            audit: self.audit.clone(),
            current: self.current.clone(),
            last: self.last.clone(),
        };
        let driver = tokio::spawn(async move {
            let _settlement = settlement;
            if let Err(e) = scheduler.start().await {
                error!(batch_id = %batch_id, error = %e, "scheduler task failed");
            }
        });

        // Dropping this future stops dispatch; in-flight jobs still drain.
        let _cancel_on_drop = token.drop_guard();
        if let Err(e) = driver.await {
            error!(batch_id = %batch_id, error = %e, "batch driver failed");
        }
        Ok(jobs.summary())
    }

    /// Ask the active run to stop dispatching. No effect when idle; repeated
    /// calls are the same as one.
    pub fn cancel(&self) {
        if let Some(run) = lock(&self.current).as_ref() {
            if !run.token.is_cancelled() {
                info!(batch_id = %run.batch_id, "batch cancellation requested");
                run.token.cancel();
            }
        }
    }

    /// Job set of the most recently settled run.
    pub fn jobs(&self) -> Option<JobSet> {
        lock(&self.last).clone()
    }

    /// Retry one failed job of the most recently settled run.
    ///
    /// Allowed while another batch runs on this controller: the retry only
    /// touches the settled job set.
    pub async fn retry(&self, identifier: &str) -> Result<JobRecord, RetryError> {
        let jobs = self.jobs().ok_or(RetryError::NoBatch)?;
        RetryExecutor::new(self.client.clone(), jobs)
            .with_audit(self.audit.clone())
            .retry(identifier)
            .await
    }
}
