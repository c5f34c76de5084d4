//! The job table of one batch and its shared handle.
//!
//! All Job Record transitions and all progress computation go through
//! [`JobTable`], and the table is only ever reached through the mutex in
//! [`JobSet`]. That mutex is the single serialization point for a batch:
//! concurrent completions can race at the engine level but are applied here
//! one at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use orbitscope_ai::{InferenceError, Prediction};
use orbitscope_core::{BatchId, JobId, ValidationError, ValidationResult};
use orbitscope_events::BatchProgress;

use super::types::{JobRecord, JobStatus};
use crate::error::RetryError;

/// Final counts of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs never dispatched because the run was cancelled.
    pub abandoned: usize,
    pub cancelled: bool,
}

/// Records of one batch, in submission order, plus the FIFO dispatch queue.
#[derive(Debug, Clone)]
pub struct JobTable {
    batch_id: BatchId,
    records: Vec<JobRecord>,
    index: HashMap<JobId, usize>,
    queue: VecDeque<usize>,
    running: usize,
    completed: usize,
    failed: usize,
    active: bool,
    cancelled: bool,
}

impl JobTable {
    /// Seed a table with every identifier in `pending`.
    ///
    /// Rejects an empty list, blank identifiers and duplicates; on error
    /// nothing is created.
    pub fn seed<I>(identifiers: I) -> ValidationResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<JobId>,
    {
        let mut seen: HashSet<JobId> = HashSet::new();
        let mut records = Vec::new();
        for raw in identifiers {
            let id = JobId::parse(raw.into().into_inner())?;
            if !seen.insert(id.clone()) {
                return Err(ValidationError::duplicate(id));
            }
            records.push(JobRecord::new(id));
        }
        if records.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.identifier().clone(), i))
            .collect();
        let queue = (0..records.len()).collect();

        Ok(Self {
            batch_id: BatchId::new(),
            records,
            index,
            queue,
            running: 0,
            completed: 0,
            failed: 0,
            active: false,
            cancelled: false,
        })
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether a run currently owns this table.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Pop the oldest pending job and mark it running.
    pub(crate) fn dispatch_next(&mut self) -> Option<JobId> {
        let i = self.queue.pop_front()?;
        let record = &mut self.records[i];
        record.mark_running();
        self.running += 1;
        Some(record.identifier().clone())
    }

    /// Apply the engine's answer to a running job.
    ///
    /// Returns the new status, or `None` if `id` was not running (the
    /// outcome is then ignored).
    pub(crate) fn finish(
        &mut self,
        id: &JobId,
        outcome: Result<Prediction, InferenceError>,
    ) -> Option<JobStatus> {
        let &i = self.index.get(id)?;
        let record = &mut self.records[i];
        if record.status() != JobStatus::Running {
            tracing::warn!(job = %id, status = %record.status(), "outcome for job that is not running");
            return None;
        }

        record.mark_finished(outcome);
        self.running -= 1;
        let status = record.status();
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }
        Some(status)
    }

    /// Move a failed job back to running for a retry attempt.
    pub(crate) fn begin_retry(&mut self, id: &str) -> Result<JobId, RetryError> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| RetryError::UnknownJob(JobId::new(id)))?;
        if self.active {
            return Err(RetryError::BatchActive);
        }

        let record = &mut self.records[i];
        if !record.status().is_retriable() {
            return Err(RetryError::NotFailed {
                job: record.identifier().clone(),
                status: record.status(),
            });
        }

        record.mark_running();
        self.failed -= 1;
        self.running += 1;
        Ok(record.identifier().clone())
    }

    /// Progress snapshot of the current state.
    pub fn progress(&self, finished: bool) -> BatchProgress {
        let running: Vec<JobId> = self
            .records
            .iter()
            .filter(|r| r.status() == JobStatus::Running)
            .map(|r| r.identifier().clone())
            .collect();

        BatchProgress {
            batch_id: self.batch_id,
            total: self.records.len(),
            completed: self.completed,
            failed: self.failed,
            pending: self.queue.len(),
            running_count: running.len(),
            running,
            finished,
            cancelled: self.cancelled,
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            total: self.records.len(),
            completed: self.completed,
            failed: self.failed,
            abandoned: self.queue.len(),
            cancelled: self.cancelled,
        }
    }
}

/// Shared handle to a [`JobTable`].
///
/// This struct is cheap to clone; clones refer to the same table.
#[derive(Debug, Clone)]
pub struct JobSet {
    inner: Arc<Mutex<JobTable>>,
}

impl JobSet {
    pub fn new(table: JobTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    /// Enter the batch's critical section.
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, JobTable> {
        // A panic while holding the lock leaves the table in a state produced
        // by completed transitions only; keep using it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn batch_id(&self) -> BatchId {
        self.lock().batch_id()
    }

    /// Copy of one record.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.lock().get(id).cloned()
    }

    /// Copy of all records, in submission order.
    pub fn records(&self) -> Vec<JobRecord> {
        self.lock().records().to_vec()
    }

    pub fn progress(&self) -> BatchProgress {
        self.lock().progress(false)
    }

    pub fn summary(&self) -> BatchSummary {
        self.lock().summary()
    }

    /// Identifiers of every failed job, in submission order.
    pub fn failed(&self) -> Vec<JobId> {
        self.lock()
            .records()
            .iter()
            .filter(|r| r.status() == JobStatus::Failed)
            .map(|r| r.identifier().clone())
            .collect()
    }
}
