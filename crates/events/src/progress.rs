//! Batch progress snapshots and the single-subscriber progress reporter.
//!
//! ## Delivery model
//!
//! The reporter is a **push channel with at most one observer**:
//!
//! - `subscribe()` installs an observer, replacing whichever one was active
//! - `unsubscribe()` detaches it
//! - `publish()` calls the observer synchronously with the latest snapshot
//! - With no observer installed the snapshot is dropped (no buffering, no replay)
//!
//! The scheduler publishes from inside the critical section that applied the
//! state transition, so observers see snapshots in exactly the order the
//! transitions happened.
//!
//! ## Re-entrancy
//!
//! Observers run while the batch's job table is locked. An observer must not
//! call back into the controller or the reporter synchronously; hand the
//! snapshot off instead (see [`ProgressReporter::subscribe_channel`]).

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use orbitscope_core::{BatchId, JobId};

/// Aggregate state of one batch at one instant.
///
/// Recomputed on every state change, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs not yet dispatched.
    pub pending: usize,
    /// Identifiers currently running, in dispatch order.
    pub running: Vec<JobId>,
    pub running_count: usize,
    /// Set only on the final snapshot of a run.
    pub finished: bool,
    /// Set once cancellation has been observed by the run.
    pub cancelled: bool,
}

impl BatchProgress {
    /// `completed + failed + running + pending == total`.
    pub fn is_consistent(&self) -> bool {
        self.running_count == self.running.len()
            && self.completed + self.failed + self.running_count + self.pending == self.total
    }

    /// Jobs in a terminal state.
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }

    /// Fraction of the batch in a terminal state, in [0, 1].
    pub fn fraction_done(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.settled() as f64 / self.total as f64
    }
}

type Observer = Box<dyn Fn(&BatchProgress) + Send + Sync>;

/// Single-subscriber push channel for [`BatchProgress`].
///
/// If several observers are ever needed, fan out inside the one observer;
/// the producer side does not change.
#[derive(Default)]
pub struct ProgressReporter {
    observer: Mutex<Option<Observer>>,
}

impl core::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn observer(&self) -> MutexGuard<'_, Option<Observer>> {
        // A panicking observer poisons the lock; the slot itself is still valid.
        self.observer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install `callback` as the active observer, replacing any previous one.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&BatchProgress) + Send + Sync + 'static,
    {
        let replaced = self.observer().replace(Box::new(callback)).is_some();
        if replaced {
            tracing::debug!("progress observer replaced");
        }
    }

    /// Install an observer that forwards snapshots into an unbounded channel.
    ///
    /// Convenient for async consumers; the receiver sees snapshots in
    /// publish order. Dropping the receiver makes later sends no-ops.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<BatchProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |snapshot| {
            let _ = tx.send(snapshot.clone());
        });
        rx
    }

    /// Detach the active observer, if any.
    pub fn unsubscribe(&self) {
        self.observer().take();
    }

    pub fn is_subscribed(&self) -> bool {
        self.observer().is_some()
    }

    /// Deliver `snapshot` to the active observer.
    ///
    /// Returns `false` when nobody was subscribed and the snapshot was dropped.
    pub fn publish(&self, snapshot: &BatchProgress) -> bool {
        let guard = self.observer();
        match guard.as_ref() {
            Some(observer) => {
                observer(snapshot);
                true
            }
            None => false,
        }
    }
}
