//! Scriptable inference client for tests.
//!
//! - Outcomes are scripted per identifier (queue; default is a success).
//! - A gated identifier blocks inside `infer` until `release` is called, which
//!   lets tests pin down exactly which jobs are in flight.
//! - Call order and peak concurrency are recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use orbitscope_core::JobId;

use crate::client::InferenceClient;
use crate::prediction::{CategoryResult, Prediction};
use crate::result::InferenceError;

#[derive(Debug, Default)]
pub struct FakeInferenceClient {
    scripted: Mutex<HashMap<String, VecDeque<Result<Prediction, InferenceError>>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<JobId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue an outcome for the next call with this identifier.
    pub fn script(&self, job: &str, outcome: Result<Prediction, InferenceError>) {
        lock(&self.scripted)
            .entry(job.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn fail_next(&self, job: &str, message: &str) {
        self.script(job, Err(InferenceError::engine(message)));
    }

    /// Make calls for `job` wait until [`release`](Self::release).
    pub fn hold(&self, job: &str) {
        lock(&self.gates)
            .entry(job.to_string())
            .or_insert_with(|| Arc::new(Notify::new()));
    }

    /// Let one held call for `job` proceed. Releasing before the call
    /// arrives is remembered.
    pub fn release(&self, job: &str) {
        let gate = lock(&self.gates).get(job).cloned();
        if let Some(gate) = gate {
            gate.notify_one();
        }
    }

    /// Identifiers in the order `infer` was entered.
    pub fn calls(&self) -> Vec<JobId> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, job: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == job).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// The payload returned when nothing is scripted.
    pub fn default_prediction(job: &JobId) -> Prediction {
        Prediction::new("normal").with_category(
            "rcp_1",
            CategoryResult::new("normal")
                .with_probability("normal", 0.75)
                .with_probability("abnormal", 0.25),
        )
        .with_visualization(
            "rcp_1",
            crate::prediction::Visualization {
                orbit: Some(format!("{job}.orbit.png")),
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl InferenceClient for FakeInferenceClient {
    async fn infer(&self, job: &JobId) -> Result<Prediction, InferenceError> {
        lock(&self.calls).push(job.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = lock(&self.gates).get(job.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = lock(&self.scripted)
            .get_mut(job.as_str())
            .and_then(|q| q.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(Self::default_prediction(job)))
    }
}
