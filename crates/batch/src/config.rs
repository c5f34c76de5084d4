//! Batch configuration and the live concurrency limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use orbitscope_core::{ValidationError, ValidationResult};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Environment variable read by [`BatchConfig::from_env`].
pub const CONCURRENCY_ENV: &str = "ORBITSCOPE_CONCURRENCY";

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Initial concurrency level (can be changed between and during runs)
    pub concurrency: usize,
    /// Emit audit events
    pub audit: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            audit: true,
        }
    }
}

impl BatchConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    /// Defaults overridden by `ORBITSCOPE_CONCURRENCY`.
    pub fn from_env() -> ValidationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ValidationResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(CONCURRENCY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.concurrency = n,
                Err(e) => {
                    tracing::warn!(
                        var = CONCURRENCY_ENV,
                        value = %raw,
                        error = %e,
                        "ignoring unparsable concurrency; using default"
                    );
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ValidationResult<()> {
        ValidationError::check_concurrency(self.concurrency)?;
        Ok(())
    }
}

#[derive(Debug)]
struct LimitInner {
    value: AtomicUsize,
    changed: Notify,
}

/// Maximum number of jobs in flight, shared between the caller and the
/// scheduler.
///
/// Reads and writes are plain atomics. A write wakes the scheduler so a
/// raised limit fills the new slots right away; a lowered limit only
/// throttles future dispatches, in-flight jobs are never interrupted.
///
/// This struct is cheap to clone; clones share the same value.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    inner: Arc<LimitInner>,
}

impl ConcurrencyLimit {
    pub fn new(level: usize) -> ValidationResult<Self> {
        let level = ValidationError::check_concurrency(level)?;
        Ok(Self {
            inner: Arc::new(LimitInner {
                value: AtomicUsize::new(level),
                changed: Notify::new(),
            }),
        })
    }

    pub fn get(&self) -> usize {
        self.inner.value.load(Ordering::Acquire)
    }

    /// Change the limit; takes effect at the next dispatch decision.
    pub fn set(&self, level: usize) -> ValidationResult<()> {
        let level = ValidationError::check_concurrency(level)?;
        let previous = self.inner.value.swap(level, Ordering::AcqRel);
        if previous != level {
            tracing::debug!(previous, limit = level, "concurrency limit changed");
            // Stores a permit if the scheduler is not waiting right now.
            self.inner.changed.notify_one();
        }
        Ok(())
    }

    /// Resolves after the next [`set`](Self::set) that changed the value.
    pub async fn changed(&self) {
        self.inner.changed.notified().await
    }
}
