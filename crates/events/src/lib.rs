//! Progress and audit events emitted by the orchestrator.

pub mod audit;
pub mod progress;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use progress::{BatchProgress, ProgressReporter};
