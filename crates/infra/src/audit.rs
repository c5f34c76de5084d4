//! Audit sink that writes events to the tracing pipeline.

use tracing::info;

use orbitscope_events::{AuditEvent, AuditSink};

/// Emits every audit event as an `info` record on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let batch_id = event.batch_id.map(|b| b.to_string()).unwrap_or_default();
        let job = event.job.as_ref().map(|j| j.as_str()).unwrap_or_default();
        info!(
            target: "audit",
            action = %event.action,
            batch_id = %batch_id,
            job = %job,
            occurred_at = %event.occurred_at.to_rfc3339(),
            "{}",
            event.details
        );
    }
}
