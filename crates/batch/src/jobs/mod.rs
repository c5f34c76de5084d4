//! Job records and the per-batch job table.

pub mod store;
pub mod types;

pub use store::{BatchSummary, JobSet, JobTable};
pub use types::{FailureReason, JobRecord, JobStatus};
