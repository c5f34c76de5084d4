//! Batch orchestration: run a set of inference jobs under a concurrency
//! limit, watch progress, cancel, retry failures and export the results.

pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod jobs;
pub mod retry;
pub mod scheduler;

pub use config::{BatchConfig, ConcurrencyLimit, DEFAULT_CONCURRENCY};
pub use controller::BatchController;
pub use error::{BatchError, ExportError, RetryError};
pub use export::{
    ArtifactEncoder, BatchExport, BatchMetadata, EncodedArtifact, ExportAggregator, ExportDocument,
    ExportFormat, ExportOutcome, ExportSink, JobExport, TabularExport, UrlArtifactEncoder,
    VisualExport, VisualRow,
};
pub use jobs::{BatchSummary, FailureReason, JobRecord, JobSet, JobStatus, JobTable};
pub use retry::RetryExecutor;
