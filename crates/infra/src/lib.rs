//! Concrete adapters: the external-command engine, file export sink,
//! artifact encoder and audit output.

pub mod audit;
pub mod config;
pub mod engine;
pub mod export;

pub use audit::TracingAuditSink;
pub use config::{CommandInferenceConfig, ConfigError};
pub use engine::CommandInferenceClient;
pub use export::{FileArtifactEncoder, FileExportSink, build_export};
