//! File-backed export adapters.

pub mod artifact;
pub mod file_sink;

pub use artifact::{FileArtifactEncoder, build_export, sha256_hex};
pub use file_sink::{FileExportSink, render, to_csv};
