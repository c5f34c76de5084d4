//! `orbitscope-core` — shared building blocks for the batch orchestrator.
//!
//! Identifiers and the validation error model. No IO, no async.

pub mod error;
pub mod id;

pub use error::{ValidationError, ValidationResult};
pub use id::{BatchId, JobId};
