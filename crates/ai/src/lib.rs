//! `orbitscope-ai`
//!
//! **Responsibility:** boundary to the external inference engine.
//!
//! The engine itself (model execution, Grad-CAM rendering) is a black box.
//! This crate only defines how the orchestrator calls it and what comes back:
//! - `InferenceClient`: one async call per job identifier
//! - `Prediction`: the structured success payload
//! - `InferenceError` / `FailureKind`: the failure taxonomy recorded on jobs

pub mod client;
pub mod prediction;
pub mod result;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use client::InferenceClient;
pub use prediction::{ArtifactKind, ArtifactRef, CategoryResult, GradCam, Prediction, Visualization};
pub use result::{FailureKind, InferenceError};
