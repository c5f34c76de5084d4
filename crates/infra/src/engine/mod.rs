//! Inference engine adapters.

pub mod command;

pub use command::{CommandInferenceClient, EngineResponse, parse_envelope};
