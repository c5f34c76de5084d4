//! Inference engine reached by launching an external command per job.
//!
//! Protocol: the engine is started as `program [args...] <identifier>` and
//! prints one JSON envelope on stdout:
//!
//! ```json
//! { "success": true, "data": { "final_label": "normal", "results": { ... } } }
//! { "success": false, "error": "model file missing" }
//! ```

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error};

use orbitscope_ai::{InferenceClient, InferenceError, Prediction};
use orbitscope_core::JobId;

use crate::config::CommandInferenceConfig;

/// Response envelope printed by the engine.
#[derive(Debug, Deserialize)]
pub struct EngineResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Prediction>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EngineResponse {
    pub fn into_result(self) -> Result<Prediction, InferenceError> {
        match (self.success, self.data) {
            (true, Some(prediction)) => Ok(prediction),
            (true, None) => Err(InferenceError::invalid_output("success response without data")),
            (false, _) => Err(InferenceError::engine(
                self.error.unwrap_or_else(|| "engine reported failure without a message".to_string()),
            )),
        }
    }
}

/// Parse the engine's stdout.
///
/// Leading log lines are tolerated: the last non-empty line is taken as the
/// envelope.
pub fn parse_envelope(stdout: &str) -> Result<Prediction, InferenceError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| InferenceError::invalid_output("engine printed nothing"))?;

    let response: EngineResponse = serde_json::from_str(line)
        .map_err(|e| InferenceError::invalid_output(format!("malformed engine response: {e}")))?;
    response.into_result()
}

#[derive(Debug, Clone)]
pub struct CommandInferenceClient {
    config: CommandInferenceConfig,
}

impl CommandInferenceClient {
    pub fn new(config: CommandInferenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandInferenceConfig {
        &self.config
    }

    async fn check_input(&self, job: &JobId) -> Result<(), InferenceError> {
        if !self.config.require_existing_input {
            return Ok(());
        }
        match tokio::fs::metadata(job.as_str()).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(InferenceError::InvalidInput(format!("not a file: {job}"))),
            Err(e) => Err(InferenceError::InvalidInput(format!("cannot read {job}: {e}"))),
        }
    }
}

#[async_trait]
impl InferenceClient for CommandInferenceClient {
    async fn infer(&self, job: &JobId) -> Result<Prediction, InferenceError> {
        self.check_input(job).await?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(job.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(job = %job, program = %self.config.program, "launching engine");
        let child = command.spawn().map_err(|e| {
            error!(job = %job, program = %self.config.program, error = %e, "failed to launch engine");
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    InferenceError::Unavailable(format!("{}: {e}", self.config.program))
                }
                _ => InferenceError::engine(format!("failed to launch engine: {e}")),
            }
        })?;

        // Dropping the output future on timeout kills the child.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(job = %job, error = %e, "engine io failure");
                return Err(InferenceError::engine(format!("engine io failure: {e}")));
            }
            Err(_) => return Err(InferenceError::Timeout(self.config.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_envelope(&stdout) {
            Ok(prediction) => Ok(prediction),
            // A non-zero exit without a readable envelope is reported with stderr.
            Err(InferenceError::InvalidOutput(_)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(InferenceError::engine(format!(
                    "engine exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Err(e) => Err(e),
        }
    }
}
