//! Configuration for the external-command inference engine.

use std::time::Duration;

use thiserror::Error;

pub const ENGINE_ENV: &str = "ORBITSCOPE_ENGINE";
pub const ENGINE_TIMEOUT_ENV: &str = "ORBITSCOPE_ENGINE_TIMEOUT_SECS";

pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no inference engine configured (set ORBITSCOPE_ENGINE or pass --engine)")]
    MissingProgram,

    #[error("invalid engine timeout {0:?}: expected a positive number of seconds")]
    InvalidTimeout(String),
}

/// How to launch the engine for one job.
///
/// The job identifier is appended as the last argument:
/// `program [args...] <identifier>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInferenceConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Per-call limit; the child is killed when it runs out.
    pub timeout: Duration,
    /// Fail with `InvalidInput` before launching when the identifier is not
    /// an existing file.
    pub require_existing_input: bool,
}

impl CommandInferenceConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
            require_existing_input: true,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_require_existing_input(mut self, require: bool) -> Self {
        self.require_existing_input = require;
        self
    }

    /// Read `ORBITSCOPE_ENGINE` and `ORBITSCOPE_ENGINE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let program = lookup(ENGINE_ENV)
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingProgram)?;

        let mut config = Self::new(program);
        if let Some(raw) = lookup(ENGINE_TIMEOUT_ENV) {
            config.timeout = parse_timeout_secs(&raw)?;
        }
        Ok(config)
    }
}

/// Parse a positive number of whole seconds.
pub fn parse_timeout_secs(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidTimeout(raw.to_string())),
    }
}
