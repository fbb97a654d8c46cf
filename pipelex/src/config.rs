//! Engine and logging configuration.
//!
//! Every field has a serde default, so an empty JSON object is a valid
//! configuration.

use crate::errors::PipelexError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for a [`Pipelex`](crate::runtime::Pipelex) instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelexConfig {
    /// Execution engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelexConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, PipelexError> {
        serde_json::from_str(json).map_err(|e| PipelexError::Serialization(e.to_string()))
    }

    /// Reads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelexError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Replaces the engine settings.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

/// What happens to sibling branches when one parallel branch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelFailurePolicy {
    /// Drop in-flight siblings as soon as the first failure is observed.
    #[default]
    AbortSiblings,
    /// Let siblings run to completion, then discard their results.
    DrainSiblings,
}

/// Settings of the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nesting depth of pipe invocations.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Maximum number of concurrent branch invocations in a batch pipe.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Sibling handling on parallel failure.
    #[serde(default)]
    pub parallel_failure: ParallelFailurePolicy,
}

fn default_max_depth() -> u32 {
    32
}

fn default_batch_concurrency() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            batch_concurrency: default_batch_concurrency(),
            parallel_failure: ParallelFailurePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets the batch concurrency. Zero is treated as one.
    #[must_use]
    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency;
        self
    }

    /// Sets the parallel failure policy.
    #[must_use]
    pub fn with_parallel_failure(mut self, policy: ParallelFailurePolicy) -> Self {
        self.parallel_failure = policy;
        self
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Single-line human-readable output.
    Compact,
    /// One JSON object per line.
    Json,
}

/// Settings of the log subscriber installed by
/// [`init_logging`](crate::observability::init_logging).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Whether to include span enter/exit events.
    #[serde(default)]
    pub with_span_events: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            with_span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the default filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}
