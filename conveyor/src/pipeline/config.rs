//! Stage and pipeline configuration.
//!
//! Configuration is plain data: it can be built in code or deserialized from
//! JSON and then applied to builders with [`Builder::with_config`] or
//! [`Builder::configure`].
//!
//! [`Builder::with_config`]: super::Builder::with_config
//! [`Builder::configure`]: super::Builder::configure

use crate::errors::ConfigError;
use crate::observability::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Execution settings for a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Number of concurrent workers reading the stage's input queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the stage's output queue. Zero requests a hand-off queue.
    #[serde(default)]
    pub buffer_size: usize,
}

fn default_workers() -> usize {
    1
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buffer_size: 0,
        }
    }
}

impl StageConfig {
    /// Creates a stage configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the output buffer size.
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Settings for a whole chain, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Settings for stages without an entry in `stages`.
    #[serde(default)]
    pub defaults: StageConfig,
    /// Per-stage overrides.
    #[serde(default)]
    pub stages: HashMap<String, StageConfig>,
    /// Logging settings for programs that call [`crate::observability::init_tracing`].
    #[serde(default)]
    pub log: LogConfig,
}

impl PipelineConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an override for `stage`.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>, config: StageConfig) -> Self {
        self.stages.insert(stage.into(), config);
        self
    }

    /// Sets the defaults for stages without an override.
    #[must_use]
    pub fn with_defaults(mut self, defaults: StageConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Returns the settings that apply to `stage`.
    #[must_use]
    pub fn stage(&self, stage: &str) -> StageConfig {
        self.stages.get(stage).copied().unwrap_or(self.defaults)
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Load {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let load_error = |message: String| ConfigError::Load {
            path: path.display().to_string(),
            message,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))
    }
}
