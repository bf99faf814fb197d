//! Tracing subscriber setup for programs embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the host program. [`init_tracing`] is a convenience for binaries,
//! benches and tests that want the usual `fmt` output.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
    /// Include the event target (module path).
    #[serde(default)]
    pub with_target: bool,
}

fn default_filter() -> String {
    "conveyor=info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Creates a logging configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub const fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Builds the env filter; `RUST_LOG` takes precedence over `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured directives do not parse.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter).map_err(|e| ConfigError::Logging(e.to_string()))
    }
}

/// Installs a global `fmt` subscriber configured by `config`.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::new();
        assert_eq!(config.filter, "conveyor=info");
        assert!(!config.json);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LogConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.filter, "conveyor=info");
    }

    #[test]
    fn test_builder_methods() {
        let config = LogConfig::new().with_filter("conveyor=debug").json();
        assert_eq!(config.filter, "conveyor=debug");
        assert!(config.json);
    }

    #[test]
    fn test_init_twice_reports_error() {
        let config = LogConfig::new().with_filter("conveyor=warn");
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        // Another test may have installed the subscriber first.
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(ConfigError::Logging(_))));
    }
}
