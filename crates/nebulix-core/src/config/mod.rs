mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::Context;

use crate::error::CoreError;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<(), CoreError> {
        let checks: [(&str, bool); 10] = [
            ("runner.default_timeout_ms", self.runner.default_timeout_ms > 0),
            ("cache.max_size", self.cache.max_size > 0),
            ("retry.multiplier", self.retry.multiplier >= 1.0),
            ("circuit_breaker.failure_threshold", self.circuit_breaker.failure_threshold > 0),
            ("batch.batch_size", self.batch.batch_size > 0),
            ("batch.max_concurrency", self.batch.max_concurrency > 0),
            ("pipeline.max_concurrent_pipelines", self.pipeline.max_concurrent_pipelines > 0),
            ("pipeline.timeout_ms", self.pipeline.timeout_ms > 0),
            ("parallel.max_concurrency", self.parallel.max_concurrency > 0),
            ("events.capacity", self.events.capacity > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((key, _)) => Err(CoreError::InvalidConfig(format!("{key} is out of range"))),
            None => Ok(()),
        }
    }
}
