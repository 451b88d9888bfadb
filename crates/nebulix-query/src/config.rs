use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

/// Defaults merged into every `QueryRunner::execute` call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    #[serde(default)]
    pub default_space: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_retry_attempts: default_retry_attempts(),
            enable_cache: true,
            default_space: None,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "nebula:".into()
}

/// Result cache: capacity bound, expiry and key namespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Exponential backoff parameters for transient failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_concurrency() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_batch_concurrency(),
        }
    }
}

fn default_max_concurrent_pipelines() -> usize {
    10
}

fn default_max_query_length() -> usize {
    10_000
}

/// Staged query processing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub parallel_stages: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default = "default_max_concurrent_pipelines")]
    pub max_concurrent_pipelines: usize,
    /// Queries longer than this are flagged by the validation stage, not rejected.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parallel_stages: false,
            timeout_ms: default_timeout_ms(),
            enable_metrics: true,
            max_concurrent_pipelines: default_max_concurrent_pipelines(),
            max_query_length: default_max_query_length(),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_parallel_concurrency() -> usize {
    5
}

fn default_task_retry_delay_ms() -> u64 {
    1_000
}

/// Concurrent task execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelConfig {
    #[serde(default = "default_parallel_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_true")]
    pub enable_dependency_resolution: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub retry_failed_tasks: bool,
    #[serde(default = "default_retry_attempts")]
    pub max_retries: u32,
    #[serde(default = "default_task_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_parallel_concurrency(),
            enable_dependency_resolution: true,
            timeout_ms: default_timeout_ms(),
            retry_failed_tasks: true,
            max_retries: default_retry_attempts(),
            retry_delay_ms: default_task_retry_delay_ms(),
        }
    }
}

impl ParallelConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_partial_cache_section() {
        let toml_str = r#"
            max_size = 64
            key_prefix = "test:"
        "#;

        let config: CacheConfig = toml::from_str(toml_str).unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_size, 64);
        assert_eq!(config.ttl_secs, 300);
        assert_eq!(config.key_prefix, "test:");
    }

    #[test]
    fn parallel_defaults() {
        let config = ParallelConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert!(config.enable_dependency_resolution);
        assert!(config.retry_failed_tasks);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn pipeline_defaults_are_sequential() {
        let config = PipelineConfig::default();
        assert!(config.enabled);
        assert!(!config.parallel_stages);
        assert_eq!(config.max_concurrent_pipelines, 10);
    }

    #[test]
    fn runner_timeout_conversion() {
        let config: RunnerConfig = toml::from_str("default_timeout_ms = 1500").unwrap();
        assert_eq!(config.default_timeout(), Duration::from_millis(1500));
        assert!(config.enable_cache);
        assert!(config.default_space.is_none());
    }
}
