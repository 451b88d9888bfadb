use super::Config;

impl Config {
    #[allow(clippy::too_many_lines)]
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NEBULIX_RUNNER_DEFAULT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.runner.default_timeout_ms = ms;
            } else {
                tracing::warn!("ignoring invalid NEBULIX_RUNNER_DEFAULT_TIMEOUT_MS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("NEBULIX_RUNNER_DEFAULT_RETRY_ATTEMPTS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.runner.default_retry_attempts = n;
        }
        if let Ok(v) = std::env::var("NEBULIX_RUNNER_ENABLE_CACHE")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.runner.enable_cache = enabled;
        }
        if let Ok(v) = std::env::var("NEBULIX_RUNNER_DEFAULT_SPACE") {
            let v = v.trim();
            self.runner.default_space = (!v.is_empty()).then(|| v.to_owned());
        }
        if let Ok(v) = std::env::var("NEBULIX_CACHE_ENABLED") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.cache.enabled = enabled;
            } else {
                tracing::warn!("ignoring invalid NEBULIX_CACHE_ENABLED value: {v}");
            }
        }
        if let Ok(v) = std::env::var("NEBULIX_CACHE_MAX_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.cache.max_size = n;
            } else {
                tracing::warn!("ignoring invalid NEBULIX_CACHE_MAX_SIZE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("NEBULIX_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.cache.ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("NEBULIX_CACHE_KEY_PREFIX") {
            self.cache.key_prefix = v;
        }
        if let Ok(v) = std::env::var("NEBULIX_RETRY_MAX_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.retry.max_retries = n;
        }
        if let Ok(v) = std::env::var("NEBULIX_RETRY_BASE_DELAY_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.retry.base_delay_ms = ms;
        }
        if let Ok(v) = std::env::var("NEBULIX_CIRCUIT_BREAKER_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.circuit_breaker.enabled = enabled;
        }
        if let Ok(v) = std::env::var("NEBULIX_CIRCUIT_BREAKER_FAILURE_THRESHOLD")
            && let Ok(n) = v.parse::<u32>()
        {
            self.circuit_breaker.failure_threshold = n;
        }
        if let Ok(v) = std::env::var("NEBULIX_CIRCUIT_BREAKER_RESET_TIMEOUT_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.circuit_breaker.reset_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("NEBULIX_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.batch.batch_size = n;
        }
        if let Ok(v) = std::env::var("NEBULIX_PIPELINE_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.pipeline.enabled = enabled;
        }
        if let Ok(v) = std::env::var("NEBULIX_PIPELINE_PARALLEL_STAGES")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.pipeline.parallel_stages = enabled;
        }
        if let Ok(v) = std::env::var("NEBULIX_PIPELINE_MAX_CONCURRENT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.pipeline.max_concurrent_pipelines = n;
        }
        if let Ok(v) = std::env::var("NEBULIX_PARALLEL_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                self.parallel.max_concurrency = n;
            } else {
                tracing::warn!("ignoring invalid NEBULIX_PARALLEL_MAX_CONCURRENCY value: {v}");
            }
        }
        if let Ok(v) = std::env::var("NEBULIX_PARALLEL_TIMEOUT_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.parallel.timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("NEBULIX_PARALLEL_RETRY_FAILED_TASKS")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.parallel.retry_failed_tasks = enabled;
        }
        if let Ok(v) = std::env::var("NEBULIX_EVENTS_CAPACITY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.events.capacity = n;
        }
    }
}
