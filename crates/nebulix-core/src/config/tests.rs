use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 22] = [
    "NEBULIX_RUNNER_DEFAULT_TIMEOUT_MS",
    "NEBULIX_RUNNER_DEFAULT_RETRY_ATTEMPTS",
    "NEBULIX_RUNNER_ENABLE_CACHE",
    "NEBULIX_RUNNER_DEFAULT_SPACE",
    "NEBULIX_CACHE_ENABLED",
    "NEBULIX_CACHE_MAX_SIZE",
    "NEBULIX_CACHE_TTL_SECS",
    "NEBULIX_CACHE_KEY_PREFIX",
    "NEBULIX_RETRY_MAX_RETRIES",
    "NEBULIX_RETRY_BASE_DELAY_MS",
    "NEBULIX_CIRCUIT_BREAKER_ENABLED",
    "NEBULIX_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
    "NEBULIX_CIRCUIT_BREAKER_RESET_TIMEOUT_MS",
    "NEBULIX_BATCH_SIZE",
    "NEBULIX_PIPELINE_ENABLED",
    "NEBULIX_PIPELINE_PARALLEL_STAGES",
    "NEBULIX_PIPELINE_MAX_CONCURRENT",
    "NEBULIX_PARALLEL_MAX_CONCURRENCY",
    "NEBULIX_PARALLEL_TIMEOUT_MS",
    "NEBULIX_PARALLEL_RETRY_FAILED_TASKS",
    "NEBULIX_EVENTS_CAPACITY",
    "NEBULIX_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.runner.default_timeout_ms, 30_000);
    assert_eq!(config.runner.default_retry_attempts, 3);
    assert!(config.runner.enable_cache);
    assert!(config.runner.default_space.is_none());
    assert_eq!(config.cache.max_size, 1000);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.parallel.max_concurrency, 5);
    assert_eq!(config.events.capacity, 256);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.cache.key_prefix, "nebula:");
    assert!(config.pipeline.enabled);
}

#[test]
#[serial]
fn parse_valid_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[runner]
default_space = "social"
default_timeout_ms = 5000

[cache]
max_size = 16
ttl_secs = 60

[pipeline]
parallel_stages = true

[parallel]
max_concurrency = 8
enable_dependency_resolution = false
"#
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.runner.default_space.as_deref(), Some("social"));
    assert_eq!(config.runner.default_timeout_ms, 5000);
    assert_eq!(config.runner.default_retry_attempts, 3);
    assert_eq!(config.cache.max_size, 16);
    assert_eq!(config.cache.ttl_secs, 60);
    assert!(config.pipeline.parallel_stages);
    assert_eq!(config.parallel.max_concurrency, 8);
    assert!(!config.parallel.enable_dependency_resolution);
    assert_eq!(config.retry.max_retries, 3);
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[cache\nmax_size = ").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("failed to parse config file"));
}

#[test]
#[serial]
fn zero_concurrency_rejected() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zero.toml");
    std::fs::write(&path, "[parallel]\nmax_concurrency = 0\n").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("parallel.max_concurrency"));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("NEBULIX_CACHE_MAX_SIZE", "42");
        std::env::set_var("NEBULIX_RUNNER_DEFAULT_SPACE", "movies");
        std::env::set_var("NEBULIX_PARALLEL_MAX_CONCURRENCY", "2");
        std::env::set_var("NEBULIX_CIRCUIT_BREAKER_ENABLED", "false");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.cache.max_size, 42);
    assert_eq!(config.runner.default_space.as_deref(), Some("movies"));
    assert_eq!(config.parallel.max_concurrency, 2);
    assert!(!config.circuit_breaker.enabled);
}

#[test]
#[serial]
fn invalid_env_values_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("NEBULIX_CACHE_MAX_SIZE", "lots");
        std::env::set_var("NEBULIX_CACHE_ENABLED", "maybe");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.cache.max_size, 1000);
    assert!(config.cache.enabled);
}

#[test]
fn config_round_trips_through_toml() {
    let mut config = Config::default();
    config.runner.default_space = Some("social".into());
    let text = toml::to_string(&config).unwrap();
    let back: Config = toml::from_str(&text).unwrap();
    assert_eq!(back.runner.default_space.as_deref(), Some("social"));
    assert_eq!(back.parallel.retry_delay_ms, config.parallel.retry_delay_ms);
}
