use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nebulix_core::{Config, CoreError, QueryEngine};
use nebulix_query::error::DriverError;
use nebulix_query::mock::MockSessionManager;
use nebulix_query::pipeline::PipelineError;
use nebulix_query::{
    EngineError, ErrorKind, ParallelQueryTask, Params, Query, QueryEvent, QueryOptions,
    SessionManager,
};
use serde_json::json;

fn engine(config: &Config, sessions: &Arc<MockSessionManager>) -> QueryEngine {
    QueryEngine::from_config(config, Arc::clone(sessions) as Arc<dyn SessionManager>)
}

#[tokio::test]
async fn pipeline_result_cached_across_calls() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let engine = engine(&Config::default(), &sessions);

    let first = engine
        .execute("RETURN  1 ;", Params::new(), QueryOptions::default())
        .await
        .unwrap();
    let second = engine
        .execute("RETURN 1", Params::new(), QueryOptions::default())
        .await
        .unwrap();

    assert!(!first.metadata.from_cache);
    assert!(second.metadata.from_cache);
    assert_eq!(sessions.executions.load(Ordering::SeqCst), 1);
    assert_eq!(sessions.statements(), vec!["RETURN 1".to_owned()]);
    assert!(first.metadata.extra.contains_key("stageTimings"));

    let stats = engine.stats();
    assert_eq!(stats.pipeline.total_pipelines, 2);
    assert_eq!(stats.pipeline.successful_pipelines, 2);
    assert_eq!(stats.runner.total_queries, 1);
    assert_eq!(stats.runner.cache_misses, 1);
    assert_eq!(stats.runner.cache_hits, 1);
    assert_eq!(stats.runner.cache.sets, 1);
}

#[tokio::test]
async fn runner_cache_switch_governs_pipeline() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let mut config = Config::default();
    config.runner.enable_cache = false;
    let engine = engine(&config, &sessions);

    for _ in 0..2 {
        let result = engine
            .execute("RETURN 1", Params::new(), QueryOptions::default())
            .await
            .unwrap();
        assert!(!result.metadata.from_cache);
    }
    assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
    assert!(engine.runner().cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn outer_timeouts_hand_sessions_back() {
    let sessions = Arc::new(
        MockSessionManager::new()
            .with_echo()
            .with_delay(Duration::from_secs(10)),
    );
    let mut config = Config::default();
    config.pipeline.timeout_ms = 100;
    config.parallel.timeout_ms = 100;
    config.parallel.retry_failed_tasks = false;
    let engine = engine(&config, &sessions);

    let err = engine
        .execute("RETURN 1", Params::new(), QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Pipeline(PipelineError::Timeout(_))));

    let results = engine
        .run_parallel(vec![ParallelQueryTask::new("slow", "RETURN 2")])
        .await;
    assert!(!results[0].is_success());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(sessions.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(sessions.released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pipeline_rejects_destructive_statement() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let engine = engine(&Config::default(), &sessions);

    let err = engine
        .execute("CLEAR SPACE", Params::new(), QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Pipeline(PipelineError::Stages(ref errs)) if errs.len() == 1));
    assert_eq!(sessions.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn default_space_reaches_sessions() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let mut config = Config::default();
    config.runner.default_space = Some("social".into());
    let engine = engine(&config, &sessions);

    let result = engine
        .run(&Query::new("MATCH (v) RETURN v LIMIT $n").param("n", 3))
        .await
        .unwrap();

    assert_eq!(sessions.spaces(), vec![Some("social".to_owned())]);
    assert_eq!(result.metadata.space.as_deref(), Some("social"));
    assert_eq!(result.data[0]["statement"], json!("MATCH (v) RETURN v LIMIT 3"));
}

#[tokio::test]
async fn events_published_to_subscribers() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let engine = engine(&Config::default(), &sessions);
    let mut rx = engine.subscribe();

    engine.run(&Query::new("RETURN 1")).await.unwrap();

    match rx.recv().await.unwrap() {
        QueryEvent::QueryCompleted {
            query, from_cache, ..
        } => {
            assert_eq!(query, "RETURN 1");
            assert!(!from_cache);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn breaker_opens_after_configured_failures() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    sessions.fail_on("RETURN", DriverError::new(-1, "connection refused"));

    let mut config = Config::default();
    config.circuit_breaker.failure_threshold = 2;
    config.retry.max_retries = 0;
    config.cache.enabled = false;
    let engine = engine(&config, &sessions);

    for _ in 0..2 {
        let err = engine.run(&Query::new("RETURN 1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Query(ref e) if e.kind == ErrorKind::Connection));
    }
    assert_eq!(sessions.invalidated.load(Ordering::SeqCst), 2);

    let err = engine.run(&Query::new("RETURN 1")).await.unwrap_err();
    let CoreError::Query(err) = err else {
        panic!("expected a query error");
    };
    assert_eq!(err.kind, ErrorKind::Connection);
    assert!(matches!(err.original_error(), EngineError::CircuitOpen));
    assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn batch_results_keep_input_order() {
    let sessions = Arc::new(MockSessionManager::new().with_echo());
    let mut config = Config::default();
    config.batch.batch_size = 2;
    let engine = engine(&config, &sessions);

    let queries: Vec<Query> = (0..5).map(|i| Query::new(format!("RETURN {i}"))).collect();
    let results = engine.run_batch(queries).await.unwrap();

    let statements: Vec<_> = results
        .iter()
        .map(|r| r.data[0]["statement"].clone())
        .collect();
    assert_eq!(
        statements,
        (0..5).map(|i| json!(format!("RETURN {i}"))).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn parallel_tasks_respect_dependencies() {
    let sessions = Arc::new(
        MockSessionManager::new()
            .with_echo()
            .with_delay(Duration::from_millis(5)),
    );
    let engine = engine(&Config::default(), &sessions);

    let results = engine
        .run_parallel(vec![
            ParallelQueryTask::new("schema", "CREATE TAG IF NOT EXISTS person(name string)"),
            ParallelQueryTask::new("load", "INSERT VERTEX person(name) VALUES \"p1\":(\"Ann\")")
                .depends_on("schema"),
            ParallelQueryTask::new("read", "FETCH PROP ON person \"p1\" YIELD vertex AS v")
                .depends_on("load"),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_success()));
    assert!(results[1].start_time >= results[0].end_time);
    assert!(results[2].start_time >= results[1].end_time);
    assert_eq!(engine.stats().parallel.completed_tasks, 3);
}

#[test]
fn stats_serialize_to_json() {
    let sessions = Arc::new(MockSessionManager::new());
    let engine = engine(&Config::default(), &sessions);
    let value = serde_json::to_value(engine.stats()).unwrap();
    for key in ["runner", "pipeline", "parallel"] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
}
