//! Single-query orchestration: validation, cache, breaker, retry, session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use tokio::time::{Instant, timeout_at};

use crate::batch::{BatchFn, BatchOptions, BatchProcessingService, ChunkedBatchProcessor};
use crate::breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::cache::{CacheStats, QueryCache};
use crate::config::{CircuitBreakerConfig, RunnerConfig};
use crate::error::{
    EngineError, ErrorClassifier, ErrorContext, ErrorKind, KeywordClassifier, QueryError, Result,
};
use crate::escape::{QueryType, StatsBucket, classify_query, interpolate, truncate_query, validate_query};
use crate::events::{EventBus, QueryEvent};
use crate::monitor::PerformanceMonitor;
use crate::query::{Params, Query, QueryOptions, QueryResult, RawResult};
use crate::retry::{ExponentialBackoff, RetryStrategy, execute_with_retry_until};
use crate::session::{BoxFuture, SessionHandle, SessionManager};

const COMPONENT: &str = "QueryRunner";

/// Anything that can run one query to a classified result.
///
/// Implemented by [`QueryRunner`]; the pipeline and the parallel executor
/// depend on this seam so they can be driven by a stub in tests.
pub trait QueryExecutor: Send + Sync {
    fn run_query<'a>(
        &'a self,
        query: &'a str,
        params: &'a Params,
        options: &'a QueryOptions,
    ) -> BoxFuture<'a, Result<QueryResult>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueriesByType {
    pub read: u64,
    pub write: u64,
    #[serde(rename = "use")]
    pub use_statements: u64,
    pub other: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_queries: u64,
    successful_queries: u64,
    failed_queries: u64,
    total_execution_time: Duration,
    by_type: QueriesByType,
}

/// Snapshot returned by [`QueryRunner::get_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunnerStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_execution_time: Duration,
    pub average_execution_time: Duration,
    pub queries_by_type: QueriesByType,
    pub cache: CacheStats,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Executes queries against a [`SessionManager`].
///
/// Cheap to clone; clones share cache, breaker, stats and event bus.
#[derive(Clone)]
pub struct QueryRunner {
    config: Arc<RunnerConfig>,
    sessions: Arc<dyn SessionManager>,
    cache: Arc<QueryCache>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<dyn RetryStrategy>,
    batch: Arc<dyn BatchProcessingService>,
    batch_options: BatchOptions,
    classifier: Arc<dyn ErrorClassifier>,
    monitor: Option<Arc<dyn PerformanceMonitor>>,
    events: EventBus,
    counters: Arc<Mutex<Counters>>,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("config", &self.config)
            .field("batch_options", &self.batch_options)
            .finish_non_exhaustive()
    }
}

/// A checked-out session. Dropped unsettled, it invalidates and releases
/// the session on a spawned task, since the statement may still be running.
struct SessionLease {
    sessions: Arc<dyn SessionManager>,
    session: SessionHandle,
    settled: bool,
}

impl SessionLease {
    async fn settle(mut self, invalidate: bool) {
        if invalidate {
            self.sessions.invalidate_session(&self.session).await;
        }
        self.settled = true;
        self.sessions.release_session(Arc::clone(&self.session)).await;
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session = self.session.id(), "no runtime to release cancelled session");
            return;
        };
        tracing::debug!(session = self.session.id(), "releasing session of cancelled query");
        let sessions = Arc::clone(&self.sessions);
        let session = Arc::clone(&self.session);
        handle.spawn(async move {
            sessions.invalidate_session(&session).await;
            sessions.release_session(session).await;
        });
    }
}

impl QueryRunner {
    /// Runner with a default breaker, exponential backoff, chunked batch
    /// processing and keyword error classification.
    #[must_use]
    pub fn new(config: RunnerConfig, sessions: Arc<dyn SessionManager>, cache: Arc<QueryCache>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            cache,
            breaker: Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
            retry: Arc::new(ExponentialBackoff::default()),
            batch: Arc::new(ChunkedBatchProcessor),
            batch_options: BatchOptions::default(),
            classifier: Arc::new(KeywordClassifier),
            monitor: None,
            events: EventBus::default(),
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_batch_processor(
        mut self,
        batch: Arc<dyn BatchProcessingService>,
        options: BatchOptions,
    ) -> Self {
        self.batch = batch;
        self.batch_options = options;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn classifier(&self) -> &dyn ErrorClassifier {
        self.classifier.as_ref()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one statement.
    ///
    /// A cache hit returns the stored result with `metadata.from_cache` set
    /// and never reaches the breaker or the session layer. On a miss the
    /// statement runs inside the circuit breaker with retries nested inside
    /// it; `options.timeout` bounds the whole call including every attempt.
    ///
    /// # Errors
    ///
    /// Returns a classified [`QueryError`] for validation failures, timeouts,
    /// an open circuit, and driver errors.
    pub async fn execute(
        &self,
        query: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let start = Instant::now();
        let opts = options.resolve(&self.config);
        let query_type = classify_query(query);
        self.count_query(query_type);

        if let Err(e) = validate_query(query) {
            return Err(self.fail(e, query, params, start.elapsed()));
        }

        if opts.use_cache
            && let Some(mut hit) = self.cache.get(query, params)
        {
            hit.metadata.from_cache = true;
            self.record(query_type, start.elapsed(), true);
            self.events.emit(QueryEvent::query_completed(
                query,
                !params.is_empty(),
                start.elapsed(),
                true,
                hit.metadata.space.clone(),
            ));
            return Ok(hit);
        }

        let statement = interpolate(query, params);
        let deadline = start + opts.timeout;
        let space = opts.space.as_deref();

        let outcome = self
            .breaker
            .execute(|| {
                execute_with_retry_until(
                    self.retry.as_ref(),
                    opts.retry_attempts,
                    "QueryRunner.execute",
                    deadline,
                    || self.run_on_session(&statement, space, deadline, opts.timeout),
                )
            })
            .await;

        match outcome {
            Ok(raw) => {
                let elapsed = start.elapsed();
                let mut result = QueryResult::from_raw(raw);
                result.execution_time = elapsed;
                result.metadata.query_type = Some(query_type);
                if result.metadata.space.is_none() {
                    result.metadata.space = opts.space.clone();
                }
                if opts.use_cache {
                    self.cache.set(query, params, &result);
                }
                self.record(query_type, elapsed, true);
                self.events.emit(QueryEvent::query_completed(
                    query,
                    !params.is_empty(),
                    elapsed,
                    false,
                    result.metadata.space.clone(),
                ));
                tracing::debug!(
                    ?query_type,
                    rows = result.row_count(),
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "query completed"
                );
                Ok(result)
            }
            Err(e) => Err(self.fail(e, query, params, start.elapsed())),
        }
    }

    /// Convenience wrapper around [`execute`](Self::execute) for a built [`Query`].
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn run(&self, query: &Query) -> Result<QueryResult> {
        self.execute(&query.text, &query.parameters, &query.options).await
    }

    /// Borrow a session, run `statement` on it and hand it back.
    ///
    /// The session is released on every path once acquired; on a
    /// connection-class failure it is invalidated first. If the caller drops
    /// this future mid-statement, the lease hands the session back instead.
    async fn run_on_session(
        &self,
        statement: &str,
        space: Option<&str>,
        deadline: Instant,
        budget: Duration,
    ) -> std::result::Result<RawResult, EngineError> {
        if Instant::now() >= deadline {
            return Err(EngineError::Timeout(budget));
        }
        let session = timeout_at(deadline, self.sessions.get_session(space))
            .await
            .map_err(|_| EngineError::Timeout(budget))??;
        let lease = SessionLease {
            sessions: Arc::clone(&self.sessions),
            session,
            settled: false,
        };

        let outcome = match timeout_at(deadline, lease.session.execute(statement)).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout(budget)),
        };

        let broken = match &outcome {
            Err(e) if self.classifier.classify(e) == ErrorKind::Connection => {
                tracing::debug!(session = lease.session.id(), error = %e, "invalidating session");
                true
            }
            _ => false,
        };
        lease.settle(broken).await;
        outcome
    }

    fn fail(&self, error: EngineError, query: &str, params: &Params, elapsed: Duration) -> QueryError {
        let err = QueryError::classify(
            self.classifier.as_ref(),
            error,
            ErrorContext::new(COMPONENT, "execute")
                .with_query(query)
                .with_parameters(!params.is_empty()),
        );
        self.record(classify_query(query), elapsed, false);
        self.events.emit(QueryEvent::QueryError {
            query: truncate_query(query),
            kind: err.kind,
            message: err.message.clone(),
            execution_time: elapsed,
        });
        tracing::warn!(kind = %err.kind, error = %err.message, query = %truncate_query(query), "query failed");
        err
    }

    /// Run many queries through the batch processor.
    ///
    /// Results are in input order. Any failure fails the whole batch; use the
    /// parallel executor for per-query failure isolation.
    ///
    /// # Errors
    ///
    /// Returns a classified [`QueryError`] with `operation = "executeBatch"`
    /// and the batch size in its context.
    pub async fn execute_batch(&self, queries: Vec<Query>) -> Result<Vec<QueryResult>> {
        let query_count = queries.len();
        let start = Instant::now();
        let runner = self.clone();
        let batch_fn: BatchFn = Arc::new(
            move |chunk: Vec<Query>| -> BoxFuture<'static, std::result::Result<Vec<QueryResult>, EngineError>> {
                let runner = runner.clone();
                Box::pin(async move {
                    try_join_all(chunk.iter().map(|q| runner.run(q)))
                        .await
                        .map_err(|e| e.original_error().clone())
                })
            },
        );

        match self
            .batch
            .process_batches(queries, batch_fn, self.batch_options)
            .await
        {
            Ok(results) => {
                self.events.emit(QueryEvent::BatchQueryCompleted {
                    query_count,
                    execution_time: start.elapsed(),
                });
                Ok(results)
            }
            Err(e) => {
                let err = QueryError::classify(
                    self.classifier.as_ref(),
                    e,
                    ErrorContext::new(COMPONENT, "executeBatch").with_query_count(query_count),
                );
                self.events.emit(QueryEvent::BatchQueryError {
                    query_count,
                    kind: err.kind,
                    message: err.message.clone(),
                });
                tracing::warn!(query_count, kind = %err.kind, error = %err.message, "batch failed");
                Err(err)
            }
        }
    }

    /// Cache lookup for callers that manage their own statements.
    #[must_use]
    pub fn get_cached_result(&self, query: &str, params: &Params) -> Option<QueryResult> {
        self.cache.get(query, params)
    }

    pub fn set_cached_result(&self, query: &str, params: &Params, result: &QueryResult) {
        self.cache.set(query, params, result);
    }

    fn count_query(&self, query_type: QueryType) {
        let mut c = self.counters();
        c.total_queries += 1;
        match query_type.bucket() {
            StatsBucket::Read => c.by_type.read += 1,
            StatsBucket::Write => c.by_type.write += 1,
            StatsBucket::Use => c.by_type.use_statements += 1,
            StatsBucket::Other => c.by_type.other += 1,
        }
    }

    fn record(&self, query_type: QueryType, duration: Duration, success: bool) {
        {
            let mut c = self.counters();
            if success {
                c.successful_queries += 1;
            } else {
                c.failed_queries += 1;
            }
            c.total_execution_time += duration;
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_query(query_type, duration, success);
        }
    }

    /// Record an outcome measured outside [`execute`](Self::execute).
    pub fn record_query_metrics(&self, query: &str, duration: Duration, success: bool) {
        self.record(classify_query(query), duration, success);
    }

    #[must_use]
    pub fn get_stats(&self) -> RunnerStats {
        let cache = self.cache.get_stats();
        let c = self.counters();
        let finished = c.successful_queries + c.failed_queries;
        let average_execution_time = u32::try_from(finished)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| c.total_execution_time / n);
        RunnerStats {
            total_queries: c.total_queries,
            successful_queries: c.successful_queries,
            failed_queries: c.failed_queries,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            total_execution_time: c.total_execution_time,
            average_execution_time,
            queries_by_type: c.by_type,
            cache,
            circuit_breaker: self.breaker.stats(),
        }
    }
}

impl QueryExecutor for QueryRunner {
    fn run_query<'a>(
        &'a self,
        query: &'a str,
        params: &'a Params,
        options: &'a QueryOptions,
    ) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(self.execute(query, params, options))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::config::{CacheConfig, RetryConfig};
    use crate::error::DriverError;
    use crate::mock::MockSessionManager;

    fn runner(sessions: &Arc<MockSessionManager>) -> QueryRunner {
        QueryRunner::new(
            RunnerConfig::default(),
            Arc::clone(sessions) as Arc<dyn SessionManager>,
            Arc::new(QueryCache::new(&CacheConfig::default())),
        )
        .with_retry_strategy(Arc::new(ExponentialBackoff::new(&RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 10,
            multiplier: 1.0,
        })))
    }

    fn rows() -> RawResult {
        RawResult::new(vec!["id".into()], vec![vec![json!("f1")]])
    }

    #[tokio::test]
    async fn second_call_served_from_cache() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        let runner = runner(&sessions);
        let params: Params = [("id".to_owned(), json!("f1"))].into_iter().collect();

        let first = runner
            .execute("FETCH PROP ON * $id YIELD vertex AS v", &params, &QueryOptions::default())
            .await
            .unwrap();
        let second = runner
            .execute("FETCH PROP ON * $id YIELD vertex AS v", &params, &QueryOptions::default())
            .await
            .unwrap();

        assert!(!first.metadata.from_cache);
        assert!(second.metadata.from_cache);
        assert_eq!(first.rows, second.rows);
        assert_eq!(sessions.executions.load(Ordering::SeqCst), 1);
        assert_eq!(
            sessions.statements(),
            vec!["FETCH PROP ON * \"f1\" YIELD vertex AS v".to_owned()]
        );

        let stats = runner.get_stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.successful_queries, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.queries_by_type.read, 2);
    }

    #[tokio::test]
    async fn cache_can_be_bypassed_per_call() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        let runner = runner(&sessions);
        let opts = QueryOptions::default().with_cache(false);
        runner.execute("RETURN 1", &Params::new(), &opts).await.unwrap();
        runner.execute("RETURN 1", &Params::new(), &opts).await.unwrap();
        assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
        assert!(runner.cache().is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        sessions.push_failure(DriverError::new(-1004, "SyntaxError: syntax error near `RETRUN'"));
        let runner = runner(&sessions);

        let err = runner
            .execute("RETURN 1", &Params::new(), &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.context.component, "QueryRunner");
        assert_eq!(err.context.operation, "execute");
        assert!(runner.cache().is_empty());

        let ok = runner
            .execute("RETURN 1", &Params::new(), &QueryOptions::default())
            .await
            .unwrap();
        assert!(!ok.metadata.from_cache);
        assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_retry_and_invalidate() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        sessions.push_failure(DriverError::new(-1, "connection reset by peer"));
        let runner = runner(&sessions);

        runner
            .execute("RETURN 1", &Params::new(), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.invalidated.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dangerous_query_rejected_before_session() {
        let sessions = Arc::new(MockSessionManager::new());
        let runner = runner(&sessions);
        let err = runner
            .execute("DROP SPACE", &Params::new(), &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(matches!(err.original_error(), EngineError::Rejected(_)));
        assert_eq!(sessions.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(runner.get_stats().failed_queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_connection_error() {
        let sessions = Arc::new(
            MockSessionManager::new()
                .with_default_result(rows())
                .with_delay(Duration::from_secs(10)),
        );
        let runner = runner(&sessions);
        let opts = QueryOptions::default()
            .with_timeout(Duration::from_millis(50))
            .with_retry_attempts(0);
        let err = runner.execute("RETURN 1", &Params::new(), &opts).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Connection);
        assert!(matches!(err.original_error(), EngineError::Timeout(_)));
        assert_eq!(sessions.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_every_retry() {
        let sessions = Arc::new(
            MockSessionManager::new()
                .with_default_result(rows())
                .with_delay(Duration::from_millis(30)),
        );
        sessions.fail_on("RETURN", DriverError::new(-1, "connection refused"));
        let runner = runner(&sessions);
        let opts = QueryOptions::default().with_timeout(Duration::from_millis(50));

        let start = Instant::now();
        let err = runner.execute("RETURN 1", &Params::new(), &opts).await.unwrap_err();

        // Attempt one fails at 30ms, attempt two is cut off at 50ms.
        assert!(start.elapsed() < Duration::from_millis(60));
        assert_eq!(err.kind, ErrorKind::Connection);
        assert!(matches!(err.original_error(), EngineError::Timeout(_)));
        assert_eq!(sessions.executions.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_query_hands_session_back() {
        let sessions = Arc::new(
            MockSessionManager::new()
                .with_default_result(rows())
                .with_delay(Duration::from_secs(10)),
        );
        let runner = runner(&sessions);

        let outer = tokio::time::timeout(
            Duration::from_millis(100),
            runner.execute("RETURN 1", &Params::new(), &QueryOptions::default()),
        )
        .await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sessions.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.invalidated.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn space_option_reaches_session_manager() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        let runner = runner(&sessions);
        let result = runner
            .execute(
                "RETURN 1",
                &Params::new(),
                &QueryOptions::default().with_space("code_graph"),
            )
            .await
            .unwrap();
        assert_eq!(sessions.spaces(), vec![Some("code_graph".to_owned())]);
        assert_eq!(result.metadata.space.as_deref(), Some("code_graph"));
    }

    #[tokio::test]
    async fn events_published_for_hits_and_errors() {
        let sessions = Arc::new(MockSessionManager::new().with_default_result(rows()));
        let runner = runner(&sessions);
        let mut rx = runner.events().subscribe();

        runner.execute("RETURN 1", &Params::new(), &QueryOptions::default()).await.unwrap();
        runner.execute("RETURN 1", &Params::new(), &QueryOptions::default()).await.unwrap();
        let _ = runner.execute("", &Params::new(), &QueryOptions::default()).await;

        assert!(matches!(rx.recv().await.unwrap(), QueryEvent::QueryCompleted { from_cache: false, .. }));
        assert!(matches!(rx.recv().await.unwrap(), QueryEvent::QueryCompleted { from_cache: true, .. }));
        assert!(matches!(rx.recv().await.unwrap(), QueryEvent::QueryError { kind: ErrorKind::Syntax, .. }));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let sessions = Arc::new(MockSessionManager::new().with_echo());
        let runner = runner(&sessions).with_batch_processor(
            Arc::new(ChunkedBatchProcessor),
            BatchOptions {
                batch_size: 2,
                max_concurrency: 2,
            },
        );
        let queries: Vec<Query> = (0..5).map(|i| Query::new(format!("RETURN {i}"))).collect();
        let results = runner.execute_batch(queries).await.unwrap();
        let echoed: Vec<_> = results.iter().map(|r| r.rows[0]["statement"].clone()).collect();
        let expected: Vec<_> = (0..5).map(|i| json!(format!("RETURN {i}"))).collect();
        assert_eq!(echoed, expected);
    }

    #[tokio::test]
    async fn batch_failure_carries_batch_context() {
        let sessions = Arc::new(MockSessionManager::new().with_echo());
        let runner = runner(&sessions);
        let queries = vec![Query::new("RETURN 1"), Query::new("TRUNCATE everything")];
        let err = runner.execute_batch(queries).await.unwrap_err();
        assert_eq!(err.context.operation, "executeBatch");
        assert_eq!(err.context.query_count, Some(2));
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn record_query_metrics_updates_averages() {
        let sessions = Arc::new(MockSessionManager::new());
        let runner = runner(&sessions);
        runner.record_query_metrics("MATCH (v) RETURN v", Duration::from_millis(10), true);
        runner.record_query_metrics("INSERT VERTEX t() VALUES \"a\":()", Duration::from_millis(30), false);
        let stats = runner.get_stats();
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert_eq!(stats.average_execution_time, Duration::from_millis(20));
    }
}
