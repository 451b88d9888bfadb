//! Wiring of the query engine from configuration.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use nebulix_query::batch::{BatchOptions, ChunkedBatchProcessor};
use nebulix_query::monitor::TracingMonitor;
use nebulix_query::parallel::{ParallelQueryResult, ParallelStats};
use nebulix_query::pipeline::PipelineStats;
use nebulix_query::retry::ExponentialBackoff;
use nebulix_query::runner::RunnerStats;
use nebulix_query::{
    CircuitBreaker, EventBus, ParallelQueryExecutor, ParallelQueryTask, Params, Query,
    QueryCache, QueryEvent, QueryExecutor, QueryOptions, QueryPipeline, QueryResult,
    QueryRunner, SessionManager,
};

use crate::config::Config;
use crate::error::CoreError;

/// Snapshot of every component's counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub runner: RunnerStats,
    pub pipeline: PipelineStats,
    pub parallel: ParallelStats,
}

/// A runner, pipeline and parallel executor sharing one cache, breaker and
/// event bus.
pub struct QueryEngine {
    runner: Arc<QueryRunner>,
    pipeline: QueryPipeline,
    parallel: ParallelQueryExecutor,
    events: EventBus,
}

impl QueryEngine {
    /// Build every component from `config` on top of `sessions`.
    #[must_use]
    pub fn from_config(config: &Config, sessions: Arc<dyn SessionManager>) -> Self {
        let events = EventBus::new(config.events.capacity);
        let cache = Arc::new(QueryCache::new(&config.cache));
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));

        let runner = Arc::new(
            QueryRunner::new(config.runner.clone(), sessions, Arc::clone(&cache))
                .with_breaker(breaker)
                .with_retry_strategy(Arc::new(ExponentialBackoff::new(&config.retry)))
                .with_batch_processor(
                    Arc::new(ChunkedBatchProcessor),
                    BatchOptions::from(&config.batch),
                )
                .with_monitor(Arc::new(TracingMonitor))
                .with_events(events.clone()),
        );
        let executor: Arc<dyn QueryExecutor> = Arc::clone(&runner) as Arc<dyn QueryExecutor>;

        let pipeline = QueryPipeline::new(
            config.pipeline.clone(),
            Arc::clone(&executor),
            cache,
            events.clone(),
        )
        .with_cache_default(config.runner.enable_cache);
        let parallel = ParallelQueryExecutor::new(config.parallel.clone(), executor, events.clone());

        tracing::info!(
            cache_enabled = config.cache.enabled,
            breaker_enabled = config.circuit_breaker.enabled,
            pipeline_enabled = config.pipeline.enabled,
            parallel_concurrency = config.parallel.max_concurrency,
            "query engine ready"
        );

        Self {
            runner,
            pipeline,
            parallel,
            events,
        }
    }

    #[must_use]
    pub fn runner(&self) -> &QueryRunner {
        &self.runner
    }

    #[must_use]
    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn parallel(&self) -> &ParallelQueryExecutor {
        &self.parallel
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.events.subscribe()
    }

    /// Run `query` through the staged pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Pipeline`] when any stage reports an error, the
    /// pipeline times out or too many pipelines are in flight.
    pub async fn execute(
        &self,
        query: &str,
        params: Params,
        options: QueryOptions,
    ) -> Result<QueryResult, CoreError> {
        Ok(self.pipeline.execute(query, params, options).await?)
    }

    /// Run `query` directly on the runner, skipping pipeline stages.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Query`] with the classified failure.
    pub async fn run(&self, query: &Query) -> Result<QueryResult, CoreError> {
        Ok(self.runner.run(query).await?)
    }

    /// Run `queries` in chunks, returning results in input order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Query`] if any chunk fails.
    pub async fn run_batch(&self, queries: Vec<Query>) -> Result<Vec<QueryResult>, CoreError> {
        Ok(self.runner.execute_batch(queries).await?)
    }

    pub async fn run_parallel(&self, tasks: Vec<ParallelQueryTask>) -> Vec<ParallelQueryResult> {
        self.parallel.execute_parallel(tasks).await
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            runner: self.runner.get_stats(),
            pipeline: self.pipeline.get_stats(),
            parallel: self.parallel.get_stats(),
        }
    }
}
