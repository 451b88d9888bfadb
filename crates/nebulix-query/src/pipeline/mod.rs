//! Staged query processing.
//!
//! A run threads a [`PipelineContext`] through validation, optimization,
//! execution, transformation and caching. Stage problems are collected and
//! reported together once every stage has had its turn.

pub mod builtin;
pub mod context;
pub mod stage;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;

pub use context::{PipelineContext, StageError};
pub use stage::{PipelineStage, StageHandler, stage_fn};

use self::builtin::{
    CachingStage, ExecutionStage, OptimizationStage, TransformationStage, ValidationStage,
};
use crate::cache::QueryCache;
use crate::config::PipelineConfig;
use crate::escape::truncate_query;
use crate::events::{EventBus, QueryEvent};
use crate::query::{Params, QueryOptions, QueryResult};
use crate::runner::QueryExecutor;

fn summarize(errors: &[StageError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline limit reached: {limit} pipelines already running")]
    Overloaded { limit: usize },

    #[error("pipeline timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("pipeline failed with {} error(s): {}", .0.len(), summarize(.0))]
    Stages(Vec<StageError>),

    #[error("pipeline finished without a result")]
    NoResult,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    rejected: u64,
    timed_out: u64,
    peak_active: usize,
    total_time: Duration,
    stage_totals: BTreeMap<PipelineStage, (Duration, u32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total_pipelines: u64,
    pub successful_pipelines: u64,
    pub failed_pipelines: u64,
    pub rejected_pipelines: u64,
    pub timed_out_pipelines: u64,
    pub active_pipelines: usize,
    pub peak_active_pipelines: usize,
    pub average_execution_time: Duration,
    pub average_stage_times: BTreeMap<PipelineStage, Duration>,
}

/// Decrements the in-flight count when a run ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct QueryPipeline {
    config: PipelineConfig,
    stages: RwLock<BTreeMap<PipelineStage, Arc<dyn StageHandler>>>,
    active: AtomicUsize,
    next_id: AtomicU64,
    counters: Mutex<Counters>,
    events: EventBus,
    cache_by_default: bool,
}

impl QueryPipeline {
    /// Pipeline with the default handler registered for every stage.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        executor: Arc<dyn QueryExecutor>,
        cache: Arc<QueryCache>,
        events: EventBus,
    ) -> Self {
        let mut stages: BTreeMap<PipelineStage, Arc<dyn StageHandler>> = BTreeMap::new();
        stages.insert(
            PipelineStage::Validation,
            Arc::new(ValidationStage {
                max_query_length: config.max_query_length,
            }),
        );
        stages.insert(PipelineStage::Optimization, Arc::new(OptimizationStage));
        stages.insert(
            PipelineStage::Execution,
            Arc::new(ExecutionStage {
                executor,
                cache: Arc::clone(&cache),
            }),
        );
        stages.insert(PipelineStage::Transformation, Arc::new(TransformationStage));
        stages.insert(PipelineStage::Caching, Arc::new(CachingStage { cache }));

        Self {
            config,
            stages: RwLock::new(stages),
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            counters: Mutex::new(Counters::default()),
            events,
            cache_by_default: true,
        }
    }

    /// Whether runs without an explicit `use_cache` option go through the
    /// cache. Follows the runner's `enable_cache` when built by the engine.
    #[must_use]
    pub fn with_cache_default(mut self, enabled: bool) -> Self {
        self.cache_by_default = enabled;
        self
    }

    /// Replace the handler for `stage`.
    pub fn register_stage(&self, stage: PipelineStage, handler: Arc<dyn StageHandler>) {
        self.stages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stage, handler);
        tracing::debug!(%stage, "stage handler registered");
    }

    fn handler(&self, stage: PipelineStage) -> Option<Arc<dyn StageHandler>> {
        self.stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stage)
            .cloned()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_enter(&self) -> Result<ActiveGuard<'_>, PipelineError> {
        let limit = self.config.max_concurrent_pipelines;
        let prev = self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(&self.active);
        if prev >= limit {
            drop(guard);
            self.counters().rejected += 1;
            tracing::warn!(limit, "pipeline rejected, too many in flight");
            return Err(PipelineError::Overloaded { limit });
        }
        let mut c = self.counters();
        c.peak_active = c.peak_active.max(prev + 1);
        Ok(guard)
    }

    async fn run_stage(&self, stage: PipelineStage, mut ctx: PipelineContext) -> PipelineContext {
        let Some(handler) = self.handler(stage) else {
            return ctx;
        };
        let started = tokio::time::Instant::now();
        ctx = handler.handle(ctx).await;
        let elapsed = started.elapsed();
        ctx.stage_timings.insert(stage, elapsed);
        tracing::debug!(
            pipeline = ctx.id,
            %stage,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "stage finished"
        );
        ctx
    }

    async fn run_stages(&self, mut ctx: PipelineContext) -> PipelineContext {
        if !self.config.enabled {
            ctx = self.run_stage(PipelineStage::Execution, ctx).await;
            return self.run_stage(PipelineStage::Caching, ctx).await;
        }
        if !self.config.parallel_stages {
            for stage in PipelineStage::ALL {
                ctx = self.run_stage(stage, ctx).await;
            }
            return ctx;
        }

        for stage in [
            PipelineStage::Validation,
            PipelineStage::Optimization,
            PipelineStage::Execution,
        ] {
            ctx = self.run_stage(stage, ctx).await;
        }
        let (transformed, cached) = tokio::join!(
            self.run_stage(PipelineStage::Transformation, ctx.clone()),
            self.run_stage(PipelineStage::Caching, ctx.clone()),
        );
        ctx.merge(transformed, cached)
    }

    /// Run `query` through every stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Overloaded`] immediately when the in-flight
    /// limit is reached, [`PipelineError::Timeout`] when the run exceeds the
    /// configured timeout, and [`PipelineError::Stages`] when any stage
    /// recorded an error.
    pub async fn execute(
        &self,
        query: &str,
        params: Params,
        mut options: QueryOptions,
    ) -> Result<QueryResult, PipelineError> {
        let _guard = self.try_enter()?;
        options.use_cache.get_or_insert(self.cache_by_default);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.events.emit(QueryEvent::PipelineStarted {
            pipeline_id: id,
            query: truncate_query(query),
        });

        let ctx = PipelineContext::new(id, query, params, options);
        let start = ctx.start_time;
        let timeout = self.config.timeout();

        let outcome = match tokio::time::timeout(timeout, self.run_stages(ctx)).await {
            Err(_) => {
                self.counters().timed_out += 1;
                Err(PipelineError::Timeout(timeout))
            }
            Ok(ctx) => {
                if self.config.enable_metrics {
                    let mut c = self.counters();
                    for (stage, t) in &ctx.stage_timings {
                        let entry = c.stage_totals.entry(*stage).or_default();
                        entry.0 += *t;
                        entry.1 += 1;
                    }
                }
                if !ctx.warnings.is_empty() {
                    tracing::info!(pipeline = id, warnings = ?ctx.warnings, "pipeline warnings");
                }
                if !ctx.errors.is_empty() {
                    Err(PipelineError::Stages(ctx.errors))
                } else {
                    ctx.result.ok_or(PipelineError::NoResult)
                }
            }
        };

        let elapsed = start.elapsed();
        {
            let mut c = self.counters();
            c.total += 1;
            c.total_time += elapsed;
            if outcome.is_ok() {
                c.successful += 1;
            } else {
                c.failed += 1;
            }
        }

        match &outcome {
            Ok(_) => self.events.emit(QueryEvent::PipelineCompleted {
                pipeline_id: id,
                execution_time: elapsed,
            }),
            Err(e) => {
                tracing::warn!(pipeline = id, error = %e, "pipeline failed");
                self.events.emit(QueryEvent::PipelineError {
                    pipeline_id: id,
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    #[must_use]
    pub fn active_pipelines(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_stats(&self) -> PipelineStats {
        let c = self.counters();
        let average_execution_time = u32::try_from(c.total)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| c.total_time / n);
        let average_stage_times = c
            .stage_totals
            .iter()
            .filter(|(_, (_, n))| *n > 0)
            .map(|(stage, (total, n))| (*stage, *total / *n))
            .collect();
        PipelineStats {
            total_pipelines: c.total,
            successful_pipelines: c.successful,
            failed_pipelines: c.failed,
            rejected_pipelines: c.rejected,
            timed_out_pipelines: c.timed_out,
            active_pipelines: self.active.load(Ordering::SeqCst),
            peak_active_pipelines: c.peak_active,
            average_execution_time,
            average_stage_times,
        }
    }
}
