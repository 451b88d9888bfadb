//! Default stage handlers.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::context::{PipelineContext, StageError};
use super::stage::{PipelineStage, StageHandler};
use crate::cache::QueryCache;
use crate::error::{ErrorClassifier, KeywordClassifier};
use crate::escape::{collapse_whitespace, validate_query};
use crate::runner::QueryExecutor;
use crate::session::BoxFuture;

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Rejects empty and dangerous statements; flags oversized queries and
/// null parameters without failing.
#[derive(Debug, Clone, Copy)]
pub struct ValidationStage {
    pub max_query_length: usize,
}

impl StageHandler for ValidationStage {
    fn handle(&self, mut ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        if let Err(e) = validate_query(&ctx.query) {
            let kind = KeywordClassifier.classify(&e);
            ctx.push_error(StageError::new(PipelineStage::Validation, e.to_string()).with_kind(kind));
        }

        let len = ctx.query.chars().count();
        if len > self.max_query_length {
            ctx.push_warning(format!(
                "query length {len} exceeds {} characters",
                self.max_query_length
            ));
        }

        let nulls: Vec<String> = ctx
            .parameters
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.clone())
            .collect();
        for name in nulls {
            ctx.push_warning(format!("parameter `{name}` is null"));
        }

        Box::pin(async move { ctx })
    }
}

/// Collapses whitespace outside literals and drops one trailing `;`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationStage;

impl StageHandler for OptimizationStage {
    fn handle(&self, mut ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        let mut query = collapse_whitespace(&ctx.query);
        if query.ends_with(';') {
            query.pop();
            query.truncate(query.trim_end().len());
        }
        ctx.query = query;
        Box::pin(async move { ctx })
    }
}

/// Runs the statement unless an earlier stage recorded an error.
///
/// The pipeline owns cache lookup and storage, so the executor is always
/// asked to bypass its own cache.
pub struct ExecutionStage {
    pub executor: Arc<dyn QueryExecutor>,
    pub cache: Arc<QueryCache>,
}

impl StageHandler for ExecutionStage {
    fn handle(&self, mut ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        Box::pin(async move {
            if !ctx.errors.is_empty() {
                tracing::debug!(pipeline = ctx.id, "execution skipped after earlier errors");
                return ctx;
            }

            let use_cache = ctx.options.use_cache.unwrap_or(true);
            if use_cache && let Some(mut hit) = self.cache.get(&ctx.query, &ctx.parameters) {
                hit.metadata.from_cache = true;
                ctx.metadata.insert("cacheHit".into(), Value::Bool(true));
                ctx.result = Some(hit);
                return ctx;
            }

            let options = ctx.options.clone().with_cache(false);
            match self
                .executor
                .run_query(&ctx.query, &ctx.parameters, &options)
                .await
            {
                Ok(result) => ctx.result = Some(result),
                Err(e) => ctx.push_error(
                    StageError::new(PipelineStage::Execution, e.to_string()).with_kind(e.kind),
                ),
            }
            ctx
        })
    }
}

/// Attaches pipeline timings to the result metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformationStage;

impl StageHandler for TransformationStage {
    fn handle(&self, mut ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        let elapsed = millis(ctx.start_time.elapsed());
        let timings: Map<String, Value> = ctx
            .stage_timings
            .iter()
            .map(|(stage, t)| (stage.as_str().to_owned(), Value::from(millis(*t))))
            .collect();
        if let Some(result) = ctx.result.as_mut() {
            result
                .metadata
                .extra
                .insert("pipelineExecutionTime".into(), Value::from(elapsed));
            result
                .metadata
                .extra
                .insert("stageTimings".into(), Value::Object(timings));
        }
        Box::pin(async move { ctx })
    }
}

/// Stores fresh, successful results.
pub struct CachingStage {
    pub cache: Arc<QueryCache>,
}

impl StageHandler for CachingStage {
    fn handle(&self, ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        if ctx.options.use_cache.unwrap_or(true)
            && let Some(result) = &ctx.result
            && !result.metadata.from_cache
        {
            self.cache.set(&ctx.query, &ctx.parameters, result);
        }
        Box::pin(async move { ctx })
    }
}
