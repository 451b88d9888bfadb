use std::sync::Arc;

use serde::Serialize;

use super::context::PipelineContext;
use crate::session::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Validation,
    Optimization,
    Execution,
    Transformation,
    Caching,
}

impl PipelineStage {
    /// Declared run order.
    pub const ALL: [Self; 5] = [
        Self::Validation,
        Self::Optimization,
        Self::Execution,
        Self::Transformation,
        Self::Caching,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Optimization => "optimization",
            Self::Execution => "execution",
            Self::Transformation => "transformation",
            Self::Caching => "caching",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage.
///
/// Handlers never fail: problems are appended to `ctx.errors` (or
/// `ctx.warnings`) and the context is passed on so later stages still run.
pub trait StageHandler: Send + Sync {
    fn handle(&self, ctx: PipelineContext) -> BoxFuture<'_, PipelineContext>;
}

struct FnStage<F>(F);

impl<F> StageHandler for FnStage<F>
where
    F: Fn(PipelineContext) -> PipelineContext + Send + Sync,
{
    fn handle(&self, ctx: PipelineContext) -> BoxFuture<'_, PipelineContext> {
        let out = (self.0)(ctx);
        Box::pin(async move { out })
    }
}

/// Wrap a synchronous context transform as a stage handler.
#[must_use]
pub fn stage_fn<F>(f: F) -> Arc<dyn StageHandler>
where
    F: Fn(PipelineContext) -> PipelineContext + Send + Sync + 'static,
{
    Arc::new(FnStage(f))
}
