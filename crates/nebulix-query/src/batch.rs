//! Chunked execution of many queries.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};

use crate::config::BatchConfig;
use crate::error::EngineError;
use crate::query::{Query, QueryResult};
use crate::session::BoxFuture;

/// Runs one chunk of queries and returns their results in input order.
pub type BatchFn =
    Arc<dyn Fn(Vec<Query>) -> BoxFuture<'static, Result<Vec<QueryResult>, EngineError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrency: config.max_concurrency,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

pub trait BatchProcessingService: Send + Sync {
    /// Split `items` into chunks, run each through `batch_fn`, and return the
    /// concatenated results in input order.
    fn process_batches(
        &self,
        items: Vec<Query>,
        batch_fn: BatchFn,
        options: BatchOptions,
    ) -> BoxFuture<'_, Result<Vec<QueryResult>, EngineError>>;
}

/// Runs up to `max_concurrency` chunks at once. The first failing chunk
/// fails the whole call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkedBatchProcessor;

impl BatchProcessingService for ChunkedBatchProcessor {
    fn process_batches(
        &self,
        items: Vec<Query>,
        batch_fn: BatchFn,
        options: BatchOptions,
    ) -> BoxFuture<'_, Result<Vec<QueryResult>, EngineError>> {
        Box::pin(async move {
            let size = options.batch_size.max(1);
            let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
            let mut items = items.into_iter().peekable();
            while items.peek().is_some() {
                chunks.push(items.by_ref().take(size).collect::<Vec<_>>());
            }
            let chunk_count = chunks.len();

            let results: Vec<Vec<QueryResult>> = stream::iter(chunks)
                .map(|chunk| batch_fn(chunk))
                .buffered(options.max_concurrency.max(1))
                .try_collect()
                .await?;

            tracing::debug!(chunks = chunk_count, "batch processed");
            Ok(results.into_iter().flatten().collect())
        })
    }
}
