//! Lifecycle notifications broadcast to any number of observers.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::escape::truncate_query;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueryEvent {
    QueryCompleted {
        query: String,
        has_parameters: bool,
        execution_time: Duration,
        from_cache: bool,
        space: Option<String>,
    },
    QueryError {
        query: String,
        kind: ErrorKind,
        message: String,
        execution_time: Duration,
    },
    BatchQueryCompleted {
        query_count: usize,
        execution_time: Duration,
    },
    BatchQueryError {
        query_count: usize,
        kind: ErrorKind,
        message: String,
    },
    PipelineStarted {
        pipeline_id: u64,
        query: String,
    },
    PipelineCompleted {
        pipeline_id: u64,
        execution_time: Duration,
    },
    PipelineError {
        pipeline_id: u64,
        message: String,
    },
    TaskCompleted {
        task_id: String,
        execution_time: Duration,
        attempts: u32,
    },
    TaskFailed {
        task_id: String,
        message: String,
        attempts: u32,
    },
}

impl QueryEvent {
    pub(crate) fn query_completed(
        query: &str,
        has_parameters: bool,
        execution_time: Duration,
        from_cache: bool,
        space: Option<String>,
    ) -> Self {
        Self::QueryCompleted {
            query: truncate_query(query),
            has_parameters,
            execution_time,
            from_cache,
            space,
        }
    }
}

/// Fan-out channel for [`QueryEvent`]s.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// dropped, and a subscriber that falls behind by more than the channel
/// capacity skips the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueryEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: QueryEvent) {
        tracing::debug!(?event, "query event");
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
