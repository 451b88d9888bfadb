use std::time::Duration;

use crate::escape::QueryType;

/// Sink for per-query timings, e.g. an external metrics exporter.
pub trait PerformanceMonitor: Send + Sync {
    fn record_query(&self, query_type: QueryType, duration: Duration, success: bool);
}

/// Forwards timings to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl PerformanceMonitor for TracingMonitor {
    fn record_query(&self, query_type: QueryType, duration: Duration, success: bool) {
        tracing::debug!(
            ?query_type,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            success,
            "query timing"
        );
    }
}
