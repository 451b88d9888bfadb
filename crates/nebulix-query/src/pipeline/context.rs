use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use super::stage::PipelineStage;
use crate::error::ErrorKind;
use crate::query::{Params, QueryOptions, QueryResult};

/// Problem recorded by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub stage: PipelineStage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl StageError {
    #[must_use]
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// State threaded through every stage of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub id: u64,
    pub query: String,
    pub parameters: Params,
    pub options: QueryOptions,
    pub result: Option<QueryResult>,
    pub metadata: BTreeMap<String, Value>,
    pub errors: Vec<StageError>,
    /// Non-fatal findings, e.g. an oversized query.
    pub warnings: Vec<String>,
    pub start_time: Instant,
    pub stage_timings: BTreeMap<PipelineStage, Duration>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(id: u64, query: impl Into<String>, parameters: Params, options: QueryOptions) -> Self {
        Self {
            id,
            query: query.into(),
            parameters,
            options,
            result: None,
            metadata: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            start_time: Instant::now(),
            stage_timings: BTreeMap::new(),
        }
    }

    pub fn push_error(&mut self, error: StageError) {
        tracing::debug!(pipeline = self.id, stage = %error.stage, error = %error.message, "stage error");
        self.errors.push(error);
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::debug!(pipeline = self.id, %warning, "stage warning");
        self.warnings.push(warning);
    }

    /// Fold two branches that each started from `self` back into one context.
    ///
    /// `primary` supplies the result; errors, warnings, metadata and timings
    /// added by either branch are kept.
    #[must_use]
    pub(crate) fn merge(self, primary: Self, secondary: Self) -> Self {
        let base_errors = self.errors.len();
        let base_warnings = self.warnings.len();

        let mut merged = primary;
        merged
            .errors
            .extend(secondary.errors.into_iter().skip(base_errors));
        merged
            .warnings
            .extend(secondary.warnings.into_iter().skip(base_warnings));
        for (k, v) in secondary.metadata {
            merged.metadata.entry(k).or_insert(v);
        }
        for (stage, t) in secondary.stage_timings {
            merged.stage_timings.entry(stage).or_insert(t);
        }
        merged
    }
}
