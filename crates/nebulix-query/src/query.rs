use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::RunnerConfig;
use crate::escape::QueryType;

/// Named query parameters. Ordered so that serialization is canonical.
pub type Params = BTreeMap<String, Value>;

/// A single result row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Per-call overrides; unset fields fall back to [`RunnerConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub use_cache: Option<bool>,
    pub space: Option<String>,
}

impl QueryOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    #[must_use]
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    #[must_use]
    pub fn resolve(&self, defaults: &RunnerConfig) -> ResolvedOptions {
        ResolvedOptions {
            timeout: self.timeout.unwrap_or_else(|| defaults.default_timeout()),
            retry_attempts: self.retry_attempts.unwrap_or(defaults.default_retry_attempts),
            use_cache: self.use_cache.unwrap_or(defaults.enable_cache),
            space: self.space.clone().or_else(|| defaults.default_space.clone()),
        }
    }
}

/// Options after merging with runner defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub use_cache: bool,
    pub space: Option<String>,
}

/// A query statement with its parameters, produced by `QueryBuilder` or by hand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub text: String,
    pub parameters: Params,
    pub options: QueryOptions,
}

impl Query {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_params(text: impl Into<String>, parameters: Params) -> Self {
        Self {
            text: text.into(),
            parameters,
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Raw tabular response handed back by a [`crate::session::Session`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub space: Option<String>,
}

impl RawResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            space: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Outcome of one logical query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column-oriented view: column name to its values in row order.
    pub table: BTreeMap<String, Vec<Value>>,
    pub rows: Vec<Row>,
    pub data: Value,
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResultMetadata,
}

impl QueryResult {
    #[must_use]
    pub fn from_raw(raw: RawResult) -> Self {
        let mut table: BTreeMap<String, Vec<Value>> = raw
            .columns
            .iter()
            .map(|c| (c.clone(), Vec::with_capacity(raw.rows.len())))
            .collect();

        let rows: Vec<Row> = raw
            .rows
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (column, value) in raw.columns.iter().zip(values) {
                    if let Some(col) = table.get_mut(column) {
                        col.push(value.clone());
                    }
                    row.insert(column.clone(), value);
                }
                row
            })
            .collect();

        let data = Value::Array(rows.iter().cloned().map(Value::Object).collect());

        Self {
            table,
            rows,
            data,
            execution_time: Duration::ZERO,
            error: None,
            metadata: ResultMetadata {
                space: raw.space,
                ..ResultMetadata::default()
            },
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
