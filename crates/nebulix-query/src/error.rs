//! Error types for query execution.
//!
//! Raw failures are [`EngineError`]s. At the runner boundary every failure is
//! wrapped into a [`QueryError`] tagged with an [`ErrorKind`] by an
//! [`ErrorClassifier`]; the raw error stays reachable through `source()`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::escape::truncate_query;

/// Statement-level failure reported by the wire driver.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Unclassified failure raised anywhere inside the engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("circuit breaker is open, graph service unavailable")]
    CircuitOpen,

    #[error("invalid query: {0}")]
    Rejected(String),

    #[error("batch processing failed: {0}")]
    Batch(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether re-attempting the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        KeywordClassifier.classify(self) == ErrorKind::Connection
    }
}

/// Category assigned to a failure at the runner boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "CONNECTION_ERROR")]
    Connection,
    #[serde(rename = "SYNTAX_ERROR")]
    Syntax,
    #[serde(rename = "AUTHORIZATION_ERROR")]
    Authorization,
    #[serde(rename = "NOT_FOUND_ERROR")]
    NotFound,
    #[serde(rename = "CONFLICT_ERROR")]
    Conflict,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "CONNECTION_ERROR",
            Self::Syntax => "SYNTAX_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::NotFound => "NOT_FOUND_ERROR",
            Self::Conflict => "CONFLICT_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw failure to an [`ErrorKind`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &EngineError) -> ErrorKind;
}

/// Structural match on engine-level variants, keyword match on everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl ErrorClassifier for KeywordClassifier {
    fn classify(&self, error: &EngineError) -> ErrorKind {
        match error {
            EngineError::Timeout(_)
            | EngineError::CircuitOpen
            | EngineError::SessionUnavailable(_) => ErrorKind::Connection,
            EngineError::Rejected(_) => ErrorKind::Syntax,
            EngineError::Driver(e) => classify_message(&e.message),
            EngineError::Batch(msg) | EngineError::Other(msg) => classify_message(msg),
        }
    }
}

const CONNECTION_KEYWORDS: &[&str] = &[
    "connection",
    "connect",
    "timeout",
    "timed out",
    "network",
    "unreachable",
    "refused",
    "broken pipe",
];
const SYNTAX_KEYWORDS: &[&str] = &["syntax", "parse error", "semantic error"];
const AUTH_KEYWORDS: &[&str] = &["permission", "auth", "forbidden", "access denied"];
const NOT_FOUND_KEYWORDS: &[&str] = &["not found", "not exist"];
const CONFLICT_KEYWORDS: &[&str] = &["duplicate", "conflict", "already exist"];

/// Classify a free-form error message by keyword, first match wins.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if has(CONNECTION_KEYWORDS) {
        ErrorKind::Connection
    } else if has(SYNTAX_KEYWORDS) {
        ErrorKind::Syntax
    } else if has(AUTH_KEYWORDS) {
        ErrorKind::Authorization
    } else if has(NOT_FOUND_KEYWORDS) {
        ErrorKind::NotFound
    } else if has(CONFLICT_KEYWORDS) {
        ErrorKind::Conflict
    } else {
        ErrorKind::Unknown
    }
}

/// Where a failure happened and on what input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub has_parameters: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_count: Option<usize>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(truncate_query(query));
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, has_parameters: bool) -> Self {
        self.has_parameters = has_parameters;
        self
    }

    #[must_use]
    pub fn with_query_count(mut self, count: usize) -> Self {
        self.query_count = Some(count);
        self
    }
}

/// Classified failure surfaced to callers of the engine.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    #[source]
    original: Arc<EngineError>,
}

impl QueryError {
    #[must_use]
    pub fn classify(
        classifier: &dyn ErrorClassifier,
        error: EngineError,
        context: ErrorContext,
    ) -> Self {
        let kind = classifier.classify(&error);
        Self {
            kind,
            message: error.to_string(),
            context,
            original: Arc::new(error),
        }
    }

    #[must_use]
    pub fn original_error(&self) -> &EngineError {
        &self.original
    }
}

/// Result type alias for classified engine operations.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_classification() {
        assert_eq!(
            classify_message("Connection refused by storaged"),
            ErrorKind::Connection
        );
        assert_eq!(classify_message("request Timeout"), ErrorKind::Connection);
        assert_eq!(
            classify_message("SyntaxError: syntax error near `FORM'"),
            ErrorKind::Syntax
        );
        assert_eq!(
            classify_message("Permission denied for user"),
            ErrorKind::Authorization
        );
        assert_eq!(
            classify_message("Bad username/password: Auth failed"),
            ErrorKind::Authorization
        );
        assert_eq!(
            classify_message("SpaceNotFound: space not found"),
            ErrorKind::NotFound
        );
        assert_eq!(classify_message("Existed: duplicate key"), ErrorKind::Conflict);
        assert_eq!(classify_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn structural_variants_skip_keyword_matching() {
        let c = KeywordClassifier;
        assert_eq!(c.classify(&EngineError::CircuitOpen), ErrorKind::Connection);
        assert_eq!(
            c.classify(&EngineError::Timeout(Duration::from_millis(5))),
            ErrorKind::Connection
        );
        assert_eq!(
            c.classify(&EngineError::Rejected("query must not be empty".into())),
            ErrorKind::Syntax
        );
        assert_eq!(
            c.classify(&EngineError::Driver(DriverError::new(-1005, "Storage Error: not found"))),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn transient_only_for_connection_family() {
        assert!(EngineError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(EngineError::Other("network is unreachable".into()).is_transient());
        assert!(!EngineError::Rejected("TRUNCATE is not allowed".into()).is_transient());
        assert!(!EngineError::Driver(DriverError::new(-1004, "SyntaxError")).is_transient());
    }

    #[test]
    fn query_error_keeps_original_and_context() {
        let long = "MATCH (v) RETURN v ".repeat(20);
        let err = QueryError::classify(
            &KeywordClassifier,
            EngineError::Driver(DriverError::new(-1009, "permission denied")),
            ErrorContext::new("QueryRunner", "execute")
                .with_query(&long)
                .with_parameters(true),
        );
        assert_eq!(err.kind, ErrorKind::Authorization);
        assert!(matches!(err.original_error(), EngineError::Driver(d) if d.code == -1009));
        assert!(err.context.has_parameters);
        assert!(err.context.query.as_ref().unwrap().chars().count() <= 103);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("AUTHORIZATION_ERROR"));
    }

    #[test]
    fn error_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND_ERROR\"");
    }
}
