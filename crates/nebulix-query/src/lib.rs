//! Query execution engine for nGQL-speaking graph databases.
//!
//! [`QueryRunner`] is the main entry point: it validates, interpolates and
//! caches statements, and runs them on pooled sessions behind a retry policy
//! and a circuit breaker. [`QueryPipeline`] and [`ParallelQueryExecutor`]
//! build on any [`QueryExecutor`].

pub mod batch;
pub mod breaker;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod escape;
pub mod events;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod monitor;
pub mod parallel;
pub mod pipeline;
pub mod query;
pub mod retry;
pub mod runner;
pub mod session;

pub use breaker::{CircuitBreaker, CircuitState};
pub use builder::QueryBuilder;
pub use cache::QueryCache;
pub use error::{EngineError, ErrorKind, QueryError};
pub use events::{EventBus, QueryEvent};
pub use parallel::{ParallelQueryExecutor, ParallelQueryTask};
pub use pipeline::QueryPipeline;
pub use query::{Params, Query, QueryOptions, QueryResult};
pub use runner::{QueryExecutor, QueryRunner};
pub use session::{Session, SessionManager};
