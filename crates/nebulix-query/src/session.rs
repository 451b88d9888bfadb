//! Narrow interface to the session pool and wire driver.
//!
//! The engine never opens connections itself: it borrows a [`Session`] from a
//! [`SessionManager`], runs one fully interpolated statement, and hands the
//! session back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{DriverError, EngineError};
use crate::query::RawResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One authenticated connection bound to a graph space.
pub trait Session: Send + Sync {
    fn id(&self) -> u64;

    /// Run a statement with all parameters already substituted.
    fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<RawResult, DriverError>>;
}

pub type SessionHandle = Arc<dyn Session>;

pub trait SessionManager: Send + Sync {
    /// Borrow a session scoped to `space`, or to the pool default when `None`.
    fn get_session<'a>(
        &'a self,
        space: Option<&'a str>,
    ) -> BoxFuture<'a, Result<SessionHandle, EngineError>>;

    /// Return a session to the pool. Called exactly once per acquired session.
    fn release_session(&self, session: SessionHandle) -> BoxFuture<'_, ()>;

    /// Mark a session as broken so the pool does not hand it out again.
    /// Followed by `release_session` for the same handle.
    fn invalidate_session<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, ()>;
}
