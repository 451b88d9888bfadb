//! In-memory session manager for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::error::{DriverError, EngineError};
use crate::query::RawResult;
use crate::session::{BoxFuture, Session, SessionHandle, SessionManager};

type Scripted = Result<RawResult, DriverError>;

#[derive(Debug, Default)]
struct Responses {
    /// Consumed front to back, one per execution, before any other rule.
    script: VecDeque<Scripted>,
    /// `(substring, outcome)`: first rule whose substring occurs in the statement wins.
    rules: Vec<(String, Scripted)>,
    default_result: Option<RawResult>,
    echo: bool,
}

/// Session manager whose sessions answer from a script.
///
/// Counters are public so tests can assert on how the engine used the pool.
#[derive(Debug, Clone)]
pub struct MockSessionManager {
    responses: Arc<Mutex<Responses>>,
    statements: Arc<Mutex<Vec<String>>>,
    spaces: Arc<Mutex<Vec<Option<String>>>>,
    delay: Duration,
    fail_acquire: bool,
    next_id: Arc<AtomicU64>,
    pub executions: Arc<AtomicUsize>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub invalidated: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
}

impl Default for MockSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Responses::default())),
            statements: Arc::new(Mutex::new(Vec::new())),
            spaces: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            fail_acquire: false,
            next_id: Arc::new(AtomicU64::new(1)),
            executions: Arc::new(AtomicUsize::new(0)),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            invalidated: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Result returned when no script entry or rule applies.
    #[must_use]
    pub fn with_default_result(self, result: RawResult) -> Self {
        self.responses.lock().unwrap().default_result = Some(result);
        self
    }

    /// Answer every unscripted statement with one row `{statement: <text>}`.
    #[must_use]
    pub fn with_echo(self) -> Self {
        self.responses.lock().unwrap().echo = true;
        self
    }

    /// Sleep this long inside every `Session::execute`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every `get_session` call fail.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub fn push_result(&self, result: RawResult) {
        self.responses.lock().unwrap().script.push_back(Ok(result));
    }

    pub fn push_failure(&self, error: DriverError) {
        self.responses.lock().unwrap().script.push_back(Err(error));
    }

    /// Answer statements containing `needle` with `result`.
    pub fn respond_to(&self, needle: impl Into<String>, result: RawResult) {
        self.responses
            .lock()
            .unwrap()
            .rules
            .push((needle.into(), Ok(result)));
    }

    /// Fail statements containing `needle` with `error`, every time.
    pub fn fail_on(&self, needle: impl Into<String>, error: DriverError) {
        self.responses
            .lock()
            .unwrap()
            .rules
            .push((needle.into(), Err(error)));
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Space argument of every `get_session` call, in order.
    #[must_use]
    pub fn spaces(&self) -> Vec<Option<String>> {
        self.spaces.lock().unwrap().clone()
    }

    fn respond(&self, statement: &str) -> Scripted {
        let mut responses = self.responses.lock().unwrap();
        if let Some(next) = responses.script.pop_front() {
            return next;
        }
        if let Some((_, outcome)) = responses
            .rules
            .iter()
            .find(|(needle, _)| statement.contains(needle.as_str()))
        {
            return outcome.clone();
        }
        if responses.echo {
            return Ok(RawResult::new(
                vec!["statement".into()],
                vec![vec![json!(statement)]],
            ));
        }
        Ok(responses.default_result.clone().unwrap_or_default())
    }
}

struct MockSession {
    id: u64,
    manager: MockSessionManager,
}

impl Session for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<RawResult, DriverError>> {
        Box::pin(async move {
            let m = &self.manager;
            let now = m.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            m.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            m.executions.fetch_add(1, Ordering::SeqCst);
            m.statements.lock().unwrap().push(statement.to_owned());

            if !m.delay.is_zero() {
                tokio::time::sleep(m.delay).await;
            }
            let outcome = m.respond(statement);
            m.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}

impl SessionManager for MockSessionManager {
    fn get_session<'a>(
        &'a self,
        space: Option<&'a str>,
    ) -> BoxFuture<'a, Result<SessionHandle, EngineError>> {
        Box::pin(async move {
            self.spaces.lock().unwrap().push(space.map(str::to_owned));
            if self.fail_acquire {
                return Err(EngineError::SessionUnavailable("connection pool exhausted".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let session: SessionHandle = Arc::new(MockSession {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                manager: self.clone(),
            });
            Ok(session)
        })
    }

    fn release_session(&self, _session: SessionHandle) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.released.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn invalidate_session<'a>(&'a self, _session: &'a SessionHandle) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        })
    }
}
