//! Concurrent, dependency-aware execution of query tasks.
//!
//! Tasks are ordered by priority, then topologically by their declared
//! dependencies, and run with at most `max_concurrency` in flight. A task
//! starts only after every task it depends on has settled. One task failing
//! never fails the batch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::ParallelConfig;
use crate::error::{EngineError, ErrorContext, KeywordClassifier, QueryError};
use crate::events::{EventBus, QueryEvent};
use crate::query::{Params, QueryOptions, QueryResult};
use crate::runner::QueryExecutor;

const COMPONENT: &str = "ParallelQueryExecutor";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelQueryTask {
    pub id: String,
    pub query: String,
    pub parameters: Params,
    pub options: QueryOptions,
    /// Higher runs first.
    pub priority: i32,
    pub dependencies: Vec<String>,
}

impl ParallelQueryTask {
    #[must_use]
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_params(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ParallelQueryResult {
    pub task_id: String,
    pub result: Option<QueryResult>,
    pub error: Option<QueryError>,
    pub execution_time: Duration,
    pub start_time: Instant,
    pub end_time: Instant,
    pub attempts: u32,
}

impl ParallelQueryResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NotFound,
}

#[derive(Debug, Default)]
struct Registry {
    pending: HashSet<String>,
    running: HashSet<String>,
    completed: HashSet<String>,
    failed: HashSet<String>,
}

impl Registry {
    fn start(&mut self, id: &str) {
        self.pending.remove(id);
        self.running.insert(id.to_owned());
    }

    fn finish(&mut self, id: &str, success: bool) {
        self.running.remove(id);
        if success {
            self.failed.remove(id);
            self.completed.insert(id.to_owned());
        } else {
            self.completed.remove(id);
            self.failed.insert(id.to_owned());
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    batches: u64,
    total_tasks: u64,
    completed_tasks: u64,
    failed_tasks: u64,
    retries: u64,
    total_task_time: Duration,
    peak_concurrency: usize,
    last_throughput: f64,
    last_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParallelStats {
    pub batches: u64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retries: u64,
    pub average_task_time: Duration,
    pub peak_concurrency: usize,
    pub max_concurrency: usize,
    /// Tasks per second over the last batch.
    pub throughput: f64,
    /// Busy task time over `wall time * max_concurrency` for the last batch.
    pub utilization: f64,
    pub running_tasks: usize,
}

/// Order tasks for execution and compute the dependencies each must wait on.
///
/// Returns indices into `tasks` in run order, paired with the indices each
/// one waits for. Tasks whose dependencies are unknown or cyclic come last
/// and wait only on tasks that resolved cleanly.
fn schedule(tasks: &[ParallelQueryTask], resolve: bool) -> Vec<(usize, Vec<usize>)> {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by(|a, b| tasks[*b].priority.cmp(&tasks[*a].priority));

    if !resolve {
        return order.into_iter().map(|i| (i, Vec::new())).collect();
    }

    let index_of: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut unresolved = Vec::new();
    let mut remaining = Vec::new();
    for i in order {
        if let Some(missing) = tasks[i]
            .dependencies
            .iter()
            .find(|d| !index_of.contains_key(d.as_str()))
        {
            tracing::warn!(task = %tasks[i].id, dependency = %missing, "unknown dependency, task runs last");
            unresolved.push(i);
        } else {
            remaining.push(i);
        }
    }

    let mut resolved: Vec<usize> = Vec::with_capacity(tasks.len());
    let mut resolved_ids: HashSet<&str> = HashSet::new();
    loop {
        let before = remaining.len();
        remaining.retain(|&i| {
            let ready = tasks[i]
                .dependencies
                .iter()
                .all(|d| resolved_ids.contains(d.as_str()));
            if ready {
                resolved.push(i);
                resolved_ids.insert(tasks[i].id.as_str());
            }
            !ready
        });
        if remaining.is_empty() || remaining.len() == before {
            break;
        }
    }

    if !remaining.is_empty() {
        let ids: Vec<&str> = remaining.iter().map(|&i| tasks[i].id.as_str()).collect();
        tracing::warn!(tasks = ?ids, "dependency cycle detected, tasks run last");
        unresolved.extend(remaining);
    }

    let waits_for = |i: usize, strict: bool| -> Vec<usize> {
        tasks[i]
            .dependencies
            .iter()
            .filter(|d| strict || resolved_ids.contains(d.as_str()))
            .filter_map(|d| index_of.get(d.as_str()).copied())
            .filter(|&d| d != i)
            .collect()
    };

    resolved
        .iter()
        .map(|&i| (i, waits_for(i, true)))
        .chain(unresolved.iter().map(|&i| (i, waits_for(i, false))))
        .collect()
}

struct TaskRuntime {
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<Mutex<Registry>>,
    events: EventBus,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TaskRuntime {
    fn timeout_error(&self, task: &ParallelQueryTask) -> QueryError {
        QueryError::classify(
            &KeywordClassifier,
            EngineError::Timeout(self.timeout),
            ErrorContext::new(COMPONENT, "executeTask")
                .with_query(&task.query)
                .with_parameters(!task.parameters.is_empty()),
        )
    }

    async fn run(&self, task: ParallelQueryTask) -> ParallelQueryResult {
        lock(&self.registry).start(&task.id);
        let start_time = Instant::now();
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let attempt = tokio::time::timeout(
                self.timeout,
                self.executor
                    .run_query(&task.query, &task.parameters, &task.options),
            )
            .await
            .unwrap_or_else(|_| Err(self.timeout_error(&task)));

            match attempt {
                Ok(result) => break Ok(result),
                Err(e) if attempts < self.max_attempts => {
                    tracing::warn!(
                        task = %task.id,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "task failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let end_time = Instant::now();
        let execution_time = end_time - start_time;
        lock(&self.registry).finish(&task.id, outcome.is_ok());

        match outcome {
            Ok(result) => {
                self.events.emit(QueryEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    execution_time,
                    attempts,
                });
                ParallelQueryResult {
                    task_id: task.id,
                    result: Some(result),
                    error: None,
                    execution_time,
                    start_time,
                    end_time,
                    attempts,
                }
            }
            Err(error) => {
                tracing::warn!(task = %task.id, attempts, error = %error, "task failed");
                self.events.emit(QueryEvent::TaskFailed {
                    task_id: task.id.clone(),
                    message: error.to_string(),
                    attempts,
                });
                ParallelQueryResult {
                    task_id: task.id,
                    result: None,
                    error: Some(error),
                    execution_time,
                    start_time,
                    end_time,
                    attempts,
                }
            }
        }
    }
}

/// What is known about a spawned task if it never reports back.
struct Launched {
    index: usize,
    task_id: String,
    query: String,
    has_parameters: bool,
    start_time: Instant,
}

impl TaskRuntime {
    /// Failed result for a task whose future panicked or was cancelled.
    fn abandoned(&self, launched: Launched, cause: &tokio::task::JoinError) -> ParallelQueryResult {
        let end_time = Instant::now();
        let error = QueryError::classify(
            &KeywordClassifier,
            EngineError::Other(format!("task aborted: {cause}")),
            ErrorContext::new(COMPONENT, "executeTask")
                .with_query(&launched.query)
                .with_parameters(launched.has_parameters),
        );
        lock(&self.registry).finish(&launched.task_id, false);
        tracing::error!(task = %launched.task_id, error = %cause, "parallel task aborted");
        self.events.emit(QueryEvent::TaskFailed {
            task_id: launched.task_id.clone(),
            message: error.to_string(),
            attempts: 1,
        });
        ParallelQueryResult {
            task_id: launched.task_id,
            result: None,
            error: Some(error),
            execution_time: end_time - launched.start_time,
            start_time: launched.start_time,
            end_time,
            attempts: 1,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ParallelQueryExecutor {
    config: ParallelConfig,
    executor: Arc<dyn QueryExecutor>,
    events: EventBus,
    registry: Arc<Mutex<Registry>>,
    counters: Mutex<Counters>,
}

impl ParallelQueryExecutor {
    #[must_use]
    pub fn new(config: ParallelConfig, executor: Arc<dyn QueryExecutor>, events: EventBus) -> Self {
        Self {
            config,
            executor,
            events,
            registry: Arc::new(Mutex::new(Registry::default())),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn runtime(&self) -> Arc<TaskRuntime> {
        let max_attempts = if self.config.retry_failed_tasks {
            self.config.max_retries.saturating_add(1)
        } else {
            1
        };
        Arc::new(TaskRuntime {
            executor: Arc::clone(&self.executor),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            timeout: self.config.timeout(),
            max_attempts,
            retry_delay: self.config.retry_delay(),
        })
    }

    /// Run every task and return one result per task, in input order.
    ///
    /// Never fails as a whole: inspect each result's `error`.
    pub async fn execute_parallel(&self, tasks: Vec<ParallelQueryTask>) -> Vec<ParallelQueryResult> {
        let batch_start = Instant::now();
        let max_concurrency = self.config.max_concurrency.max(1);
        let plan = schedule(&tasks, self.config.enable_dependency_resolution);
        {
            let mut reg = lock(&self.registry);
            for t in &tasks {
                reg.pending.insert(t.id.clone());
            }
        }
        tracing::info!(tasks = tasks.len(), max_concurrency, "parallel batch started");

        let runtime = self.runtime();
        let mut slots: Vec<Option<ParallelQueryTask>> = tasks.into_iter().map(Some).collect();
        let mut results: Vec<Option<ParallelQueryResult>> = vec![None; slots.len()];
        let mut settled = vec![false; slots.len()];
        let mut queue = plan;
        let mut in_flight: JoinSet<ParallelQueryResult> = JoinSet::new();
        let mut launched: HashMap<tokio::task::Id, Launched> = HashMap::new();
        let mut peak = 0;

        while !queue.is_empty() || !in_flight.is_empty() {
            // Nothing running and nothing ready: start the head to make progress.
            let stalled = in_flight.is_empty()
                && !queue
                    .iter()
                    .any(|(_, deps)| deps.iter().all(|&d| settled[d]));
            let mut i = 0;
            while i < queue.len() && in_flight.len() < max_concurrency {
                let ready = queue[i].1.iter().all(|&d| settled[d]);
                if ready || (stalled && i == 0 && in_flight.is_empty()) {
                    let (index, _) = queue.remove(i);
                    if let Some(task) = slots[index].take() {
                        let info = Launched {
                            index,
                            task_id: task.id.clone(),
                            query: task.query.clone(),
                            has_parameters: !task.parameters.is_empty(),
                            start_time: Instant::now(),
                        };
                        let rt = Arc::clone(&runtime);
                        let handle = in_flight.spawn(async move { rt.run(task).await });
                        launched.insert(handle.id(), info);
                        peak = peak.max(in_flight.len());
                    }
                } else {
                    i += 1;
                }
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                continue;
            };
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(info) = launched.remove(&id) else {
                continue;
            };
            let index = info.index;
            let result = match outcome {
                Ok(result) => result,
                Err(e) => runtime.abandoned(info, &e),
            };
            settled[index] = true;
            results[index] = Some(result);
        }

        let wall = batch_start.elapsed();
        let results: Vec<ParallelQueryResult> = results.into_iter().flatten().collect();
        self.record_batch(&results, wall, peak, max_concurrency);
        results
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_batch(&self, results: &[ParallelQueryResult], wall: Duration, peak: usize, max_concurrency: usize) {
        let busy: Duration = results.iter().map(|r| r.execution_time).sum();
        let completed = results.iter().filter(|r| r.is_success()).count() as u64;
        let failed = results.len() as u64 - completed;
        let retries: u64 = results
            .iter()
            .map(|r| u64::from(r.attempts.saturating_sub(1)))
            .sum();

        let wall_secs = wall.as_secs_f64();
        let (throughput, utilization) = if wall_secs > 0.0 {
            (
                results.len() as f64 / wall_secs,
                busy.as_secs_f64() / (wall_secs * max_concurrency as f64),
            )
        } else {
            (0.0, 0.0)
        };

        let mut c = lock(&self.counters);
        c.batches += 1;
        c.total_tasks += results.len() as u64;
        c.completed_tasks += completed;
        c.failed_tasks += failed;
        c.retries += retries;
        c.total_task_time += busy;
        c.peak_concurrency = c.peak_concurrency.max(peak);
        c.last_throughput = throughput;
        c.last_utilization = utilization;

        tracing::info!(
            tasks = results.len(),
            completed,
            failed,
            wall_ms = u64::try_from(wall.as_millis()).unwrap_or(u64::MAX),
            throughput,
            utilization,
            "parallel batch finished"
        );
    }

    #[must_use]
    pub fn get_task_status(&self, id: &str) -> TaskStatus {
        let reg = lock(&self.registry);
        if reg.running.contains(id) {
            TaskStatus::Running
        } else if reg.pending.contains(id) {
            TaskStatus::Pending
        } else if reg.failed.contains(id) {
            TaskStatus::Failed
        } else if reg.completed.contains(id) {
            TaskStatus::Completed
        } else {
            TaskStatus::NotFound
        }
    }

    /// Forget completed and failed task ids.
    pub fn clear_history(&self) {
        let mut reg = lock(&self.registry);
        reg.completed.clear();
        reg.failed.clear();
    }

    #[must_use]
    pub fn get_stats(&self) -> ParallelStats {
        let running_tasks = lock(&self.registry).running.len();
        let c = lock(&self.counters);
        let average_task_time = u32::try_from(c.total_tasks)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| c.total_task_time / n);
        ParallelStats {
            batches: c.batches,
            total_tasks: c.total_tasks,
            completed_tasks: c.completed_tasks,
            failed_tasks: c.failed_tasks,
            retries: c.retries,
            average_task_time,
            peak_concurrency: c.peak_concurrency,
            max_concurrency: self.config.max_concurrency,
            throughput: c.last_throughput,
            utilization: c.last_utilization,
            running_tasks,
        }
    }
}
