//! Asynchronous query execution against a remote SQL engine.
//!
//! A query is submitted, polled until it reaches a terminal state, and its
//! result set fetched page by page. [`QueryEngine`] is the wire contract;
//! [`QueryClient`] layers the polling policy and cancellation on top of it.

pub mod athena;
mod runner;
mod table;

pub use athena::AthenaEngine;
pub use runner::{QueryOutcome, QueryRunner};
pub use table::{TableDefinition, TableManager, TableStatus};

use async_trait::async_trait;
use rand::Rng;
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueryEngineConfig;
use crate::emit;
use crate::error::{PollCancelledSnafu, PollDeadlineSnafu, QueryError, QueryFailedSnafu};
use crate::metrics::events::{QueryCompleted, QueryPolled};

/// Opaque identifier of one query execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution state as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// A state this client does not know; treated as still in progress.
    Other(String),
}

impl QueryState {
    pub fn parse(state: &str) -> Self {
        match state {
            "QUEUED" => Self::Queued,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// The terminal state this maps to, if any.
    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            Self::Succeeded => Some(TerminalState::Succeeded),
            Self::Failed => Some(TerminalState::Failed),
            Self::Cancelled => Some(TerminalState::Cancelled),
            Self::Queued | Self::Running | Self::Other(_) => None,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("QUEUED"),
            Self::Running => f.write_str("RUNNING"),
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Cancelled => f.write_str("CANCELLED"),
            Self::Other(state) => f.write_str(state),
        }
    }
}

/// The three states an execution can finish in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalState {
    Succeeded,
    Failed,
    Cancelled,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status snapshot of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStatus {
    pub state: QueryState,
    /// Engine-supplied explanation, usually present on failure.
    pub reason: Option<String>,
}

/// One result row; missing values are empty strings.
pub type Row = Vec<String>;

/// One page of a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub rows: Vec<Row>,
    pub next_token: Option<String>,
}

/// Where and how submitted queries run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub database: String,
    pub output_location: String,
    pub workgroup: Option<String>,
}

/// Wire contract of a remote query engine.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit `query` and return without waiting for it to run.
    async fn start_execution(
        &self,
        query: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionId, QueryError>;

    /// Current status of an execution.
    async fn get_execution_status(&self, id: &ExecutionId) -> Result<ExecutionStatus, QueryError>;

    /// One page of results; `next_token` is `None` for the first page.
    async fn get_execution_results(
        &self,
        id: &ExecutionId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, QueryError>;
}

/// Backoff settings for [`QueryClient::await_completion`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Total time allowed before giving up.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            deadline: Duration::from_secs(900),
        }
    }
}

impl PollPolicy {
    /// Interval following `current`, capped at `max_interval`.
    ///
    /// Multipliers below 1.0 (or NaN) are treated as 1.0, so the interval
    /// never shrinks.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()))
    }
}

/// Adds up to 10% random jitter so concurrent waiters spread out.
fn with_jitter(interval: Duration) -> Duration {
    let max_jitter_ms = (interval.as_millis() / 10) as u64;
    if max_jitter_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}

/// Submit/poll/fetch client over a [`QueryEngine`].
#[derive(Clone)]
pub struct QueryClient {
    engine: Arc<dyn QueryEngine>,
    context: ExecutionContext,
    poll: PollPolicy,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("context", &self.context)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    pub fn new(engine: Arc<dyn QueryEngine>, context: ExecutionContext, poll: PollPolicy) -> Self {
        Self {
            engine,
            context,
            poll,
        }
    }

    /// Client for the configured HTTP engine.
    pub fn from_config(config: &QueryEngineConfig) -> Result<Self, QueryError> {
        let engine = AthenaEngine::from_config(config)?;
        Ok(Self::new(
            Arc::new(engine),
            ExecutionContext {
                database: config.database.clone(),
                output_location: config.output_location.clone(),
                workgroup: config.workgroup.clone(),
            },
            config.poll.policy(),
        ))
    }

    /// Submit a query for asynchronous execution.
    pub async fn submit(&self, query: &str) -> Result<ExecutionId, QueryError> {
        let id = self.engine.start_execution(query, &self.context).await?;
        debug!(execution_id = %id, database = %self.context.database, "Submitted query");
        Ok(id)
    }

    /// Poll until the execution reaches a terminal state.
    ///
    /// Waits grow from `initial_interval` to `max_interval`. Returns
    /// `PollDeadline` once the deadline passes without a terminal state and
    /// `PollCancelled` as soon as `cancel` fires.
    pub async fn await_completion(
        &self,
        id: &ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<TerminalState, QueryError> {
        let (terminal, _) = self.poll_until_terminal(id, cancel).await?;
        Ok(terminal)
    }

    async fn poll_until_terminal(
        &self,
        id: &ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<(TerminalState, Option<String>), QueryError> {
        let started = Instant::now();
        let mut interval = self.poll.initial_interval;

        loop {
            let status = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return PollCancelledSnafu { execution_id: id.to_string() }.fail();
                }
                status = self.engine.get_execution_status(id) => status?,
            };
            emit!(QueryPolled);

            if let Some(terminal) = status.state.terminal() {
                emit!(QueryCompleted {
                    state: terminal,
                    duration: started.elapsed(),
                });
                match (terminal, &status.reason) {
                    (TerminalState::Succeeded, _) => {
                        debug!(execution_id = %id, "Query succeeded")
                    }
                    (_, Some(reason)) => {
                        warn!(execution_id = %id, state = %terminal, reason = %reason, "Query did not succeed")
                    }
                    (_, None) => warn!(execution_id = %id, state = %terminal, "Query did not succeed"),
                }
                return Ok((terminal, status.reason));
            }

            let waited = started.elapsed();
            ensure!(
                waited < self.poll.deadline,
                PollDeadlineSnafu {
                    execution_id: id.to_string(),
                    waited,
                }
            );

            let sleep_for = with_jitter(interval).min(self.poll.deadline - waited);
            debug!(
                execution_id = %id,
                state = %status.state,
                "Query not finished, checking again in {}ms",
                sleep_for.as_millis()
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return PollCancelledSnafu { execution_id: id.to_string() }.fail();
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            interval = self.poll.next_interval(interval);
        }
    }

    /// Fetch every row of a finished execution, following continuation
    /// tokens until the engine reports no more pages.
    pub async fn fetch_results(&self, id: &ExecutionId) -> Result<Vec<Row>, QueryError> {
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .engine
                .get_execution_results(id, next_token.as_deref())
                .await?;
            pages += 1;
            rows.extend(page.rows);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(execution_id = %id, rows = rows.len(), pages, "Fetched query results");
        Ok(rows)
    }

    /// Submit, wait, and fetch. A terminal state other than SUCCEEDED is a
    /// `QueryFailed` error.
    pub async fn execute(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, QueryError> {
        let id = self.submit(query).await?;
        self.require_success(&id, cancel).await?;
        self.fetch_results(&id).await
    }

    /// Submit and wait without fetching; for statements with no result set.
    pub async fn execute_statement(
        &self,
        statement: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionId, QueryError> {
        let id = self.submit(statement).await?;
        self.require_success(&id, cancel).await?;
        info!(execution_id = %id, "Statement completed");
        Ok(id)
    }

    async fn require_success(
        &self,
        id: &ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<(), QueryError> {
        let (state, reason) = self.poll_until_terminal(id, cancel).await?;
        ensure!(
            state == TerminalState::Succeeded,
            QueryFailedSnafu {
                execution_id: id.to_string(),
                state,
                reason: reason.unwrap_or_default(),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory engine for unit tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// How a submitted query plays out.
    #[derive(Debug, Clone)]
    pub struct Script {
        /// States returned by successive status calls; the last one repeats.
        pub states: Vec<QueryState>,
        /// Result pages, in order.
        pub pages: Vec<Vec<Row>>,
    }

    impl Script {
        pub fn succeeds(rows: Vec<Row>) -> Self {
            Self {
                states: vec![QueryState::Running, QueryState::Succeeded],
                pages: vec![rows],
            }
        }

        pub fn ends(state: QueryState) -> Self {
            Self {
                states: vec![QueryState::Queued, state],
                pages: vec![],
            }
        }
    }

    #[derive(Default)]
    struct Inner {
        next_id: usize,
        submitted: Vec<String>,
        statuses: HashMap<String, VecDeque<QueryState>>,
        pages: HashMap<String, Vec<Vec<Row>>>,
        status_calls: usize,
    }

    /// Engine that answers from a per-query script.
    #[derive(Default)]
    pub struct ScriptedEngine {
        scripts: Mutex<VecDeque<Script>>,
        inner: Mutex<Inner>,
    }

    impl ScriptedEngine {
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                inner: Mutex::default(),
            }
        }

        pub fn submitted(&self) -> Vec<String> {
            self.inner.lock().unwrap().submitted.clone()
        }

        pub fn status_calls(&self) -> usize {
            self.inner.lock().unwrap().status_calls
        }
    }

    #[async_trait]
    impl QueryEngine for ScriptedEngine {
        async fn start_execution(
            &self,
            query: &str,
            _context: &ExecutionContext,
        ) -> Result<ExecutionId, QueryError> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Script::succeeds(vec![]));
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = format!("exec-{}", inner.next_id);
            inner.submitted.push(query.to_string());
            inner.statuses.insert(id.clone(), script.states.into());
            inner.pages.insert(id.clone(), script.pages);
            Ok(ExecutionId::new(id))
        }

        async fn get_execution_status(
            &self,
            id: &ExecutionId,
        ) -> Result<ExecutionStatus, QueryError> {
            let mut inner = self.inner.lock().unwrap();
            inner.status_calls += 1;
            let states = inner.statuses.get_mut(id.as_str()).unwrap();
            let state = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().cloned().unwrap()
            };
            let reason = matches!(state, QueryState::Failed).then(|| "scripted".to_string());
            Ok(ExecutionStatus { state, reason })
        }

        async fn get_execution_results(
            &self,
            id: &ExecutionId,
            next_token: Option<&str>,
        ) -> Result<ResultPage, QueryError> {
            let inner = self.inner.lock().unwrap();
            let pages = &inner.pages[id.as_str()];
            let index: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let rows = pages.get(index).cloned().unwrap_or_default();
            let next_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());
            Ok(ResultPage { rows, next_token })
        }
    }

    pub fn context() -> ExecutionContext {
        ExecutionContext {
            database: "default".to_string(),
            output_location: "s3://results/".to_string(),
            workgroup: None,
        }
    }

    pub fn fast_policy() -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(400),
            multiplier: 2.0,
            deadline: Duration::from_secs(60),
        }
    }

    pub fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }
}
