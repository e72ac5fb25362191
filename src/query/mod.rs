// Query module - query execution records and their state machine
// A query moves strictly forward: QUEUED -> STARTED -> RUNNING -> terminal.
// Terminal transitions move the record from queries_running to queries_finished
// and fold its metrics into the connection exactly once.

pub mod executor;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::{QueryResult, RecordBatch, ResultSchema};
use crate::connection::ConnectionState;
use crate::connectors::channel::QueryExecutionResponseStream;
use crate::error::Error;
use crate::sync::{AsyncValueTopic, CancelToken};

pub use executor::{QueryExecutor, QueryHandle};

/// Query identifier, unique within the process
pub type QueryId = u32;

/// Lifecycle status of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryExecutionStatus {
    Queued,
    Started,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryExecutionStatus {
    fn rank(self) -> u8 {
        match self {
            QueryExecutionStatus::Queued => 0,
            QueryExecutionStatus::Started => 1,
            QueryExecutionStatus::Running => 2,
            QueryExecutionStatus::Succeeded
            | QueryExecutionStatus::Failed
            | QueryExecutionStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` goes forward
    pub fn can_advance_to(self, next: QueryExecutionStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for QueryExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryExecutionStatus::Queued => "QUEUED",
            QueryExecutionStatus::Started => "STARTED",
            QueryExecutionStatus::Running => "RUNNING",
            QueryExecutionStatus::Succeeded => "SUCCEEDED",
            QueryExecutionStatus::Failed => "FAILED",
            QueryExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Who issued a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    #[default]
    User,
    CatalogInformationSchema,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryMetadata {
    pub query_type: QueryType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub issuer: Option<String>,
    pub user_provided: bool,
}

/// Parameters of a query execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExecutionArgs {
    pub query: String,
    #[serde(default)]
    pub analyze_results: bool,
    #[serde(default)]
    pub metadata: QueryMetadata,
}

impl QueryExecutionArgs {
    /// A user query with default metadata
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            analyze_results: false,
            metadata: QueryMetadata {
                user_provided: true,
                ..Default::default()
            },
        }
    }
}

/// Counters of a result stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryExecutionMetrics {
    pub total_batches_received: u64,
    pub total_rows_received: u64,
    pub total_data_bytes_received: u64,
    pub total_progress_updates_received: u64,
}

/// Progress notification of a running query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecutionProgress {
    /// Reported by backends that queue queries before running them
    pub is_queued: Option<bool>,
    pub status: QueryExecutionStatus,
    pub metrics: QueryExecutionMetrics,
}

/// Timings and counters of one query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMetrics {
    pub queued_at: Option<Instant>,
    pub started_at: Option<Instant>,
    pub running_at: Option<Instant>,
    pub first_batch_at: Option<Instant>,
    pub last_batch_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub last_updated_at: Option<Instant>,
    pub query_duration: Option<Duration>,
    pub stream: QueryExecutionMetrics,
}

impl QueryMetrics {
    pub fn time_until_first_batch(&self) -> Option<Duration> {
        let start = self.started_at.or(self.queued_at)?;
        Some(self.first_batch_at?.saturating_duration_since(start))
    }
}

/// Complete state of one query
#[derive(Clone)]
pub struct QueryExecutionState {
    pub query_id: QueryId,
    pub args: QueryExecutionArgs,
    pub status: QueryExecutionStatus,
    pub metrics: QueryMetrics,
    pub cancellation: CancelToken,
    /// Progress stream published by the pipeline
    pub progress: Arc<AsyncValueTopic<QueryExecutionProgress>>,
    pub latest_progress: Option<QueryExecutionProgress>,
    /// Present only while the query is running
    pub result_stream: Option<Arc<dyn QueryExecutionResponseStream>>,
    pub result_schema: Option<ResultSchema>,
    pub result: Option<Arc<QueryResult>>,
    pub error: Option<Arc<Error>>,
}

impl QueryExecutionState {
    /// A freshly queued query
    pub fn queued(query_id: QueryId, args: QueryExecutionArgs, cancellation: CancelToken) -> Self {
        let now = Instant::now();
        Self {
            query_id,
            args,
            status: QueryExecutionStatus::Queued,
            metrics: QueryMetrics {
                queued_at: Some(now),
                last_updated_at: Some(now),
                ..Default::default()
            },
            cancellation,
            progress: Arc::new(AsyncValueTopic::new()),
            latest_progress: None,
            result_stream: None,
            result_schema: None,
            result: None,
            error: None,
        }
    }

    /// Current progress as published to subscribers
    pub fn progress_snapshot(&self) -> QueryExecutionProgress {
        QueryExecutionProgress {
            is_queued: self.latest_progress.as_ref().and_then(|p| p.is_queued),
            status: self.status,
            metrics: self.metrics.stream,
        }
    }
}

impl fmt::Debug for QueryExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutionState")
            .field("query_id", &self.query_id)
            .field("query", &self.args.query)
            .field("status", &self.status)
            .field("metrics", &self.metrics)
            .field("error", &self.error)
            .finish()
    }
}

/// Transitions of a query
pub enum QueryAction {
    Submitted(QueryExecutionState),
    Started(QueryId),
    Running(QueryId, Arc<dyn QueryExecutionResponseStream>),
    ProgressUpdated(QueryId, QueryExecutionProgress),
    ReceivedBatch(QueryId, Arc<RecordBatch>),
    Succeeded(QueryId, Arc<QueryResult>),
    Failed(QueryId, Arc<Error>),
    Cancelled(QueryId),
}

impl fmt::Debug for QueryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryAction::Submitted(state) => f.debug_tuple("Submitted").field(&state.query_id).finish(),
            QueryAction::Started(id) => f.debug_tuple("Started").field(id).finish(),
            QueryAction::Running(id, _) => f.debug_tuple("Running").field(id).finish(),
            QueryAction::ProgressUpdated(id, progress) => {
                f.debug_tuple("ProgressUpdated").field(id).field(progress).finish()
            }
            QueryAction::ReceivedBatch(id, batch) => {
                f.debug_tuple("ReceivedBatch").field(id).field(&batch.num_rows()).finish()
            }
            QueryAction::Succeeded(id, _) => f.debug_tuple("Succeeded").field(id).finish(),
            QueryAction::Failed(id, error) => f.debug_tuple("Failed").field(id).field(error).finish(),
            QueryAction::Cancelled(id) => f.debug_tuple("Cancelled").field(id).finish(),
        }
    }
}

/// Apply a query action to a connection.
/// Returns None for unknown queries, backward transitions and repeated
/// terminal transitions.
pub fn reduce_query_action(state: &ConnectionState, action: QueryAction) -> Option<ConnectionState> {
    let now = Instant::now();
    let action = match action {
        QueryAction::Submitted(query) => {
            if state.query(query.query_id).is_some() {
                return None;
            }
            let mut next = state.clone();
            next.queries_running.insert(query.query_id, Arc::new(query));
            return Some(next);
        }
        other => other,
    };

    let query_id = match &action {
        QueryAction::Submitted(_) => return None,
        QueryAction::Started(id)
        | QueryAction::Running(id, _)
        | QueryAction::ProgressUpdated(id, _)
        | QueryAction::ReceivedBatch(id, _)
        | QueryAction::Succeeded(id, _)
        | QueryAction::Failed(id, _)
        | QueryAction::Cancelled(id) => *id,
    };
    let current = state.queries_running.get(&query_id)?;
    let mut query = QueryExecutionState::clone(current);
    query.metrics.last_updated_at = Some(now);

    let terminal = match action {
        QueryAction::Submitted(_) => return None,
        QueryAction::Started(_) => {
            if !query.status.can_advance_to(QueryExecutionStatus::Started) {
                return None;
            }
            query.status = QueryExecutionStatus::Started;
            query.metrics.started_at = Some(now);
            None
        }
        QueryAction::Running(_, stream) => {
            if !query.status.can_advance_to(QueryExecutionStatus::Running) {
                return None;
            }
            query.status = QueryExecutionStatus::Running;
            query.metrics.running_at = Some(now);
            query.result_stream = Some(stream);
            None
        }
        QueryAction::ProgressUpdated(_, progress) => {
            query.metrics.stream.total_progress_updates_received += 1;
            query.latest_progress = Some(progress);
            None
        }
        QueryAction::ReceivedBatch(_, batch) => {
            if query.status != QueryExecutionStatus::Running {
                return None;
            }
            if query.metrics.first_batch_at.is_none() {
                query.metrics.first_batch_at = Some(now);
            }
            query.metrics.last_batch_at = Some(now);
            query.metrics.stream.total_batches_received += 1;
            query.metrics.stream.total_rows_received += batch.num_rows() as u64;
            query.metrics.stream.total_data_bytes_received += batch.byte_size() as u64;
            if query.result_schema.is_none() {
                query.result_schema = Some(batch.schema.clone());
            }
            None
        }
        QueryAction::Succeeded(_, result) => {
            query.result = Some(result);
            Some(QueryExecutionStatus::Succeeded)
        }
        QueryAction::Failed(_, error) => {
            query.error = Some(error);
            Some(QueryExecutionStatus::Failed)
        }
        QueryAction::Cancelled(_) => Some(QueryExecutionStatus::Cancelled),
    };

    let mut next = state.clone();
    match terminal {
        None => {
            next.queries_running.insert(query_id, Arc::new(query));
        }
        Some(status) => {
            query.status = status;
            query.result_stream = None;
            query.metrics.finished_at = Some(now);
            query.metrics.query_duration = query
                .metrics
                .queued_at
                .map(|queued| now.saturating_duration_since(queued));
            next.metrics = state.metrics.fold(status, &query.metrics);
            next.queries_running.remove(&query_id);
            next.queries_finished.insert(query_id, Arc::new(query));
        }
    }
    Some(next)
}

/// Summary of a query for history listings
pub fn describe_query(query: &QueryExecutionState) -> String {
    let mut line = format!(
        "#{} {} rows={} batches={}",
        query.query_id, query.status, query.metrics.stream.total_rows_received, query.metrics.stream.total_batches_received
    );
    if let Some(duration) = query.metrics.query_duration {
        line.push_str(&format!(" time={:?}", duration));
    }
    if let Some(error) = &query.error {
        line.push_str(&format!(" error=\"{}\"", error));
    }
    let text: String = query.args.query.chars().take(60).collect();
    line.push_str(&format!(" | {}", text));
    line
}
