// Query Executor
// This module runs queries against the connections of a registry. Submission is
// synchronous: the connection is validated and the query is recorded as QUEUED
// before any I/O. The rest runs on a spawned task that streams batches and
// progress updates, observes cancellation and records the terminal status.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    QueryAction, QueryExecutionArgs, QueryExecutionProgress, QueryExecutionState, QueryId,
};
use crate::batch::{QueryResult, RecordBatch, ResultSchema};
use crate::config::QueryConfig;
use crate::connection::{ConnectionAction, ConnectionId, ConnectionRegistry};
use crate::connectors::{self, QueryExecutionResponseStream, QueryTask};
use crate::error::{Error, Result, SharedError};
use crate::sync::{AsyncValueTopic, CancelToken, StatePromise};

static NEXT_QUERY_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide unique query id
pub fn next_query_id() -> QueryId {
    NEXT_QUERY_ID.fetch_add(1, Ordering::SeqCst)
}

/// The caller's view of a submitted query
#[derive(Clone)]
pub struct QueryHandle {
    pub connection_id: ConnectionId,
    pub query_id: QueryId,
    /// Progress of the query. Closed once the query is finished.
    pub progress: Arc<AsyncValueTopic<QueryExecutionProgress>>,
    pub cancellation: CancelToken,
    result: Arc<StatePromise<Arc<QueryResult>, SharedError>>,
}

impl QueryHandle {
    /// Request cancellation. Batches that arrive afterwards are not delivered.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Wait for the collected result
    pub async fn wait(&self) -> std::result::Result<Arc<QueryResult>, SharedError> {
        self.result.wait().await
    }

    /// Promise of the collected result
    pub fn result(&self) -> &Arc<StatePromise<Arc<QueryResult>, SharedError>> {
        &self.result
    }
}

/// Runs queries on registered connections
pub struct QueryExecutor {
    registry: Arc<ConnectionRegistry>,
    /// Finished queries kept per connection
    max_finished_queries: usize,
}

impl QueryExecutor {
    /// Create a new executor on top of a registry
    pub fn new(registry: Arc<ConnectionRegistry>, config: &QueryConfig) -> Self {
        Self {
            registry,
            max_finished_queries: config.max_finished_queries,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Submit a query.
    /// Fails synchronously if the connection is unknown, has no channel or is
    /// not online; such a query is still recorded as FAILED. Otherwise the
    /// query is streamed on a spawned task, so this must be called from
    /// within a tokio runtime.
    pub fn execute(
        &self,
        connection_id: ConnectionId,
        args: QueryExecutionArgs,
    ) -> std::result::Result<QueryHandle, SharedError> {
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| Arc::new(Error::UnknownConnection(connection_id)))?;

        let query_id = next_query_id();
        let cancellation = CancelToken::new();
        let query = QueryExecutionState::queued(query_id, args.clone(), cancellation.clone());
        let progress = Arc::clone(&query.progress);
        let handle = QueryHandle {
            connection_id,
            query_id,
            progress,
            cancellation,
            result: Arc::new(StatePromise::new()),
        };
        self.apply(&handle, QueryAction::Submitted(query));

        let prepared = connectors::prepare_query(&connection.details, &args).and_then(|task| {
            if connection.is_online() {
                Ok(task)
            } else {
                Err(Error::HealthCheck(format!(
                    "connection {} is not online",
                    connection_id
                )))
            }
        });
        let task = match prepared {
            Ok(task) => task,
            Err(e) => {
                warn!(connection_id, query_id, error = %e, "Query rejected");
                let e = Arc::new(e);
                self.apply(&handle, QueryAction::Failed(query_id, Arc::clone(&e)));
                handle.result.reject(Arc::clone(&e));
                handle.progress.close();
                return Err(e);
            }
        };

        info!(connection_id, query_id, connector = %task.connector, "Query submitted");
        let registry = Arc::clone(&self.registry);
        let keep = self.max_finished_queries;
        let running = handle.clone();
        tokio::spawn(async move {
            run_query(&registry, &running, task).await;
            registry.dispatch(connection_id, ConnectionAction::PruneFinishedQueries(keep));
        });
        Ok(handle)
    }

    /// Submit a query and wait for its result
    pub async fn execute_and_wait(
        &self,
        connection_id: ConnectionId,
        args: QueryExecutionArgs,
    ) -> std::result::Result<Arc<QueryResult>, SharedError> {
        self.execute(connection_id, args)?.wait().await
    }

    /// Run a query from the history again with the same arguments
    pub fn retry(
        &self,
        connection_id: ConnectionId,
        query_id: QueryId,
    ) -> std::result::Result<QueryHandle, SharedError> {
        let args = self
            .registry
            .get(connection_id)
            .and_then(|state| state.query(query_id).map(|q| q.args.clone()))
            .ok_or_else(|| Arc::new(Error::Query(format!("unknown query {}", query_id))))?;
        self.execute(connection_id, args)
    }

    /// Cancel a running query. Returns false if it is not running.
    pub fn cancel(&self, connection_id: ConnectionId, query_id: QueryId) -> bool {
        let Some(state) = self.registry.get(connection_id) else {
            return false;
        };
        match state.queries_running.get(&query_id) {
            Some(query) => {
                debug!(connection_id, query_id, "Cancelling query");
                query.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    fn apply(&self, handle: &QueryHandle, action: QueryAction) {
        apply(&self.registry, handle, action);
    }
}

/// Dispatch a query action and publish the resulting progress
fn apply(registry: &ConnectionRegistry, handle: &QueryHandle, action: QueryAction) {
    if let Some(state) = registry.dispatch(handle.connection_id, action) {
        if let Some(query) = state.query(handle.query_id) {
            handle.progress.publish(query.progress_snapshot());
        }
    }
}

async fn run_query(registry: &ConnectionRegistry, handle: &QueryHandle, task: QueryTask) {
    let connection_id = handle.connection_id;
    let query_id = handle.query_id;
    apply(registry, handle, QueryAction::Started(query_id));

    match stream_query(registry, handle, &task).await {
        Ok(result) => {
            info!(connection_id, query_id, rows = result.num_rows(), "Query succeeded");
            apply(registry, handle, QueryAction::Succeeded(query_id, Arc::clone(&result)));
            handle.result.resolve(result);
        }
        Err(e) if e.is_cancellation() => {
            info!(connection_id, query_id, "Query cancelled");
            apply(registry, handle, QueryAction::Cancelled(query_id));
            handle.result.reject(Arc::new(e));
        }
        Err(e) => {
            warn!(connection_id, query_id, error = %e, "Query failed");
            let e = Arc::new(e);
            apply(registry, handle, QueryAction::Failed(query_id, Arc::clone(&e)));
            handle.result.reject(e);
        }
    }
    handle.progress.close();
}

async fn stream_query(
    registry: &ConnectionRegistry,
    handle: &QueryHandle,
    task: &QueryTask,
) -> Result<Arc<QueryResult>> {
    let cancel = &handle.cancellation;
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        stream = connectors::execute_query(task, cancel.clone()) => stream?,
    };
    apply(registry, handle, QueryAction::Running(handle.query_id, Arc::clone(&stream)));

    // Progress updates are consumed next to the batches and dropped once the
    // batches are done
    let batches = read_batches(registry, handle, stream.as_ref());
    let updates = read_progress(registry, handle, stream.as_ref());
    tokio::pin!(batches, updates);
    let mut updates_done = false;
    loop {
        tokio::select! {
            result = &mut batches => {
                let (schema, batches) = result?;
                return Ok(Arc::new(QueryResult {
                    schema,
                    batches,
                    metadata: stream.metadata(),
                }));
            }
            _ = &mut updates, if !updates_done => updates_done = true,
        }
    }
}

async fn read_batches(
    registry: &ConnectionRegistry,
    handle: &QueryHandle,
    stream: &dyn QueryExecutionResponseStream,
) -> Result<(Option<ResultSchema>, Vec<RecordBatch>)> {
    let cancel = &handle.cancellation;
    let mut schema = None;
    let mut batches = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            batch = stream.next_batch() => batch?,
        };
        let Some(batch) = next else {
            break;
        };
        // A batch that raced with the cancellation is dropped
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if schema.is_none() {
            schema = Some(batch.schema.clone());
        }
        apply(
            registry,
            handle,
            QueryAction::ReceivedBatch(handle.query_id, Arc::new(batch.clone())),
        );
        batches.push(batch);
    }
    Ok((schema, batches))
}

async fn read_progress(
    registry: &ConnectionRegistry,
    handle: &QueryHandle,
    stream: &dyn QueryExecutionResponseStream,
) {
    loop {
        match stream.next_progress_update().await {
            Ok(Some(update)) => apply(
                registry,
                handle,
                QueryAction::ProgressUpdated(handle.query_id, update),
            ),
            Ok(None) => return,
            Err(e) => {
                debug!(query_id = handle.query_id, error = %e, "Progress stream ended");
                return;
            }
        }
    }
}
