// Channel traits
// A channel is the open transport to one backend. Every connector that can run
// queries provides an implementation of `DatabaseChannel`, and every query it
// starts is observed through a `QueryExecutionResponseStream`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::batch::RecordBatch;
use crate::connection::ConnectionParams;
use crate::error::Result;
use crate::query::{QueryExecutionArgs, QueryExecutionProgress, QueryExecutionStatus};
use crate::sync::CancelToken;

/// An open transport to a database backend
#[async_trait]
pub trait DatabaseChannel: Send + Sync {
    /// Probe the backend. Resolves Ok if it is reachable and healthy.
    async fn check_health(&self) -> Result<()>;

    /// Start a query. Fails if the backend refuses to start it; failures after
    /// the start are reported through the returned stream.
    async fn execute_query(
        &self,
        args: &QueryExecutionArgs,
        cancel: CancelToken,
    ) -> Result<Arc<dyn QueryExecutionResponseStream>>;

    /// Close the channel. Outstanding streams fail afterwards.
    async fn close(&self) -> Result<()>;
}

/// The result stream of one running query
#[async_trait]
pub trait QueryExecutionResponseStream: Send + Sync {
    /// Status as last reported by the backend
    fn status(&self) -> QueryExecutionStatus;

    /// Backend-provided metadata of the result
    fn metadata(&self) -> HashMap<String, String>;

    /// Next progress update. Resolves None once no more updates will arrive.
    async fn next_progress_update(&self) -> Result<Option<QueryExecutionProgress>>;

    /// Next result batch. Resolves None at the end of the result.
    async fn next_batch(&self) -> Result<Option<RecordBatch>>;
}

/// Opens channels for connection parameters
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn DatabaseChannel>>;
}
