// Lifecycle tests
// End-to-end scenarios through the public API: connections are created in a
// registry, set up, queried, cancelled and refreshed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use connhub::catalog::CatalogLoader;
use connhub::config::{CatalogConfig, QueryConfig};
use connhub::connection::params::{HyperGrpcChannelParams, HyperGrpcConnectionParams};
use connhub::connectors::channel::{ChannelProvider, DatabaseChannel, QueryExecutionResponseStream};
use connhub::connectors::demo::{DemoChannelConfig, DemoConnectionDetails};
use connhub::connectors::hyper::HyperGrpcConnectionDetails;
use connhub::connectors::setup::setup_channel;
use connhub::query::{QueryExecutionProgress, QueryExecutionStatus};
use connhub::sync::PromiseState;
use connhub::{
    AsyncValueTopic, CancelToken, ConnectionAction, ConnectionDetails, ConnectionHealth, ConnectionParams,
    ConnectionRegistry, ConnectionStatus, Error, QueryExecutionArgs, QueryExecutor, Result, Semaphore,
};

/// A backend that accepts the connection but refuses every query
struct BrokenBackend;

#[async_trait]
impl DatabaseChannel for BrokenBackend {
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_query(
        &self,
        _args: &QueryExecutionArgs,
        _cancel: CancelToken,
    ) -> Result<Arc<dyn QueryExecutionResponseStream>> {
        Err(Error::transport("connection reset by peer"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct BrokenBackendProvider;

#[async_trait]
impl ChannelProvider for BrokenBackendProvider {
    async fn connect(&self, _params: &ConnectionParams) -> Result<Arc<dyn DatabaseChannel>> {
        Ok(Arc::new(BrokenBackend))
    }
}

fn demo_config(batches: usize, between_ms: u64) -> DemoChannelConfig {
    let mut config = DemoChannelConfig::default();
    config.result_batches = batches;
    config.rows_per_batch = 10;
    config.time_until_first_batch_ms = 50;
    config.time_between_batches_ms = between_ms;
    config
}

fn hyper_params() -> ConnectionParams {
    ConnectionParams::Hyper(HyperGrpcConnectionParams {
        channel: HyperGrpcChannelParams {
            endpoint: "http://localhost:7484".to_string(),
            ..Default::default()
        },
        ..Default::default()
    })
}

#[test]
fn test_demo_connection_starts_online() {
    let registry = ConnectionRegistry::new();
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(
        DemoChannelConfig::default(),
    )));

    assert_eq!(state.connection_status, ConnectionStatus::HealthCheckSucceeded);
    assert_eq!(state.connection_health, ConnectionHealth::Online);
    assert_eq!(state.metrics.total_queries(), 0);
    assert!(state.queries_running.is_empty());
    assert!(state.catalog.is_empty());
}

#[test]
fn test_dispatch_to_unknown_connection_is_ignored() {
    let registry = ConnectionRegistry::new();
    let next = registry.subscribe();

    assert!(registry.dispatch(42, ConnectionAction::Reset).is_none());
    assert!(registry.is_empty());
    assert!(!next.is_settled());
}

#[tokio::test]
async fn test_query_collects_all_batches() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(demo_config(3, 10))));

    let result = executor
        .execute_and_wait(state.connection_id, QueryExecutionArgs::new("SELECT * FROM demo"))
        .await
        .unwrap();
    assert_eq!(result.batches.len(), 3);
    assert_eq!(result.num_rows(), 30);

    let state = registry.get(state.connection_id).unwrap();
    assert_eq!(state.metrics.successful_queries.total_queries, 1);
    assert_eq!(state.metrics.successful_queries.total_batches_received, 3);
    assert_eq!(state.metrics.successful_queries.total_rows_received, 30);
    assert!(state.queries_running.is_empty());
}

#[tokio::test]
async fn test_cancel_after_first_batch() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(demo_config(3, 200))));
    let connection_id = state.connection_id;

    let handle = executor
        .execute(connection_id, QueryExecutionArgs::new("SELECT * FROM demo"))
        .unwrap();

    // Wait on the progress topic until the first batch has been counted
    loop {
        let next = handle.progress.next();
        let received = handle
            .progress
            .last()
            .map(|p| p.metrics.total_batches_received)
            .unwrap_or(0);
        if received >= 1 {
            break;
        }
        next.wait().await.unwrap();
    }
    assert!(executor.cancel(connection_id, handle.query_id));

    let err = handle.wait().await.unwrap_err();
    assert!(err.is_cancellation());

    let state = registry.get(connection_id).unwrap();
    let query = state.query(handle.query_id).unwrap();
    assert_eq!(query.status, QueryExecutionStatus::Cancelled);
    assert_eq!(query.metrics.stream.total_batches_received, 1);
    assert!(query.metrics.finished_at.is_some());
    assert_eq!(state.metrics.canceled_queries.total_queries, 1);
    assert_eq!(state.metrics.canceled_queries.total_batches_received, 1);
    assert_eq!(state.metrics.successful_queries.total_queries, 0);

    // Cancelling a finished query does nothing
    assert!(!executor.cancel(connection_id, handle.query_id));
}

#[tokio::test]
async fn test_refused_query_lands_in_failed_bucket() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());
    let state = registry.create_connection(ConnectionDetails::Hyper(HyperGrpcConnectionDetails::default()));
    let connection_id = state.connection_id;
    assert_eq!(state.connection_status, ConnectionStatus::NotStarted);

    let cancel = CancelToken::new();
    setup_channel(&registry, connection_id, hyper_params(), &BrokenBackendProvider, &cancel)
        .await
        .unwrap();
    let state = registry.get(connection_id).unwrap();
    assert_eq!(state.connection_status, ConnectionStatus::HealthCheckSucceeded);
    assert!(state.is_online());

    let err = executor
        .execute_and_wait(connection_id, QueryExecutionArgs::new("SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(*err, Error::Transport { .. }));

    let state = registry.get(connection_id).unwrap();
    assert_eq!(state.metrics.failed_queries.total_queries, 1);
    assert_eq!(state.metrics.successful_queries.total_queries, 0);
    let query = state.queries_finished.values().next().unwrap();
    assert_eq!(query.status, QueryExecutionStatus::Failed);
    assert!(query.error.is_some());
}

#[tokio::test]
async fn test_cancelled_setup_leaves_connection_offline() {
    let registry = ConnectionRegistry::new();
    let state = registry.create_connection(ConnectionDetails::Hyper(HyperGrpcConnectionDetails::default()));
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = setup_channel(&registry, state.connection_id, hyper_params(), &BrokenBackendProvider, &cancel)
        .await
        .err()
        .unwrap();
    assert!(err.is_cancellation());

    let state = registry.get(state.connection_id).unwrap();
    assert_eq!(state.connection_status, ConnectionStatus::ChannelSetupCancelled);
    assert_eq!(state.connection_health, ConnectionHealth::Cancelled);
    assert!(state.details.channel().is_none());
}

#[tokio::test]
async fn test_catalog_refresh_builds_snapshot() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = Arc::new(QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default()));
    let loader = CatalogLoader::new(Arc::clone(&registry), executor, CatalogConfig::default());

    let mut config = demo_config(1, 0);
    config.catalog.schema_names = vec!["public".to_string()];
    config.catalog.tables_per_schema = 2;
    config.catalog.columns_per_table = 2;
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(config)));

    loader.update_catalog(state.connection_id).await.unwrap();
    let snapshot = registry.get(state.connection_id).unwrap().catalog.snapshot();

    assert_eq!(snapshot.databases.len(), 1);
    assert_eq!(snapshot.schemas.len(), 1);
    assert_eq!(snapshot.schemas[0].database_index, 0);
    assert_eq!(snapshot.tables.len(), 2);
    for table in &snapshot.tables {
        assert_eq!(table.database_index, 0);
        assert_eq!(table.schema_index, 0);
        assert_eq!(table.columns.len(), 2);
    }
    assert_eq!(snapshot.name(snapshot.schemas[0].name_id), Some("public"));
}

#[tokio::test]
async fn test_reset_cancels_running_queries() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(demo_config(5, 200))));

    let handle = executor
        .execute(state.connection_id, QueryExecutionArgs::new("SELECT * FROM demo"))
        .unwrap();
    let reset = registry.reset(state.connection_id).await.unwrap();
    assert!(reset.queries_running.is_empty());
    assert!(handle.cancellation.is_cancelled());
    assert!(handle.wait().await.unwrap_err().is_cancellation());
}

#[tokio::test]
async fn test_semaphore_limits_concurrency() {
    let semaphore = Semaphore::new(2);
    let first = semaphore.acquire().await.unwrap();
    let _second = semaphore.acquire().await.unwrap();
    assert!(semaphore.try_acquire().is_none());

    let waiting = semaphore.clone();
    let third = tokio::spawn(async move { waiting.acquire().await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!third.is_finished());

    first.release();
    tokio::time::timeout(Duration::from_secs(1), third)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test]
fn test_topic_only_delivers_later_values() {
    let topic: AsyncValueTopic<HashMap<String, u32>> = AsyncValueTopic::new();
    topic.publish(HashMap::from([("a".to_string(), 1)]));

    let next = topic.next();
    assert!(next.state().is_pending());
    topic.publish(HashMap::from([("b".to_string(), 2)]));
    match next.state() {
        PromiseState::Resolved(value) => assert!(value.contains_key("b")),
        other => panic!("unexpected state {:?}", other),
    }

    let closed = topic.next();
    topic.close();
    assert!(matches!(closed.state(), PromiseState::Rejected(_)));
}

#[tokio::test]
async fn test_progress_reports_final_status() {
    let registry = Arc::new(ConnectionRegistry::new());
    let executor = QueryExecutor::new(Arc::clone(&registry), &QueryConfig::default());
    let state = registry.create_connection(ConnectionDetails::Demo(DemoConnectionDetails::new(demo_config(2, 0))));

    let handle = executor
        .execute(state.connection_id, QueryExecutionArgs::new("SELECT 1"))
        .unwrap();
    let queued: QueryExecutionProgress = handle.progress.last().unwrap();
    assert_eq!(queued.status, QueryExecutionStatus::Queued);

    handle.wait().await.unwrap();
    let last = handle.progress.last().unwrap();
    assert_eq!(last.status, QueryExecutionStatus::Succeeded);
    assert_eq!(last.metrics.total_batches_received, 2);
}
