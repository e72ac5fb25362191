// Catalog loader
// Refreshes the catalog of a connection. Every update holds a permit of the
// connection's semaphore while it talks to the backend, so the number of
// concurrent metadata queries per connection stays bounded. Results replace the
// connection's descriptor pool in one step; failed updates leave it untouched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::information_schema::{build_information_schema_query, collect_schema_descriptors};
use super::update::{CatalogAction, CatalogTaskId, CatalogUpdateTaskState};
use super::SchemaDescriptor;
use crate::config::CatalogConfig;
use crate::connection::{ConnectionDetails, ConnectionId, ConnectionRegistry, ConnectionState};
use crate::connectors::salesforce::collect_data_cloud_descriptors;
use crate::error::{Error, SharedError};
use crate::query::{QueryExecutionArgs, QueryExecutor, QueryMetadata, QueryType};
use crate::sync::{CancelToken, Semaphore};

type TaskResult<T> = std::result::Result<T, SharedError>;

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

/// Rank of the descriptor pool holding a connection's catalog
const CONNECTION_POOL_RANK: u32 = 100;

/// Schedules and runs catalog updates
pub struct CatalogLoader {
    registry: Arc<ConnectionRegistry>,
    executor: Arc<QueryExecutor>,
    config: CatalogConfig,
    semaphores: Mutex<HashMap<ConnectionId, Semaphore>>,
    /// Connections with a requested refresh that has not finished yet
    pending: Mutex<HashSet<ConnectionId>>,
}

impl CatalogLoader {
    pub fn new(registry: Arc<ConnectionRegistry>, executor: Arc<QueryExecutor>, config: CatalogConfig) -> Self {
        Self {
            registry,
            executor,
            config,
            semaphores: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<ConnectionId>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The admission semaphore of a connection, created on first use
    pub fn semaphore(&self, connection: &ConnectionState) -> Semaphore {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        semaphores
            .entry(connection.connection_id)
            .or_insert_with(|| Semaphore::new(self.config.concurrency_for(connection.connector_type())))
            .clone()
    }

    /// Close and forget the semaphores of connections that left the registry.
    /// Updates still waiting for a slot fail instead of waiting forever.
    pub fn release_removed_connections(&self) -> usize {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = semaphores.len();
        semaphores.retain(|connection_id, semaphore| {
            let keep = self.registry.get(*connection_id).is_some();
            if !keep {
                semaphore.close();
            }
            keep
        });
        before - semaphores.len()
    }

    /// Run a full catalog refresh and wait for it
    pub async fn update_catalog(&self, connection_id: ConnectionId) -> TaskResult<CatalogTaskId> {
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| Arc::new(Error::UnknownConnection(connection_id)))?;
        if !connection.connector_info.features.catalog_updates {
            return Err(Arc::new(Error::UnsupportedConnector {
                connector: connection.connector_type(),
                operation: "catalog updates",
            }));
        }

        let task_id = NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelToken::new();
        self.registry.dispatch(
            connection_id,
            CatalogAction::UpdateStarted(CatalogUpdateTaskState::new(task_id, cancel.clone())),
        );
        info!(connection_id, task_id, "Catalog update started");

        match self.load(&connection, task_id, &cancel).await {
            Ok(tables) => {
                info!(connection_id, task_id, tables, "Catalog update succeeded");
                self.registry
                    .dispatch(connection_id, CatalogAction::UpdateSucceeded(task_id, tables));
                Ok(task_id)
            }
            Err(e) if e.is_cancellation() => {
                info!(connection_id, task_id, "Catalog update cancelled");
                self.registry.dispatch(connection_id, CatalogAction::UpdateCancelled(task_id));
                Err(e)
            }
            Err(e) => {
                warn!(connection_id, task_id, error = %e, "Catalog update failed");
                self.registry
                    .dispatch(connection_id, CatalogAction::UpdateFailed(task_id, Arc::clone(&e)));
                Err(e)
            }
        }
    }

    async fn load(&self, connection: &ConnectionState, task_id: CatalogTaskId, cancel: &CancelToken) -> TaskResult<usize> {
        let connection_id = connection.connection_id;
        let semaphore = self.semaphore(connection);
        let permit = semaphore.acquire_with_cancel(cancel).await.map_err(Arc::new)?;
        debug!(connection_id, task_id, in_flight = semaphore.in_flight(), "Catalog permit acquired");

        let descriptors = match &connection.details {
            ConnectionDetails::Salesforce(d) if d.auth.data_cloud_metadata.is_some() => d
                .auth
                .data_cloud_metadata
                .as_deref()
                .map(collect_data_cloud_descriptors)
                .unwrap_or_default(),
            ConnectionDetails::Trino(d) => {
                self.query_information_schema(connection_id, task_id, d.catalog_name(), d.schema_names(), cancel)
                    .await?
            }
            _ => {
                self.query_information_schema(connection_id, task_id, None, &[], cancel)
                    .await?
            }
        };
        if cancel.is_cancelled() {
            return Err(Arc::new(Error::Cancelled));
        }

        // Write into the current catalog handle, a reset may have replaced it
        let current = self
            .registry
            .get(connection_id)
            .ok_or_else(|| Arc::new(Error::UnknownConnection(connection_id)))?;
        let tables: usize = descriptors.iter().map(|d| d.tables.len()).sum();
        current
            .catalog
            .replace_descriptor_pool(connection_id, CONNECTION_POOL_RANK, descriptors);
        permit.release();
        Ok(tables)
    }

    async fn query_information_schema(
        &self,
        connection_id: ConnectionId,
        task_id: CatalogTaskId,
        catalog_name: Option<&str>,
        schema_names: &[String],
        cancel: &CancelToken,
    ) -> TaskResult<Vec<SchemaDescriptor>> {
        let args = QueryExecutionArgs {
            query: build_information_schema_query(catalog_name, schema_names),
            analyze_results: false,
            metadata: QueryMetadata {
                query_type: QueryType::CatalogInformationSchema,
                title: Some("Catalog update".to_string()),
                description: None,
                issuer: Some("catalog loader".to_string()),
                user_provided: false,
            },
        };
        let handle = self.executor.execute(connection_id, args)?;
        self.registry
            .dispatch(connection_id, CatalogAction::RegisterQuery(task_id, handle.query_id));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.cancel();
                let _ = handle.wait().await;
                return Err(Arc::new(Error::Cancelled));
            }
            result = handle.wait() => result?,
        };
        Ok(collect_schema_descriptors(&result))
    }

    /// Whether a connection is due for an automatic refresh
    pub fn should_refresh(&self, state: &ConnectionState, now: Instant) -> bool {
        if !state.is_online() || !state.connector_info.features.catalog_updates {
            return false;
        }
        if !state.catalog_updates_running.is_empty() {
            return false;
        }
        match state.last_catalog_update_finished_at() {
            Some(finished) => now.saturating_duration_since(finished) >= self.config.refresh_interval(),
            None => true,
        }
    }

    /// Start a refresh in the background unless one is running or the last one
    /// is recent. Returns whether a refresh was started.
    pub fn request_refresh(self: &Arc<Self>, connection_id: ConnectionId) -> bool {
        let Some(state) = self.registry.get(connection_id) else {
            return false;
        };
        if !self.should_refresh(&state, Instant::now()) {
            debug!(connection_id, "Catalog refresh skipped");
            return false;
        }
        if !self.pending().insert(connection_id) {
            return false;
        }
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = loader.update_catalog(connection_id).await {
                debug!(connection_id, error = %e, "Requested catalog refresh did not complete");
            }
            loader.pending().remove(&connection_id);
        });
        true
    }

    /// Refresh every due connection on an interval until `shutdown` fires
    pub async fn run_periodic(self: Arc<Self>, shutdown: CancelToken) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        info!(interval = ?self.config.refresh_interval(), "Catalog refresh loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let released = self.release_removed_connections();
                    if released > 0 {
                        debug!(released, "Released semaphores of removed connections");
                    }
                    for connection_id in self.registry.connection_ids() {
                        self.request_refresh(connection_id);
                    }
                }
            }
        }
        info!("Catalog refresh loop stopped");
    }
}
