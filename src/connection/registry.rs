// Connection registry
// Process-wide map from connection id to the current connection state.
// All transitions go through `dispatch`, which runs the reducer while holding the
// registry lock. Subscribers are notified after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{reduce_connection_state, ConnectionAction, ConnectionDetails, ConnectionId, ConnectionState};
use crate::sync::{AsyncValueTopic, TopicNext};

/// Change notification published by the registry
#[derive(Clone, Debug)]
pub struct ConnectionUpdate {
    pub connection_id: ConnectionId,
    /// The new state, None if the connection was removed
    pub state: Option<Arc<ConnectionState>>,
}

/// Map of all open connections
pub struct ConnectionRegistry {
    next_connection_id: AtomicU32,
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionState>>>,
    updates: AsyncValueTopic<ConnectionUpdate>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_connection_id: AtomicU32::new(1),
            connections: Mutex::new(HashMap::new()),
            updates: AsyncValueTopic::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<ConnectionState>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, connection_id: ConnectionId, state: Option<Arc<ConnectionState>>) {
        self.updates.publish(ConnectionUpdate { connection_id, state });
    }

    /// Allocate a fresh connection id. Ids are strictly increasing and never reused.
    pub fn create_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocate an id and register a new connection for the given details
    pub fn create_connection(&self, details: ConnectionDetails) -> Arc<ConnectionState> {
        let connection_id = self.create_connection_id();
        self.get_or_create(connection_id, |id| ConnectionState::new(id, details))
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionState>> {
        self.lock().get(&connection_id).cloned()
    }

    /// Return the connection, constructing it with `factory` if it does not exist.
    /// Concurrent callers for the same id observe a single construction.
    /// The factory runs under the registry lock and must not call back into the registry.
    pub fn get_or_create<F>(&self, connection_id: ConnectionId, factory: F) -> Arc<ConnectionState>
    where
        F: FnOnce(ConnectionId) -> ConnectionState,
    {
        let created = {
            let mut connections = self.lock();
            if let Some(existing) = connections.get(&connection_id) {
                return Arc::clone(existing);
            }
            let state = Arc::new(factory(connection_id));
            connections.insert(connection_id, Arc::clone(&state));
            state
        };
        info!(connection_id, connector = %created.connector_type(), "Connection created");
        self.notify(connection_id, Some(Arc::clone(&created)));
        created
    }

    /// Replace the state of a connection
    pub fn set(&self, state: ConnectionState) -> Arc<ConnectionState> {
        let state = Arc::new(state);
        let connection_id = state.connection_id;
        self.lock().insert(connection_id, Arc::clone(&state));
        self.notify(connection_id, Some(Arc::clone(&state)));
        state
    }

    /// Apply an action to a connection.
    /// Returns the new state, or None if the connection is unknown or the action
    /// did not apply. In both cases the registry is left untouched.
    pub fn dispatch(
        &self,
        connection_id: ConnectionId,
        action: impl Into<ConnectionAction>,
    ) -> Option<Arc<ConnectionState>> {
        let action = action.into();
        let next = {
            let mut connections = self.lock();
            let Some(current) = connections.get(&connection_id) else {
                debug!(connection_id, ?action, "Dropping action for unknown connection");
                return None;
            };
            let next = Arc::new(reduce_connection_state(current, action)?);
            connections.insert(connection_id, Arc::clone(&next));
            next
        };
        self.notify(connection_id, Some(Arc::clone(&next)));
        Some(next)
    }

    /// Reset a connection: cancel running work, close the channel and start over
    /// with the same parameters.
    pub async fn reset(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionState>> {
        let previous = self.get(connection_id)?;
        cancel_running_work(&previous);
        let next = self.dispatch(connection_id, ConnectionAction::Reset)?;
        close_channel(&previous).await;
        info!(connection_id, "Connection reset");
        Some(next)
    }

    /// Remove a connection, cancel its running work and close its channel
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionState>> {
        let removed = self.lock().remove(&connection_id)?;
        cancel_running_work(&removed);
        close_channel(&removed).await;
        info!(connection_id, "Connection removed");
        self.notify(connection_id, None);
        Some(removed)
    }

    /// Promise for the next change of any connection
    pub fn subscribe(&self) -> TopicNext<ConnectionUpdate> {
        self.updates.next()
    }

    /// The most recent change notification
    pub fn last_update(&self) -> Option<ConnectionUpdate> {
        self.updates.last()
    }

    /// Ids of all registered connections in ascending order
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_running_work(state: &ConnectionState) {
    for query in state.queries_running.values() {
        query.cancellation.cancel();
    }
    for task in state.catalog_updates_running.values() {
        task.cancellation.cancel();
    }
}

async fn close_channel(state: &ConnectionState) {
    if let Some(channel) = state.details.channel() {
        if let Err(e) = channel.close().await {
            warn!(connection_id = state.connection_id, error = %e, "Failed to close channel");
        }
    }
}
