// Serverless connector
// A connection without a backend. It is online from the start but cannot run
// queries or catalog updates.

use crate::connection::{ConnectionDetails, ConnectionId, ConnectionRegistry, ConnectionState};
use std::sync::Arc;

/// Register a serverless connection
pub fn create_serverless_connection(registry: &ConnectionRegistry) -> Arc<ConnectionState> {
    registry.create_connection(ConnectionDetails::Serverless)
}

/// Whether a connection is the serverless placeholder
pub fn is_serverless(registry: &ConnectionRegistry, connection_id: ConnectionId) -> bool {
    registry
        .get(connection_id)
        .map(|state| matches!(state.details, ConnectionDetails::Serverless))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHealth, ConnectionStatus};

    #[test]
    fn test_serverless_is_online_without_channel() {
        let registry = ConnectionRegistry::new();
        let state = create_serverless_connection(&registry);
        assert_eq!(state.connection_status, ConnectionStatus::HealthCheckSucceeded);
        assert_eq!(state.connection_health, ConnectionHealth::Online);
        assert!(is_serverless(&registry, state.connection_id));
        assert!(!is_serverless(&registry, state.connection_id + 1));
    }
}
