// Channel setup
// The part of the connection lifecycle shared by every connector that opens a
// real channel: connect, mark the channel ready, then run a health check.
// The reducer half is pure, the driver half performs the I/O and reports each
// step through the registry.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::channel::{ChannelProvider, DatabaseChannel};
use super::ConnectorAction;
use crate::connection::{ConnectionHealth, ConnectionId, ConnectionParams, ConnectionRegistry, ConnectionStatus, ConnectorType};
use crate::error::{Error, Result};
use crate::sync::CancelToken;

/// When each setup step happened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupTimings {
    pub setup_started_at: Option<Instant>,
    pub setup_cancelled_at: Option<Instant>,
    pub setup_failed_at: Option<Instant>,
    pub channel_ready_at: Option<Instant>,
    pub health_check_started_at: Option<Instant>,
    pub health_check_cancelled_at: Option<Instant>,
    pub health_check_failed_at: Option<Instant>,
    pub health_check_succeeded_at: Option<Instant>,
}

/// Channel substate of a connector
#[derive(Clone, Default)]
pub struct ChannelSetupState {
    pub timings: SetupTimings,
    pub channel: Option<Arc<dyn DatabaseChannel>>,
    pub setup_error: Option<String>,
    pub health_check_error: Option<String>,
}

impl ChannelSetupState {
    /// A fresh substate for a setup attempt that starts now
    pub fn started(now: Instant) -> Self {
        Self {
            timings: SetupTimings {
                setup_started_at: Some(now),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl fmt::Debug for ChannelSetupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSetupState")
            .field("timings", &self.timings)
            .field("has_channel", &self.channel.is_some())
            .field("setup_error", &self.setup_error)
            .field("health_check_error", &self.health_check_error)
            .finish()
    }
}

/// Setup steps shared by all channel-based connectors
#[derive(Clone)]
pub enum ChannelAction {
    SetupCancelled(String),
    SetupFailed(String),
    Ready(Arc<dyn DatabaseChannel>),
    HealthCheckStarted,
    HealthCheckCancelled,
    HealthCheckFailed(String),
    HealthCheckSucceeded,
}

impl fmt::Debug for ChannelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAction::SetupCancelled(reason) => f.debug_tuple("SetupCancelled").field(reason).finish(),
            ChannelAction::SetupFailed(reason) => f.debug_tuple("SetupFailed").field(reason).finish(),
            ChannelAction::Ready(_) => f.write_str("Ready"),
            ChannelAction::HealthCheckStarted => f.write_str("HealthCheckStarted"),
            ChannelAction::HealthCheckCancelled => f.write_str("HealthCheckCancelled"),
            ChannelAction::HealthCheckFailed(reason) => {
                f.debug_tuple("HealthCheckFailed").field(reason).finish()
            }
            ChannelAction::HealthCheckSucceeded => f.write_str("HealthCheckSucceeded"),
        }
    }
}

/// Apply a channel action to the channel substate.
/// Health check steps require an established channel and return None without one.
pub fn reduce_channel_action(
    setup: &ChannelSetupState,
    action: ChannelAction,
    now: Instant,
) -> Option<(ConnectionStatus, ConnectionHealth, ChannelSetupState)> {
    let mut next = setup.clone();
    let (status, health) = match action {
        ChannelAction::SetupCancelled(reason) => {
            next.timings.setup_cancelled_at = Some(now);
            next.setup_error = Some(reason);
            next.channel = None;
            (ConnectionStatus::ChannelSetupCancelled, ConnectionHealth::Cancelled)
        }
        ChannelAction::SetupFailed(reason) => {
            next.timings.setup_failed_at = Some(now);
            next.setup_error = Some(reason);
            next.channel = None;
            (ConnectionStatus::ChannelSetupFailed, ConnectionHealth::Offline)
        }
        ChannelAction::Ready(channel) => {
            next.timings.channel_ready_at = Some(now);
            next.channel = Some(channel);
            next.setup_error = None;
            // Not usable for queries until the health check passes
            (ConnectionStatus::ChannelReady, ConnectionHealth::Connecting)
        }
        ChannelAction::HealthCheckStarted => {
            next.channel.as_ref()?;
            next.timings.health_check_started_at = Some(now);
            (ConnectionStatus::HealthCheckStarted, ConnectionHealth::Connecting)
        }
        ChannelAction::HealthCheckCancelled => {
            next.channel.as_ref()?;
            next.timings.health_check_cancelled_at = Some(now);
            (ConnectionStatus::HealthCheckCancelled, ConnectionHealth::Cancelled)
        }
        ChannelAction::HealthCheckFailed(reason) => {
            next.channel.as_ref()?;
            next.timings.health_check_failed_at = Some(now);
            next.health_check_error = Some(reason);
            (ConnectionStatus::HealthCheckFailed, ConnectionHealth::Offline)
        }
        ChannelAction::HealthCheckSucceeded => {
            next.channel.as_ref()?;
            next.timings.health_check_succeeded_at = Some(now);
            next.health_check_error = None;
            (ConnectionStatus::HealthCheckSucceeded, ConnectionHealth::Online)
        }
    };
    Some((status, health, next))
}

/// Set up the channel of a Hyper or Trino connection.
/// Records SetupStarted with the parameters, then connects and health-checks.
pub async fn setup_channel(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    params: ConnectionParams,
    provider: &dyn ChannelProvider,
    cancel: &CancelToken,
) -> Result<Arc<dyn DatabaseChannel>> {
    let connector = params.connector_type();
    let started = ConnectorAction::setup_started(&params).ok_or(Error::UnsupportedConnector {
        connector,
        operation: "channel setup",
    })?;
    info!(connection_id, %connector, "Channel setup started");
    registry.dispatch(connection_id, started);
    connect_channel(registry, connection_id, connector, &params, provider, cancel).await
}

/// Connect and health-check a channel, reporting every step as `connector` actions
pub(crate) async fn connect_channel(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    connector: ConnectorType,
    params: &ConnectionParams,
    provider: &dyn ChannelProvider,
    cancel: &CancelToken,
) -> Result<Arc<dyn DatabaseChannel>> {
    let report = |action: ChannelAction| {
        debug!(connection_id, %connector, ?action, "Channel setup step");
        if let Some(action) = ConnectorAction::channel(connector, action) {
            registry.dispatch(connection_id, action);
        }
    };

    if let Err(e) = params.validate() {
        warn!(connection_id, error = %e, "Invalid connection parameters");
        report(ChannelAction::SetupFailed(e.to_string()));
        return Err(e);
    }

    let channel = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            report(ChannelAction::SetupCancelled("setup was cancelled".to_string()));
            return Err(Error::Cancelled);
        }
        result = provider.connect(params) => match result {
            Ok(channel) => channel,
            Err(e) => {
                warn!(connection_id, error = %e, "Channel setup failed");
                report(ChannelAction::SetupFailed(e.to_string()));
                return Err(e);
            }
        },
    };
    report(ChannelAction::Ready(Arc::clone(&channel)));

    report(ChannelAction::HealthCheckStarted);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            report(ChannelAction::HealthCheckCancelled);
            return Err(Error::Cancelled);
        }
        result = channel.check_health() => {
            if let Err(e) = result {
                warn!(connection_id, error = %e, "Health check failed");
                report(ChannelAction::HealthCheckFailed(e.to_string()));
                return Err(e);
            }
        }
    }
    report(ChannelAction::HealthCheckSucceeded);
    info!(connection_id, %connector, "Channel is online");
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::params::{HyperGrpcChannelParams, HyperGrpcConnectionParams};
    use crate::connection::ConnectionDetails;
    use crate::connectors::hyper::HyperGrpcConnectionDetails;
    use crate::connectors::testing::MockChannel;
    use async_trait::async_trait;

    struct FixedProvider(Arc<MockChannel>);

    #[async_trait]
    impl ChannelProvider for FixedProvider {
        async fn connect(&self, _params: &ConnectionParams) -> Result<Arc<dyn DatabaseChannel>> {
            Ok(Arc::clone(&self.0) as Arc<dyn DatabaseChannel>)
        }
    }

    #[tokio::test]
    async fn test_connection_is_not_online_until_health_check_passes() {
        let registry = ConnectionRegistry::new();
        let state = registry.create_connection(ConnectionDetails::Hyper(HyperGrpcConnectionDetails::default()));
        let id = state.connection_id;
        let gate = Arc::new(tokio::sync::Notify::new());
        let provider = FixedProvider(Arc::new(MockChannel::unhealthy("server is starting up").gated(Arc::clone(&gate))));
        let params = ConnectionParams::Hyper(HyperGrpcConnectionParams {
            channel: HyperGrpcChannelParams {
                endpoint: "http://localhost:7484".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });

        let cancel = CancelToken::new();
        let setup = setup_channel(&registry, id, params, &provider, &cancel);
        let inspect = async {
            // The channel is ready and the health check is in flight
            loop {
                let state = registry.get(id).unwrap();
                if state.connection_status == ConnectionStatus::HealthCheckStarted {
                    assert_eq!(state.connection_health, ConnectionHealth::Connecting);
                    assert!(state.details.channel().is_some());
                    assert!(!state.is_online());
                    break;
                }
                tokio::task::yield_now().await;
            }
            gate.notify_one();
        };
        let (result, ()) = tokio::join!(setup, inspect);

        assert!(matches!(result, Err(Error::HealthCheck(_))));
        let state = registry.get(id).unwrap();
        assert_eq!(state.connection_status, ConnectionStatus::HealthCheckFailed);
        assert_eq!(state.connection_health, ConnectionHealth::Offline);
        assert!(!state.is_online());
    }

    #[test]
    fn test_health_check_requires_channel() {
        let setup = ChannelSetupState::started(Instant::now());
        assert!(reduce_channel_action(&setup, ChannelAction::HealthCheckStarted, Instant::now()).is_none());
    }

    #[test]
    fn test_ready_then_health_check() {
        let now = Instant::now();
        let setup = ChannelSetupState::started(now);
        let channel: Arc<dyn DatabaseChannel> = Arc::new(MockChannel::healthy());
        let (status, health, setup) =
            reduce_channel_action(&setup, ChannelAction::Ready(channel), now).unwrap();
        assert_eq!(status, ConnectionStatus::ChannelReady);
        assert_eq!(health, ConnectionHealth::Connecting);

        let (status, health, setup) =
            reduce_channel_action(&setup, ChannelAction::HealthCheckFailed("down".into()), now).unwrap();
        assert_eq!(status, ConnectionStatus::HealthCheckFailed);
        assert_eq!(health, ConnectionHealth::Offline);
        assert_eq!(setup.health_check_error.as_deref(), Some("down"));
        assert!(setup.timings.health_check_failed_at.is_some());
    }

    #[test]
    fn test_setup_failure_drops_channel() {
        let now = Instant::now();
        let channel: Arc<dyn DatabaseChannel> = Arc::new(MockChannel::healthy());
        let (_, _, setup) =
            reduce_channel_action(&ChannelSetupState::started(now), ChannelAction::Ready(channel), now).unwrap();
        let (status, health, setup) =
            reduce_channel_action(&setup, ChannelAction::SetupFailed("refused".into()), now).unwrap();
        assert_eq!(status, ConnectionStatus::ChannelSetupFailed);
        assert_eq!(health, ConnectionHealth::Offline);
        assert!(setup.channel.is_none());
    }
}
