// Hyper gRPC connector
// Connection lifecycle of a Hyper database reached over gRPC:
// NOT_STARTED -> CHANNEL_SETUP_STARTED -> CHANNEL_READY -> HEALTH_CHECK_* .

use std::time::Instant;

use super::setup::{reduce_channel_action, ChannelAction, ChannelSetupState};
use crate::connection::params::HyperGrpcConnectionParams;
use crate::connection::{ConnectionDetails, ConnectionHealth, ConnectionState, ConnectionStatus};

/// Hyper-specific connection details
#[derive(Clone, Debug, Default)]
pub struct HyperGrpcConnectionDetails {
    pub params: Option<HyperGrpcConnectionParams>,
    pub setup: ChannelSetupState,
}

impl HyperGrpcConnectionDetails {
    pub fn with_params(params: HyperGrpcConnectionParams) -> Self {
        Self {
            params: Some(params),
            setup: ChannelSetupState::default(),
        }
    }

    /// Keep the parameters, forget the channel
    pub fn reset(&self) -> Self {
        Self {
            params: self.params.clone(),
            setup: ChannelSetupState::default(),
        }
    }
}

#[derive(Debug)]
pub enum HyperGrpcAction {
    SetupStarted(HyperGrpcConnectionParams),
    Channel(ChannelAction),
}

pub fn reduce_hyper_grpc_state(
    state: &ConnectionState,
    details: &HyperGrpcConnectionDetails,
    action: HyperGrpcAction,
) -> Option<ConnectionState> {
    let now = Instant::now();
    let (status, health, next_details) = match action {
        HyperGrpcAction::SetupStarted(params) => (
            ConnectionStatus::ChannelSetupStarted,
            ConnectionHealth::Connecting,
            HyperGrpcConnectionDetails {
                params: Some(params),
                setup: ChannelSetupState::started(now),
            },
        ),
        HyperGrpcAction::Channel(action) => {
            let (status, health, setup) = reduce_channel_action(&details.setup, action, now)?;
            (
                status,
                health,
                HyperGrpcConnectionDetails {
                    params: details.params.clone(),
                    setup,
                },
            )
        }
    };
    let mut next = state.clone();
    next.connection_status = status;
    next.connection_health = health;
    next.details = ConnectionDetails::Hyper(next_details);
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{reduce_connection_state, ConnectionAction};
    use crate::connectors::channel::DatabaseChannel;
    use crate::connectors::testing::MockChannel;
    use crate::connectors::ConnectorAction;
    use std::sync::Arc;

    fn hyper_action(action: HyperGrpcAction) -> ConnectionAction {
        ConnectionAction::Connector(ConnectorAction::Hyper(action))
    }

    #[test]
    fn test_hyper_setup_sequence() {
        let params = HyperGrpcConnectionParams::default();
        let state = ConnectionState::new(
            1,
            ConnectionDetails::Hyper(HyperGrpcConnectionDetails::with_params(params.clone())),
        );
        assert_eq!(state.connection_status, ConnectionStatus::NotStarted);
        assert_eq!(state.connection_health, ConnectionHealth::NotStarted);

        let state = reduce_connection_state(&state, hyper_action(HyperGrpcAction::SetupStarted(params))).unwrap();
        assert_eq!(state.connection_status, ConnectionStatus::ChannelSetupStarted);
        assert_eq!(state.connection_health, ConnectionHealth::Connecting);

        let channel: Arc<dyn DatabaseChannel> = Arc::new(MockChannel::healthy());
        let state = reduce_connection_state(
            &state,
            hyper_action(HyperGrpcAction::Channel(ChannelAction::Ready(channel))),
        )
        .unwrap();
        assert_eq!(state.connection_status, ConnectionStatus::ChannelReady);
        assert_eq!(state.connection_health, ConnectionHealth::Connecting);
        assert!(state.details.channel().is_some());
        assert!(!state.is_online());

        let state = reduce_connection_state(
            &state,
            hyper_action(HyperGrpcAction::Channel(ChannelAction::HealthCheckStarted)),
        )
        .unwrap();
        assert!(!state.is_online());

        let state = reduce_connection_state(
            &state,
            hyper_action(HyperGrpcAction::Channel(ChannelAction::HealthCheckSucceeded)),
        )
        .unwrap();
        assert_eq!(state.connection_status, ConnectionStatus::HealthCheckSucceeded);
        assert!(state.is_online());
    }

    #[test]
    fn test_reset_keeps_params() {
        let mut params = HyperGrpcConnectionParams::default();
        params.channel.endpoint = "http://localhost:7484".to_string();
        let details = HyperGrpcConnectionDetails::with_params(params.clone());
        let reset = details.reset();
        assert_eq!(reset.params, Some(params));
        assert!(reset.setup.channel.is_none());
    }
}
