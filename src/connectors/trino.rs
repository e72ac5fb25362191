// Trino connector
// Same channel lifecycle as Hyper. The catalog and schema names in the
// parameters scope the information_schema query of catalog updates.

use std::time::Instant;

use super::setup::{reduce_channel_action, ChannelAction, ChannelSetupState};
use crate::connection::params::TrinoConnectionParams;
use crate::connection::{ConnectionDetails, ConnectionHealth, ConnectionState, ConnectionStatus};

#[derive(Clone, Debug, Default)]
pub struct TrinoConnectionDetails {
    pub params: Option<TrinoConnectionParams>,
    pub setup: ChannelSetupState,
}

impl TrinoConnectionDetails {
    pub fn with_params(params: TrinoConnectionParams) -> Self {
        Self {
            params: Some(params),
            setup: ChannelSetupState::default(),
        }
    }

    pub fn reset(&self) -> Self {
        Self {
            params: self.params.clone(),
            setup: ChannelSetupState::default(),
        }
    }

    /// Catalog the connection reads its schema from, if configured
    pub fn catalog_name(&self) -> Option<&str> {
        self.params
            .as_ref()
            .map(|p| p.catalog_name.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn schema_names(&self) -> &[String] {
        self.params
            .as_ref()
            .map(|p| p.schema_names.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug)]
pub enum TrinoAction {
    SetupStarted(TrinoConnectionParams),
    Channel(ChannelAction),
}

pub fn reduce_trino_state(
    state: &ConnectionState,
    details: &TrinoConnectionDetails,
    action: TrinoAction,
) -> Option<ConnectionState> {
    let now = Instant::now();
    let (status, health, next_details) = match action {
        TrinoAction::SetupStarted(params) => (
            ConnectionStatus::ChannelSetupStarted,
            ConnectionHealth::Connecting,
            TrinoConnectionDetails {
                params: Some(params),
                setup: ChannelSetupState::started(now),
            },
        ),
        TrinoAction::Channel(action) => {
            let (status, health, setup) = reduce_channel_action(&details.setup, action, now)?;
            (
                status,
                health,
                TrinoConnectionDetails {
                    params: details.params.clone(),
                    setup,
                },
            )
        }
    };
    let mut next = state.clone();
    next.connection_status = status;
    next.connection_health = health;
    next.details = ConnectionDetails::Trino(next_details);
    Some(next)
}
