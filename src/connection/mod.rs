// Connection state
// Every open connection is described by one ConnectionState record. Records are
// never patched in place: each action produces a complete replacement record
// through `reduce_connection_state`, which is synchronous and never suspends.

pub mod metrics;
pub mod params;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::update::{reduce_catalog_action, CatalogAction, CatalogTaskId, CatalogUpdateTaskState};
use crate::catalog::Catalog;
use crate::connectors::channel::DatabaseChannel;
use crate::connectors::demo::DemoConnectionDetails;
use crate::connectors::hyper::{reduce_hyper_grpc_state, HyperGrpcConnectionDetails};
use crate::connectors::salesforce::{reduce_salesforce_state, SalesforceConnectionDetails};
use crate::connectors::trino::{reduce_trino_state, TrinoConnectionDetails};
use crate::connectors::ConnectorAction;
use crate::error::Error;
use crate::query::{reduce_query_action, QueryAction, QueryExecutionState, QueryId};

pub use metrics::{ConnectionMetrics, ConnectionQueryMetrics};
pub use params::ConnectionParams;
pub use registry::{ConnectionRegistry, ConnectionUpdate};

/// Process-wide connection identifier
pub type ConnectionId = u32;

/// The pluggable backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Demo,
    Hyper,
    Salesforce,
    Serverless,
    Trino,
}

impl ConnectorType {
    /// The wire tag of the connector
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorType::Demo => "demo",
            ConnectorType::Hyper => "hyper",
            ConnectorType::Salesforce => "salesforce",
            ConnectorType::Serverless => "serverless",
            ConnectorType::Trino => "trino",
        }
    }

    /// The static descriptor of this connector
    pub fn info(self) -> &'static ConnectorInfo {
        let index = CONNECTOR_INFOS
            .iter()
            .position(|info| info.connector_type == self)
            .unwrap_or(0);
        &CONNECTOR_INFOS[index]
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "demo" => Ok(ConnectorType::Demo),
            "hyper" => Ok(ConnectorType::Hyper),
            "salesforce" => Ok(ConnectorType::Salesforce),
            "serverless" => Ok(ConnectorType::Serverless),
            "trino" => Ok(ConnectorType::Trino),
            other => Err(Error::Config(format!("unknown connector type '{}'", other))),
        }
    }
}

/// What a connector is able to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorFeatures {
    pub authentication: bool,
    pub health_check: bool,
    pub query_execution: bool,
    pub catalog_updates: bool,
    pub user_editable_parameters: bool,
}

/// Immutable descriptor of a connector type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub connector_type: ConnectorType,
    pub display_name: &'static str,
    pub features: ConnectorFeatures,
}

pub static CONNECTOR_INFOS: [ConnectorInfo; 5] = [
    ConnectorInfo {
        connector_type: ConnectorType::Demo,
        display_name: "Demo",
        features: ConnectorFeatures {
            authentication: false,
            health_check: false,
            query_execution: true,
            catalog_updates: true,
            user_editable_parameters: false,
        },
    },
    ConnectorInfo {
        connector_type: ConnectorType::Hyper,
        display_name: "Hyper gRPC",
        features: ConnectorFeatures {
            authentication: false,
            health_check: true,
            query_execution: true,
            catalog_updates: true,
            user_editable_parameters: true,
        },
    },
    ConnectorInfo {
        connector_type: ConnectorType::Salesforce,
        display_name: "Salesforce Data Cloud",
        features: ConnectorFeatures {
            authentication: true,
            health_check: true,
            query_execution: true,
            catalog_updates: true,
            user_editable_parameters: true,
        },
    },
    ConnectorInfo {
        connector_type: ConnectorType::Serverless,
        display_name: "Serverless",
        features: ConnectorFeatures {
            authentication: false,
            health_check: false,
            query_execution: false,
            catalog_updates: false,
            user_editable_parameters: false,
        },
    },
    ConnectorInfo {
        connector_type: ConnectorType::Trino,
        display_name: "Trino",
        features: ConnectorFeatures {
            authentication: false,
            health_check: true,
            query_execution: true,
            catalog_updates: true,
            user_editable_parameters: true,
        },
    },
];

/// Where a connection is in its setup lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    NotStarted,

    // Authentication
    AuthenticationStarted,
    AuthenticationCancelled,
    AuthenticationFailed,
    AuthenticationSucceeded,
    PkceGenerationStarted,
    PkceGenerated,
    WaitingForOAuthCode,
    OAuthCodeReceived,
    CoreAccessTokenRequested,
    CoreAccessTokenReceived,
    DataCloudTokenRequested,

    // Channel setup
    ChannelSetupStarted,
    ChannelSetupFailed,
    ChannelSetupCancelled,
    ChannelReady,

    // Health check
    HealthCheckStarted,
    HealthCheckFailed,
    HealthCheckCancelled,
    HealthCheckSucceeded,
}

/// Whether a connection can serve queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionHealth {
    NotStarted,
    Connecting,
    Online,
    Offline,
    Cancelled,
}

/// Connector-specific part of a connection
#[derive(Clone)]
pub enum ConnectionDetails {
    Demo(DemoConnectionDetails),
    Hyper(HyperGrpcConnectionDetails),
    Salesforce(SalesforceConnectionDetails),
    Serverless,
    Trino(TrinoConnectionDetails),
}

impl ConnectionDetails {
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            ConnectionDetails::Demo(_) => ConnectorType::Demo,
            ConnectionDetails::Hyper(_) => ConnectorType::Hyper,
            ConnectionDetails::Salesforce(_) => ConnectorType::Salesforce,
            ConnectionDetails::Serverless => ConnectorType::Serverless,
            ConnectionDetails::Trino(_) => ConnectorType::Trino,
        }
    }

    /// The parameters the connection was set up with, if known
    pub fn params(&self) -> Option<ConnectionParams> {
        match self {
            ConnectionDetails::Demo(_) => Some(ConnectionParams::Demo(Default::default())),
            ConnectionDetails::Serverless => Some(ConnectionParams::Serverless(Default::default())),
            ConnectionDetails::Hyper(d) => d.params.clone().map(ConnectionParams::Hyper),
            ConnectionDetails::Salesforce(d) => d.params.clone().map(ConnectionParams::Salesforce),
            ConnectionDetails::Trino(d) => d.params.clone().map(ConnectionParams::Trino),
        }
    }

    /// The open channel, if one has been established
    pub fn channel(&self) -> Option<Arc<dyn DatabaseChannel>> {
        match self {
            ConnectionDetails::Demo(d) => Some(d.channel.clone() as Arc<dyn DatabaseChannel>),
            ConnectionDetails::Hyper(d) => d.setup.channel.clone(),
            ConnectionDetails::Salesforce(d) => d.setup.channel.clone(),
            ConnectionDetails::Trino(d) => d.setup.channel.clone(),
            ConnectionDetails::Serverless => None,
        }
    }

    /// Details after a reset: parameters are kept, everything else starts over
    fn reset(&self) -> Self {
        match self {
            ConnectionDetails::Demo(d) => ConnectionDetails::Demo(DemoConnectionDetails::new(d.config.clone())),
            ConnectionDetails::Hyper(d) => ConnectionDetails::Hyper(d.reset()),
            ConnectionDetails::Salesforce(d) => ConnectionDetails::Salesforce(d.reset()),
            ConnectionDetails::Serverless => ConnectionDetails::Serverless,
            ConnectionDetails::Trino(d) => ConnectionDetails::Trino(d.reset()),
        }
    }

    /// Demo and serverless connections need no setup and are online right away
    fn initial_status(&self) -> (ConnectionStatus, ConnectionHealth) {
        match self {
            ConnectionDetails::Demo(_) | ConnectionDetails::Serverless => {
                (ConnectionStatus::HealthCheckSucceeded, ConnectionHealth::Online)
            }
            _ => (ConnectionStatus::NotStarted, ConnectionHealth::NotStarted),
        }
    }
}

impl fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("connector", &self.connector_type())
            .field("has_channel", &self.channel().is_some())
            .finish()
    }
}

/// The complete state of one connection
#[derive(Clone, Debug)]
pub struct ConnectionState {
    /// Assigned once by the registry
    pub connection_id: ConnectionId,
    pub connector_info: &'static ConnectorInfo,
    pub connection_status: ConnectionStatus,
    pub connection_health: ConnectionHealth,
    pub details: ConnectionDetails,
    pub metrics: ConnectionMetrics,
    /// Handle to the schema cache of this connection
    pub catalog: Arc<Catalog>,
    pub queries_running: BTreeMap<QueryId, Arc<QueryExecutionState>>,
    pub queries_finished: BTreeMap<QueryId, Arc<QueryExecutionState>>,
    pub catalog_updates_running: BTreeMap<CatalogTaskId, Arc<CatalogUpdateTaskState>>,
    pub catalog_updates_finished: BTreeMap<CatalogTaskId, Arc<CatalogUpdateTaskState>>,
    /// When the last full catalog refresh succeeded
    pub last_full_refresh: Option<Instant>,
}

impl ConnectionState {
    /// Create the initial state of a connection
    pub fn new(connection_id: ConnectionId, details: ConnectionDetails) -> Self {
        let (connection_status, connection_health) = details.initial_status();
        Self {
            connection_id,
            connector_info: details.connector_type().info(),
            connection_status,
            connection_health,
            details,
            metrics: ConnectionMetrics::default(),
            catalog: Arc::new(Catalog::new()),
            queries_running: BTreeMap::new(),
            queries_finished: BTreeMap::new(),
            catalog_updates_running: BTreeMap::new(),
            catalog_updates_finished: BTreeMap::new(),
            last_full_refresh: None,
        }
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.connector_info.connector_type
    }

    pub fn is_online(&self) -> bool {
        self.connection_health == ConnectionHealth::Online
    }

    /// Look up a query, running or finished
    pub fn query(&self, query_id: QueryId) -> Option<&Arc<QueryExecutionState>> {
        self.queries_running
            .get(&query_id)
            .or_else(|| self.queries_finished.get(&query_id))
    }

    /// Look up a catalog update task, running or finished
    pub fn catalog_update(&self, task_id: CatalogTaskId) -> Option<&Arc<CatalogUpdateTaskState>> {
        self.catalog_updates_running
            .get(&task_id)
            .or_else(|| self.catalog_updates_finished.get(&task_id))
    }

    /// When the most recent catalog update finished, whatever its outcome
    pub fn last_catalog_update_finished_at(&self) -> Option<Instant> {
        self.catalog_updates_finished
            .values()
            .filter_map(|task| task.finished_at)
            .max()
    }
}

/// Every state transition a connection understands
#[derive(Debug)]
pub enum ConnectionAction {
    /// Drop queries, catalog, metrics and channel, keep the parameters
    Reset,
    /// Keep only the most recent finished queries
    PruneFinishedQueries(usize),
    Catalog(CatalogAction),
    Query(QueryAction),
    Connector(ConnectorAction),
}

impl From<CatalogAction> for ConnectionAction {
    fn from(action: CatalogAction) -> Self {
        ConnectionAction::Catalog(action)
    }
}

impl From<QueryAction> for ConnectionAction {
    fn from(action: QueryAction) -> Self {
        ConnectionAction::Query(action)
    }
}

impl From<ConnectorAction> for ConnectionAction {
    fn from(action: ConnectorAction) -> Self {
        ConnectionAction::Connector(action)
    }
}

/// Apply an action to a connection.
/// Returns None if the action does not apply to this connection.
pub fn reduce_connection_state(
    state: &ConnectionState,
    action: ConnectionAction,
) -> Option<ConnectionState> {
    match action {
        ConnectionAction::Catalog(action) => reduce_catalog_action(state, action),
        ConnectionAction::Query(action) => reduce_query_action(state, action),
        ConnectionAction::Reset => {
            let details = state.details.reset();
            let mut next = ConnectionState::new(state.connection_id, details);
            next.connector_info = state.connector_info;
            Some(next)
        }
        ConnectionAction::PruneFinishedQueries(keep) => {
            if state.queries_finished.len() <= keep {
                return None;
            }
            let mut next = state.clone();
            while next.queries_finished.len() > keep {
                next.queries_finished.pop_first();
            }
            Some(next)
        }
        ConnectionAction::Connector(action) => match (&state.details, action) {
            (ConnectionDetails::Hyper(details), ConnectorAction::Hyper(action)) => {
                reduce_hyper_grpc_state(state, details, action)
            }
            (ConnectionDetails::Salesforce(details), ConnectorAction::Salesforce(action)) => {
                reduce_salesforce_state(state, details, action)
            }
            (ConnectionDetails::Trino(details), ConnectorAction::Trino(action)) => {
                reduce_trino_state(state, details, action)
            }
            _ => None,
        },
    }
}
