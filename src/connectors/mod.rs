// Connectors
// Backend-specific lifecycles behind one uniform contract. Each connector owns a
// details record stored in the connection state, a set of actions and a pure
// reducer for them. Query execution is split into a synchronous preparation
// step that validates the connection and an asynchronous start step.

pub mod channel;
pub mod demo;
pub mod hyper;
pub mod salesforce;
pub mod serverless;
pub mod setup;
pub mod trino;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::debug;

use crate::connection::{ConnectionDetails, ConnectionParams, ConnectorType};
use crate::error::{Error, Result};
use crate::query::QueryExecutionArgs;
use crate::sync::CancelToken;

pub use channel::{ChannelProvider, DatabaseChannel, QueryExecutionResponseStream};
pub use hyper::HyperGrpcAction;
pub use salesforce::SalesforceAction;
pub use setup::{ChannelAction, ChannelSetupState, SetupTimings};
pub use trino::TrinoAction;

/// Connector-specific connection actions
#[derive(Debug)]
pub enum ConnectorAction {
    Hyper(HyperGrpcAction),
    Salesforce(SalesforceAction),
    Trino(TrinoAction),
}

impl ConnectorAction {
    /// Wrap a shared channel step for the given connector
    pub fn channel(connector: ConnectorType, action: ChannelAction) -> Option<Self> {
        match connector {
            ConnectorType::Hyper => Some(ConnectorAction::Hyper(HyperGrpcAction::Channel(action))),
            ConnectorType::Salesforce => {
                Some(ConnectorAction::Salesforce(SalesforceAction::Channel(action)))
            }
            ConnectorType::Trino => Some(ConnectorAction::Trino(TrinoAction::Channel(action))),
            ConnectorType::Demo | ConnectorType::Serverless => None,
        }
    }

    /// The action that starts a channel setup with these parameters
    pub fn setup_started(params: &ConnectionParams) -> Option<Self> {
        match params {
            ConnectionParams::Hyper(p) => {
                Some(ConnectorAction::Hyper(HyperGrpcAction::SetupStarted(p.clone())))
            }
            ConnectionParams::Trino(p) => {
                Some(ConnectorAction::Trino(TrinoAction::SetupStarted(p.clone())))
            }
            _ => None,
        }
    }
}

/// A query that passed preparation and is ready to be started
#[derive(Clone)]
pub struct QueryTask {
    pub connector: ConnectorType,
    pub channel: Arc<dyn DatabaseChannel>,
    pub args: QueryExecutionArgs,
}

/// Validate that a query can be sent through this connection.
/// Never performs I/O. Fails with ChannelNotSetup if the channel is missing.
pub fn prepare_query(details: &ConnectionDetails, args: &QueryExecutionArgs) -> Result<QueryTask> {
    let connector = details.connector_type();
    if let ConnectionDetails::Salesforce(d) = details {
        if d.auth.data_cloud_access_token.is_none() {
            return Err(Error::MissingCredentials(
                "data cloud access token is missing".to_string(),
            ));
        }
    }
    let channel = details.channel().ok_or(Error::ChannelNotSetup(connector))?;
    Ok(QueryTask {
        connector,
        channel,
        args: args.clone(),
    })
}

/// Start a prepared query on the backend
pub async fn execute_query(
    task: &QueryTask,
    cancel: CancelToken,
) -> Result<Arc<dyn QueryExecutionResponseStream>> {
    debug!(connector = %task.connector, query = %task.args.query, "Starting query");
    task.channel.execute_query(&task.args, cancel).await
}
