// Salesforce Data Cloud connector
// Authentication runs through an OAuth authorization-code flow with PKCE, then
// exchanges the core access token for a Data Cloud token. Queries go through a
// Hyper channel that presents the Data Cloud token.
// The browser part of the flow is driven elsewhere. This module receives the
// PKCE challenge and the authorization code as inputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::channel::{ChannelProvider, DatabaseChannel};
use super::setup::{connect_channel, reduce_channel_action, ChannelAction, ChannelSetupState};
use super::ConnectorAction;
use crate::catalog::{SchemaDescriptor, SchemaTable, SchemaTableColumn};
use crate::connection::params::{HyperGrpcChannelParams, HyperGrpcConnectionParams, KeyValueEntry, SalesforceConnectionParams};
use crate::connection::{
    ConnectionDetails, ConnectionHealth, ConnectionId, ConnectionParams, ConnectionRegistry, ConnectionState,
    ConnectionStatus, ConnectorType,
};
use crate::error::{Error, Result};
use crate::sync::CancelToken;

/// Database name under which Data Cloud entities are listed in the catalog
pub const DATA_CLOUD_DATABASE: &str = "data_cloud";

/// PKCE challenge of one authorization attempt
#[derive(Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub value: String,
    pub verifier: String,
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceChallenge").field("value", &self.value).finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesforceCoreAccessToken {
    pub access_token: String,
    pub instance_url: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
}

impl fmt::Debug for SalesforceCoreAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceCoreAccessToken")
            .field("instance_url", &self.instance_url)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesforceDataCloudAccessToken {
    pub access_token: String,
    pub instance_url: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in_secs: u64,
}

impl fmt::Debug for SalesforceDataCloudAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceDataCloudAccessToken")
            .field("instance_url", &self.instance_url)
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

/// A field of a Data Cloud entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCloudField {
    pub name: String,
    #[serde(default, rename = "displayName")]
    pub display_name: String,
    #[serde(default, rename = "type")]
    pub field_type: String,
}

/// A Data Cloud entity such as a data lake object or a data model object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCloudEntity {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub fields: Vec<DataCloudField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCloudMetadata {
    #[serde(default)]
    pub metadata: Vec<DataCloudEntity>,
}

impl DataCloudMetadata {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// When each authentication step happened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SalesforceAuthTimings {
    pub auth_started_at: Option<Instant>,
    pub auth_cancelled_at: Option<Instant>,
    pub auth_failed_at: Option<Instant>,
    pub pkce_gen_started_at: Option<Instant>,
    pub pkce_gen_finished_at: Option<Instant>,
    pub waiting_for_code_since: Option<Instant>,
    pub oauth_code_received_at: Option<Instant>,
    pub core_access_token_requested_at: Option<Instant>,
    pub core_access_token_received_at: Option<Instant>,
    pub data_cloud_access_token_requested_at: Option<Instant>,
    pub data_cloud_access_token_received_at: Option<Instant>,
    pub data_cloud_metadata_received_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct SalesforceAuthState {
    pub timings: SalesforceAuthTimings,
    pub auth_error: Option<String>,
    pub pkce_challenge: Option<PkceChallenge>,
    pub oauth_code: Option<String>,
    pub core_access_token: Option<SalesforceCoreAccessToken>,
    pub data_cloud_access_token: Option<SalesforceDataCloudAccessToken>,
    pub data_cloud_metadata: Option<Arc<DataCloudMetadata>>,
}

/// Salesforce-specific connection details
#[derive(Debug, Clone, Default)]
pub struct SalesforceConnectionDetails {
    pub params: Option<SalesforceConnectionParams>,
    pub auth: SalesforceAuthState,
    pub setup: ChannelSetupState,
}

impl SalesforceConnectionDetails {
    pub fn with_params(params: SalesforceConnectionParams) -> Self {
        Self {
            params: Some(params),
            ..Default::default()
        }
    }

    /// Keep the parameters, drop tokens and channel
    pub fn reset(&self) -> Self {
        Self {
            params: self.params.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub enum SalesforceAction {
    AuthStarted(SalesforceConnectionParams),
    AuthCancelled(String),
    AuthFailed(String),
    GeneratingPkceChallenge,
    GeneratedPkceChallenge(PkceChallenge),
    WaitingForOAuthCode,
    OAuthCodeReceived(String),
    RequestingCoreAccessToken,
    ReceivedCoreAccessToken(SalesforceCoreAccessToken),
    RequestingDataCloudAccessToken,
    ReceivedDataCloudAccessToken(SalesforceDataCloudAccessToken),
    ReceivedDataCloudMetadata(Arc<DataCloudMetadata>),
    Channel(ChannelAction),
}

pub fn reduce_salesforce_state(
    state: &ConnectionState,
    details: &SalesforceConnectionDetails,
    action: SalesforceAction,
) -> Option<ConnectionState> {
    let now = Instant::now();
    let mut d = details.clone();
    let mut status = state.connection_status;
    let mut health = ConnectionHealth::Connecting;
    match action {
        SalesforceAction::AuthStarted(params) => {
            d = SalesforceConnectionDetails::with_params(params);
            d.auth.timings.auth_started_at = Some(now);
            status = ConnectionStatus::AuthenticationStarted;
        }
        SalesforceAction::AuthCancelled(reason) => {
            d.auth.timings.auth_cancelled_at = Some(now);
            d.auth.auth_error = Some(reason);
            status = ConnectionStatus::AuthenticationCancelled;
            health = ConnectionHealth::Cancelled;
        }
        SalesforceAction::AuthFailed(reason) => {
            d.auth.timings.auth_failed_at = Some(now);
            d.auth.auth_error = Some(reason);
            status = ConnectionStatus::AuthenticationFailed;
            health = ConnectionHealth::Offline;
        }
        SalesforceAction::GeneratingPkceChallenge => {
            d.auth.timings.pkce_gen_started_at = Some(now);
            status = ConnectionStatus::PkceGenerationStarted;
        }
        SalesforceAction::GeneratedPkceChallenge(challenge) => {
            d.auth.timings.pkce_gen_finished_at = Some(now);
            d.auth.pkce_challenge = Some(challenge);
            status = ConnectionStatus::PkceGenerated;
        }
        SalesforceAction::WaitingForOAuthCode => {
            d.auth.timings.waiting_for_code_since = Some(now);
            status = ConnectionStatus::WaitingForOAuthCode;
        }
        SalesforceAction::OAuthCodeReceived(code) => {
            d.auth.timings.oauth_code_received_at = Some(now);
            d.auth.oauth_code = Some(code);
            status = ConnectionStatus::OAuthCodeReceived;
        }
        SalesforceAction::RequestingCoreAccessToken => {
            d.auth.timings.core_access_token_requested_at = Some(now);
            status = ConnectionStatus::CoreAccessTokenRequested;
        }
        SalesforceAction::ReceivedCoreAccessToken(token) => {
            d.auth.timings.core_access_token_received_at = Some(now);
            d.auth.core_access_token = Some(token);
            status = ConnectionStatus::CoreAccessTokenReceived;
        }
        SalesforceAction::RequestingDataCloudAccessToken => {
            d.auth.timings.data_cloud_access_token_requested_at = Some(now);
            status = ConnectionStatus::DataCloudTokenRequested;
        }
        SalesforceAction::ReceivedDataCloudAccessToken(token) => {
            d.auth.timings.data_cloud_access_token_received_at = Some(now);
            d.auth.data_cloud_access_token = Some(token);
            status = ConnectionStatus::AuthenticationSucceeded;
        }
        SalesforceAction::ReceivedDataCloudMetadata(metadata) => {
            d.auth.timings.data_cloud_metadata_received_at = Some(now);
            d.auth.data_cloud_metadata = Some(metadata);
            health = state.connection_health;
        }
        SalesforceAction::Channel(action) => {
            let (s, h, setup) = reduce_channel_action(&details.setup, action, now)?;
            d.setup = setup;
            status = s;
            health = h;
        }
    }
    let mut next = state.clone();
    next.connection_status = status;
    next.connection_health = health;
    next.details = ConnectionDetails::Salesforce(d);
    Some(next)
}

/// The HTTP endpoints of the Salesforce platform
#[async_trait]
pub trait SalesforceApi: Send + Sync {
    /// Exchange the authorization code for a core access token
    async fn get_core_access_token(
        &self,
        params: &SalesforceConnectionParams,
        auth_code: &str,
        pkce: &PkceChallenge,
    ) -> Result<SalesforceCoreAccessToken>;

    /// Exchange the core access token for a Data Cloud token
    async fn get_data_cloud_access_token(
        &self,
        core: &SalesforceCoreAccessToken,
    ) -> Result<SalesforceDataCloudAccessToken>;

    /// List the Data Cloud entities visible to the token
    async fn get_data_cloud_metadata(
        &self,
        token: &SalesforceDataCloudAccessToken,
    ) -> Result<DataCloudMetadata>;
}

/// What the browser part of the flow produced
#[derive(Debug, Clone)]
pub struct SalesforceAuthInput {
    pub pkce: PkceChallenge,
    pub oauth_code: String,
}

async fn until_cancelled<T>(
    cancel: &CancelToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Hyper channel parameters that present the Data Cloud token
pub fn data_cloud_channel_params(token: &SalesforceDataCloudAccessToken) -> HyperGrpcConnectionParams {
    let endpoint = if token.instance_url.starts_with("http://") || token.instance_url.starts_with("https://") {
        token.instance_url.clone()
    } else {
        format!("https://{}", token.instance_url)
    };
    HyperGrpcConnectionParams {
        channel: HyperGrpcChannelParams {
            endpoint,
            tls: None,
            metadata: vec![
                KeyValueEntry::new("authorization", format!("Bearer {}", token.access_token)),
                KeyValueEntry::new("audience", token.instance_url.clone()),
            ],
        },
        attached_databases: Vec::new(),
    }
}

/// Authenticate a Salesforce connection and open its Data Cloud channel
pub async fn setup_salesforce_connection(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    params: SalesforceConnectionParams,
    input: SalesforceAuthInput,
    api: &dyn SalesforceApi,
    provider: &dyn ChannelProvider,
    cancel: &CancelToken,
) -> Result<Arc<dyn DatabaseChannel>> {
    let report = |action: SalesforceAction| {
        registry.dispatch(connection_id, ConnectorAction::Salesforce(action));
    };
    info!(connection_id, instance_url = %params.instance_url, "Salesforce authentication started");
    report(SalesforceAction::AuthStarted(params.clone()));

    let authenticated = async {
        ConnectionParams::Salesforce(params.clone()).validate()?;
        report(SalesforceAction::GeneratedPkceChallenge(input.pkce.clone()));
        report(SalesforceAction::OAuthCodeReceived(input.oauth_code.clone()));

        report(SalesforceAction::RequestingCoreAccessToken);
        let core = until_cancelled(
            cancel,
            api.get_core_access_token(&params, &input.oauth_code, &input.pkce),
        )
        .await?;
        report(SalesforceAction::ReceivedCoreAccessToken(core.clone()));

        report(SalesforceAction::RequestingDataCloudAccessToken);
        let data_cloud = until_cancelled(cancel, api.get_data_cloud_access_token(&core)).await?;
        report(SalesforceAction::ReceivedDataCloudAccessToken(data_cloud.clone()));

        let metadata = until_cancelled(cancel, api.get_data_cloud_metadata(&data_cloud)).await?;
        report(SalesforceAction::ReceivedDataCloudMetadata(Arc::new(metadata)));
        Ok::<_, Error>(data_cloud)
    }
    .await;

    let data_cloud = match authenticated {
        Ok(token) => token,
        Err(e) if e.is_cancellation() => {
            report(SalesforceAction::AuthCancelled(e.to_string()));
            return Err(e);
        }
        Err(e) => {
            warn!(connection_id, error = %e, "Salesforce authentication failed");
            report(SalesforceAction::AuthFailed(e.to_string()));
            return Err(e);
        }
    };

    let channel_params = ConnectionParams::Hyper(data_cloud_channel_params(&data_cloud));
    connect_channel(
        registry,
        connection_id,
        ConnectorType::Salesforce,
        &channel_params,
        provider,
        cancel,
    )
    .await
}

/// Turn Data Cloud metadata into schema descriptors, one schema per entity category
pub fn collect_data_cloud_descriptors(metadata: &DataCloudMetadata) -> Vec<SchemaDescriptor> {
    let mut order: Vec<String> = Vec::new();
    let mut schemas: HashMap<String, Vec<SchemaTable>> = HashMap::new();
    for entity in &metadata.metadata {
        let schema_name = if entity.category.is_empty() {
            "default".to_string()
        } else {
            entity.category.to_ascii_lowercase()
        };
        let table = SchemaTable {
            table_name: entity.name.clone(),
            columns: entity
                .fields
                .iter()
                .enumerate()
                .map(|(i, field)| SchemaTableColumn {
                    column_name: field.name.clone(),
                    ordinal_position: Some(i as u32 + 1),
                })
                .collect(),
        };
        schemas
            .entry(schema_name.clone())
            .or_insert_with(|| {
                order.push(schema_name);
                Vec::new()
            })
            .push(table);
    }
    order
        .into_iter()
        .map(|schema_name| SchemaDescriptor {
            database_name: DATA_CLOUD_DATABASE.to_string(),
            tables: schemas.remove(&schema_name).unwrap_or_default(),
            schema_name,
        })
        .collect()
}
