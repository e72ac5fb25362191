// Connection parameters
// The user-provided settings of a connection, tagged by connector. They are
// exchanged as JSON, e.g. {"connector":"trino","channel":{"endpoint":"..."}}.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ConnectorType;
use crate::error::{Error, Result};

/// A metadata header sent with every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
}

impl KeyValueEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Client certificate settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsParams {
    pub client_key_path: String,
    pub client_cert_path: String,
    pub ca_certs_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConnectionParams {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerlessConnectionParams {}

/// Where a gRPC channel connects to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperGrpcChannelParams {
    pub endpoint: String,
    pub tls: Option<TlsParams>,
    pub metadata: Vec<KeyValueEntry>,
}

/// A database file attached to every Hyper query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachedDatabase {
    pub path: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperGrpcConnectionParams {
    pub channel: HyperGrpcChannelParams,
    pub attached_databases: Vec<AttachedDatabase>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesforceConnectionParams {
    pub instance_url: String,
    pub app_consumer_key: String,
    pub app_consumer_secret: Option<String>,
    pub login_hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrinoChannelParams {
    pub endpoint: String,
    pub metadata: Vec<KeyValueEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrinoAuthParams {
    pub username: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrinoConnectionParams {
    pub channel: TrinoChannelParams,
    pub auth: TrinoAuthParams,
    pub catalog_name: String,
    pub schema_names: Vec<String>,
}

/// Connection parameters of any connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "connector", rename_all = "lowercase")]
pub enum ConnectionParams {
    Demo(DemoConnectionParams),
    Hyper(HyperGrpcConnectionParams),
    Salesforce(SalesforceConnectionParams),
    Serverless(ServerlessConnectionParams),
    Trino(TrinoConnectionParams),
}

impl ConnectionParams {
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            ConnectionParams::Demo(_) => ConnectorType::Demo,
            ConnectionParams::Hyper(_) => ConnectorType::Hyper,
            ConnectionParams::Salesforce(_) => ConnectorType::Salesforce,
            ConnectionParams::Serverless(_) => ConnectorType::Serverless,
            ConnectionParams::Trino(_) => ConnectorType::Trino,
        }
    }

    /// Check that everything needed to reach the backend is present
    pub fn validate(&self) -> Result<()> {
        match self {
            ConnectionParams::Demo(_) | ConnectionParams::Serverless(_) => Ok(()),
            ConnectionParams::Hyper(p) => {
                if p.channel.endpoint.trim().is_empty() {
                    return Err(Error::MissingCredentials("hyper endpoint is empty".to_string()));
                }
                Ok(())
            }
            ConnectionParams::Salesforce(p) => {
                if p.instance_url.trim().is_empty() {
                    return Err(Error::MissingCredentials(
                        "salesforce instance url is empty".to_string(),
                    ));
                }
                if p.app_consumer_key.trim().is_empty() {
                    return Err(Error::MissingCredentials(
                        "salesforce connected app key is empty".to_string(),
                    ));
                }
                Ok(())
            }
            ConnectionParams::Trino(p) => {
                if p.channel.endpoint.trim().is_empty() {
                    return Err(Error::MissingCredentials("trino endpoint is empty".to_string()));
                }
                if p.auth.username.trim().is_empty() {
                    return Err(Error::MissingCredentials("trino username is empty".to_string()));
                }
                Ok(())
            }
        }
    }

    /// Encode the parameters as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode parameters from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read parameters from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_trino_params() {
        let json = r#"{
            "connector": "trino",
            "channel": { "endpoint": "http://localhost:8080" },
            "auth": { "username": "analyst", "secret": "" },
            "catalog_name": "tpch",
            "schema_names": ["tiny", "sf1"]
        }"#;
        let params = ConnectionParams::from_json(json).unwrap();
        assert_eq!(params.connector_type(), ConnectorType::Trino);
        match &params {
            ConnectionParams::Trino(p) => {
                assert_eq!(p.catalog_name, "tpch");
                assert_eq!(p.schema_names, vec!["tiny", "sf1"]);
                assert!(p.channel.metadata.is_empty());
            }
            other => panic!("unexpected params {:?}", other),
        }
        params.validate().unwrap();
    }

    #[test]
    fn test_decode_demo_without_fields() {
        let params = ConnectionParams::from_json(r#"{"connector":"demo"}"#).unwrap();
        assert_eq!(params, ConnectionParams::Demo(DemoConnectionParams::default()));
        let encoded = params.to_json().unwrap();
        assert_eq!(encoded, r#"{"connector":"demo"}"#);
    }

    #[test]
    fn test_missing_endpoint_is_a_setup_error() {
        let params = ConnectionParams::Hyper(HyperGrpcConnectionParams::default());
        let err = params.validate().unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_unknown_connector_tag() {
        assert!(ConnectionParams::from_json(r#"{"connector":"oracle"}"#).is_err());
    }
}
