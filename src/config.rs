// Engine configuration
// Settings are read from a JSON file. Every section and field is optional and
// falls back to its default, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::connection::ConnectorType;
use crate::connectors::demo::DemoChannelConfig;
use crate::error::{Error, Result};

/// Catalog update settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Concurrent catalog updates per connection
    pub max_concurrent_updates: usize,
    /// Per-connector overrides of `max_concurrent_updates`
    pub connector_concurrency: HashMap<ConnectorType, usize>,
    /// Minimum time between two automatic refreshes of a connection
    pub refresh_interval_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_concurrent_updates: 2,
            connector_concurrency: HashMap::new(),
            refresh_interval_secs: 60,
        }
    }
}

impl CatalogConfig {
    pub fn concurrency_for(&self, connector: ConnectorType) -> usize {
        self.connector_concurrency
            .get(&connector)
            .copied()
            .unwrap_or(self.max_concurrent_updates)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Query execution settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Finished queries kept per connection
    pub max_finished_queries: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_finished_queries: 64,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub catalog: CatalogConfig,
    pub query: QueryConfig,
    pub demo: DemoChannelConfig,
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.max_concurrent_updates == 0 {
            return Err(Error::Config(
                "catalog.max_concurrent_updates must be at least 1".to_string(),
            ));
        }
        if let Some((connector, _)) = self
            .catalog
            .connector_concurrency
            .iter()
            .find(|(_, limit)| **limit == 0)
        {
            return Err(Error::Config(format!(
                "catalog.connector_concurrency for '{}' must be at least 1",
                connector
            )));
        }
        if self.catalog.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "catalog.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.query.max_finished_queries == 0 {
            return Err(Error::Config(
                "query.max_finished_queries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.catalog.max_concurrent_updates, 2);
        assert_eq!(config.query.max_finished_queries, 64);
        assert_eq!(config.catalog.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_connector_override() {
        let config = EngineConfig::from_json(
            r#"{"catalog": {"connector_concurrency": {"trino": 4}}, "demo": {"result_batches": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.catalog.concurrency_for(ConnectorType::Trino), 4);
        assert_eq!(config.catalog.concurrency_for(ConnectorType::Hyper), 2);
        assert_eq!(config.demo.result_batches, 1);
        assert_eq!(config.demo.rows_per_batch, DemoChannelConfig::default().rows_per_batch);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"catalog": {"max_concurrent_updates": 0}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"catalog": {"connector_concurrency": {"demo": 0}}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"query": {"max_finished_queries": "many"}}"#),
            Err(Error::Serialization(_))
        ));
    }
}
