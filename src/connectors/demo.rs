// Demo connector
// An in-process channel producing deterministic synthetic results with
// configurable delays. It is online from the start and answers catalog queries
// with a generated information_schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::channel::{DatabaseChannel, QueryExecutionResponseStream};
use crate::batch::{Column, DataType, RecordBatch, ResultSchema, Row, Value};
use crate::catalog::information_schema::information_schema_result_schema;
use crate::error::{Error, Result};
use crate::query::{
    QueryExecutionArgs, QueryExecutionMetrics, QueryExecutionProgress, QueryExecutionStatus, QueryType,
};
use crate::sync::CancelToken;

/// Shape of the generated demo catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoCatalogConfig {
    pub database_name: String,
    pub schema_names: Vec<String>,
    pub tables_per_schema: usize,
    pub columns_per_table: usize,
}

impl Default for DemoCatalogConfig {
    fn default() -> Self {
        Self {
            database_name: "demo".to_string(),
            schema_names: vec!["public".to_string()],
            tables_per_schema: 4,
            columns_per_table: 6,
        }
    }
}

/// Behavior of the demo channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoChannelConfig {
    pub result_batches: usize,
    pub rows_per_batch: usize,
    pub time_until_first_batch_ms: u64,
    pub time_between_batches_ms: u64,
    pub catalog: DemoCatalogConfig,
}

impl Default for DemoChannelConfig {
    fn default() -> Self {
        Self {
            result_batches: 3,
            rows_per_batch: 100,
            time_until_first_batch_ms: 200,
            time_between_batches_ms: 50,
            catalog: DemoCatalogConfig::default(),
        }
    }
}

impl DemoChannelConfig {
    pub fn time_until_first_batch(&self) -> Duration {
        Duration::from_millis(self.time_until_first_batch_ms)
    }

    pub fn time_between_batches(&self) -> Duration {
        Duration::from_millis(self.time_between_batches_ms)
    }
}

/// Demo-specific connection details
#[derive(Clone, Debug)]
pub struct DemoConnectionDetails {
    pub config: DemoChannelConfig,
    pub channel: Arc<DemoChannel>,
}

impl DemoConnectionDetails {
    pub fn new(config: DemoChannelConfig) -> Self {
        Self {
            channel: Arc::new(DemoChannel::new(config.clone())),
            config,
        }
    }
}

/// In-process channel serving synthetic data
#[derive(Debug)]
pub struct DemoChannel {
    config: DemoChannelConfig,
    closed: AtomicBool,
}

impl DemoChannel {
    pub fn new(config: DemoChannelConfig) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseChannel for DemoChannel {
    async fn check_health(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::HealthCheck("demo channel is closed".to_string()));
        }
        Ok(())
    }

    async fn execute_query(
        &self,
        args: &QueryExecutionArgs,
        cancel: CancelToken,
    ) -> Result<Arc<dyn QueryExecutionResponseStream>> {
        if self.is_closed() {
            return Err(Error::transport("demo channel is closed"));
        }
        let batches = match args.metadata.query_type {
            QueryType::CatalogInformationSchema => generate_catalog_batches(&self.config),
            QueryType::User => generate_batches(&self.config),
        };
        Ok(Arc::new(DemoQueryStream::new(&self.config, batches, cancel)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DemoCursor {
    remaining: VecDeque<RecordBatch>,
    delivered: usize,
}

/// Result stream that releases pre-generated batches on a timer
pub struct DemoQueryStream {
    cursor: tokio::sync::Mutex<DemoCursor>,
    status: Mutex<QueryExecutionStatus>,
    progress_sent: AtomicBool,
    time_until_first_batch: Duration,
    time_between_batches: Duration,
    cancel: CancelToken,
}

impl DemoQueryStream {
    fn new(config: &DemoChannelConfig, batches: Vec<RecordBatch>, cancel: CancelToken) -> Self {
        Self {
            cursor: tokio::sync::Mutex::new(DemoCursor {
                remaining: batches.into(),
                delivered: 0,
            }),
            status: Mutex::new(QueryExecutionStatus::Started),
            progress_sent: AtomicBool::new(false),
            time_until_first_batch: config.time_until_first_batch(),
            time_between_batches: config.time_between_batches(),
            cancel,
        }
    }

    fn set_status(&self, status: QueryExecutionStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }
}

#[async_trait]
impl QueryExecutionResponseStream for DemoQueryStream {
    fn status(&self) -> QueryExecutionStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([("source".to_string(), "demo".to_string())])
    }

    async fn next_progress_update(&self) -> Result<Option<QueryExecutionProgress>> {
        if self.progress_sent.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(QueryExecutionProgress {
            is_queued: Some(false),
            status: QueryExecutionStatus::Running,
            metrics: QueryExecutionMetrics::default(),
        }))
    }

    async fn next_batch(&self) -> Result<Option<RecordBatch>> {
        let mut cursor = self.cursor.lock().await;
        if self.cancel.is_cancelled() {
            self.set_status(QueryExecutionStatus::Cancelled);
            return Err(Error::Cancelled);
        }
        let Some(batch) = cursor.remaining.pop_front() else {
            self.set_status(QueryExecutionStatus::Succeeded);
            return Ok(None);
        };
        let delay = if cursor.delivered == 0 {
            self.time_until_first_batch
        } else {
            self.time_between_batches
        };
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.set_status(QueryExecutionStatus::Cancelled);
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        cursor.delivered += 1;
        self.set_status(QueryExecutionStatus::Running);
        Ok(Some(batch))
    }
}

fn demo_result_schema() -> ResultSchema {
    ResultSchema::new(vec![
        Column::new("id", DataType::Integer, false),
        Column::new("name", DataType::Text, false),
        Column::new("score", DataType::Float, false),
        Column::new("active", DataType::Boolean, false),
        Column::new("note", DataType::Text, true),
    ])
}

/// Generate the synthetic result of a user query
pub fn generate_batches(config: &DemoChannelConfig) -> Vec<RecordBatch> {
    let schema = demo_result_schema();
    let mut batches = Vec::with_capacity(config.result_batches);
    let mut id: i64 = 0;
    for _ in 0..config.result_batches {
        let mut rows = Vec::with_capacity(config.rows_per_batch);
        for _ in 0..config.rows_per_batch {
            let noise = seahash::hash(&id.to_le_bytes());
            let note = if noise % 10 < 3 {
                Value::Null
            } else {
                Value::Text(format!("note/{}", noise % 1000))
            };
            rows.push(Row::new(vec![
                Value::Integer(id),
                Value::Text(format!("name/{}", noise % 10)),
                Value::Float((noise % 10_000) as f64 / 100.0),
                Value::Boolean(id % 2 == 0),
                note,
            ]));
            id += 1;
        }
        batches.push(RecordBatch::new(schema.clone(), rows));
    }
    batches
}

/// Generate the information_schema rows of the demo catalog, one batch per schema
pub fn generate_catalog_batches(config: &DemoChannelConfig) -> Vec<RecordBatch> {
    let schema = information_schema_result_schema();
    let catalog = &config.catalog;
    catalog
        .schema_names
        .iter()
        .map(|schema_name| {
            let mut rows = Vec::new();
            for t in 0..catalog.tables_per_schema {
                for c in 0..catalog.columns_per_table {
                    rows.push(Row::new(vec![
                        Value::Text(catalog.database_name.clone()),
                        Value::Text(schema_name.clone()),
                        Value::Text(format!("table_{}", t)),
                        Value::Text(format!("column_{}", c)),
                        Value::Integer(c as i64 + 1),
                        Value::Text(if c == 0 { "integer" } else { "varchar" }.to_string()),
                        Value::Text(if c == 0 { "NO" } else { "YES" }.to_string()),
                    ]));
                }
            }
            RecordBatch::new(schema.clone(), rows)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> DemoChannelConfig {
        DemoChannelConfig {
            result_batches: 2,
            rows_per_batch: 5,
            time_until_first_batch_ms: 0,
            time_between_batches_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_data_is_deterministic() {
        let config = fast_config();
        assert_eq!(generate_batches(&config), generate_batches(&config));
        let batches = generate_batches(&config);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].value(0, "id"), Some(&Value::Integer(5)));
    }

    #[tokio::test]
    async fn test_stream_delivers_all_batches() {
        let channel = DemoChannel::new(fast_config());
        let stream = channel
            .execute_query(&QueryExecutionArgs::new("select 1"), CancelToken::new())
            .await
            .unwrap();
        let mut batches = 0;
        while let Some(batch) = stream.next_batch().await.unwrap() {
            assert_eq!(batch.num_rows(), 5);
            batches += 1;
        }
        assert_eq!(batches, 2);
        assert_eq!(stream.status(), QueryExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_stream_stops_after_cancel() {
        let channel = DemoChannel::new(fast_config());
        let cancel = CancelToken::new();
        let stream = channel
            .execute_query(&QueryExecutionArgs::new("select 1"), cancel.clone())
            .await
            .unwrap();
        assert!(stream.next_batch().await.unwrap().is_some());
        cancel.cancel();
        assert!(matches!(stream.next_batch().await, Err(Error::Cancelled)));
        assert_eq!(stream.status(), QueryExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_channel_refuses_queries() {
        let channel = DemoChannel::new(fast_config());
        channel.close().await.unwrap();
        assert!(channel.check_health().await.is_err());
        let result = channel
            .execute_query(&QueryExecutionArgs::new("select 1"), CancelToken::new())
            .await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[test]
    fn test_catalog_rows() {
        let mut config = fast_config();
        config.catalog.tables_per_schema = 2;
        config.catalog.columns_per_table = 3;
        let batches = generate_catalog_batches(&config);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 6);
        assert_eq!(
            batches[0].value(5, "table_name"),
            Some(&Value::Text("table_1".into()))
        );
    }
}
