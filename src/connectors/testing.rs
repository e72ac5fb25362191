// Test channels
// Scripted channel and stream used by unit tests across the crate.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::channel::{DatabaseChannel, QueryExecutionResponseStream};
use crate::batch::{Column, DataType, RecordBatch, ResultSchema, Row, Value};
use crate::error::{Error, Result};
use crate::query::{QueryExecutionArgs, QueryExecutionProgress, QueryExecutionStatus};
use crate::sync::CancelToken;

/// One scripted step of a mock stream
#[derive(Clone)]
pub enum StreamStep {
    Batch(RecordBatch),
    Fail(String),
}

pub fn int_batch(values: &[i64]) -> RecordBatch {
    let schema = ResultSchema::new(vec![Column::new("v", DataType::Integer, false)]);
    RecordBatch::new(
        schema,
        values.iter().map(|v| Row::new(vec![Value::Integer(*v)])).collect(),
    )
}

pub struct MockChannel {
    health: std::result::Result<(), String>,
    start_error: Option<String>,
    steps: Vec<StreamStep>,
    /// When set, health checks wait for a notification before answering
    health_gate: Option<Arc<Notify>>,
    pub closed: AtomicBool,
}

impl MockChannel {
    pub fn healthy() -> Self {
        Self {
            health: Ok(()),
            start_error: None,
            steps: Vec::new(),
            health_gate: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn unhealthy(reason: &str) -> Self {
        Self {
            health: Err(reason.to_string()),
            ..Self::healthy()
        }
    }

    /// Answer health checks only after `gate` is notified
    pub fn gated(self, gate: Arc<Notify>) -> Self {
        Self {
            health_gate: Some(gate),
            ..self
        }
    }

    pub fn refusing(reason: &str) -> Self {
        Self {
            start_error: Some(reason.to_string()),
            ..Self::healthy()
        }
    }

    pub fn with_steps(steps: Vec<StreamStep>) -> Self {
        Self {
            steps,
            ..Self::healthy()
        }
    }
}

#[async_trait]
impl DatabaseChannel for MockChannel {
    async fn check_health(&self) -> Result<()> {
        if let Some(gate) = &self.health_gate {
            gate.notified().await;
        }
        self.health.clone().map_err(Error::HealthCheck)
    }

    async fn execute_query(
        &self,
        _args: &QueryExecutionArgs,
        _cancel: CancelToken,
    ) -> Result<Arc<dyn QueryExecutionResponseStream>> {
        if let Some(reason) = &self.start_error {
            return Err(Error::transport(reason.clone()));
        }
        Ok(Arc::new(MockStream {
            steps: Mutex::new(self.steps.iter().cloned().collect()),
            status: Mutex::new(QueryExecutionStatus::Running),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockStream {
    steps: Mutex<VecDeque<StreamStep>>,
    status: Mutex<QueryExecutionStatus>,
}

#[async_trait]
impl QueryExecutionResponseStream for MockStream {
    fn status(&self) -> QueryExecutionStatus {
        *self.status.lock().unwrap()
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn next_progress_update(&self) -> Result<Option<QueryExecutionProgress>> {
        Ok(None)
    }

    async fn next_batch(&self) -> Result<Option<RecordBatch>> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(StreamStep::Batch(batch)) => Ok(Some(batch)),
            Some(StreamStep::Fail(reason)) => {
                *self.status.lock().unwrap() = QueryExecutionStatus::Failed;
                Err(Error::Query(reason))
            }
            None => {
                *self.status.lock().unwrap() = QueryExecutionStatus::Succeeded;
                Ok(None)
            }
        }
    }
}
