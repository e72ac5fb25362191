// connhub - connection and query execution lifecycle core
// This is the library root that exposes the public API

pub mod batch;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod connectors;
pub mod error;
pub mod query;
pub mod sync;

// Re-export commonly used types for convenience
pub use batch::{Column, DataType, QueryResult, RecordBatch, ResultSchema, Row, Value};
pub use catalog::{Catalog, CatalogLoader, CatalogSnapshot};
pub use config::EngineConfig;
pub use connection::{
    ConnectionAction, ConnectionDetails, ConnectionHealth, ConnectionId, ConnectionParams, ConnectionRegistry,
    ConnectionState, ConnectionStatus, ConnectorType,
};
pub use error::{Error, Result, SharedError};
pub use query::{QueryExecutionArgs, QueryExecutionStatus, QueryExecutor, QueryHandle, QueryId};
pub use sync::{AsyncValueTopic, CancelToken, Semaphore, StatePromise};
