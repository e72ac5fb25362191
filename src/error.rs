// Error types
// Every failure in the connection and query lifecycle is one of these variants.
// Setup errors fail before any I/O, start errors reject the call that tried to
// reach the backend, and mid-stream errors end up attached to a terminal state.

use crate::connection::ConnectionId;
use crate::connection::ConnectorType;
use thiserror::Error;

/// Result type for connhub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that are also stored in state records are shared
pub type SharedError = std::sync::Arc<Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// The connector channel has not been established yet
    #[error("channel is not set up for connector '{0}'")]
    ChannelNotSetup(ConnectorType),

    /// Required credentials are missing from the connection details
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The backend could not be reached or refused the request
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend rejected the credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The health check did not pass
    #[error("health check failed: {0}")]
    HealthCheck(String),

    /// The query started but failed while streaming results
    #[error("query failed: {0}")]
    Query(String),

    /// The operation observed its cancellation signal
    #[error("operation was cancelled")]
    Cancelled,

    /// A topic was closed while a subscriber was waiting on it
    #[error("topic closed")]
    TopicClosed,

    /// The admission semaphore was closed while waiting for a slot
    #[error("admission semaphore is closed")]
    SemaphoreClosed,

    /// No connection is registered under this id
    #[error("couldn't find a connection with id {0}")]
    UnknownConnection(ConnectionId),

    /// The connector does not support the requested operation
    #[error("connector '{connector}' does not support {operation}")]
    UnsupportedConnector {
        connector: ConnectorType,
        operation: &'static str,
    },

    /// A catalog operation referenced an unknown pool or malformed snapshot
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Wire format (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading configuration or snapshots
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error without an underlying cause
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error is the cancellation outcome rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the error happened before any I/O was attempted
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotSetup(_) | Self::MissingCredentials(_) | Self::UnknownConnection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Query("boom".into()).is_cancellation());
        assert!(Error::ChannelNotSetup(ConnectorType::Trino).is_setup_error());
        assert!(!Error::transport("refused").is_setup_error());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ChannelNotSetup(ConnectorType::Hyper);
        assert_eq!(err.to_string(), "channel is not set up for connector 'hyper'");

        let err = Error::UnsupportedConnector {
            connector: ConnectorType::Serverless,
            operation: "catalog updates",
        };
        assert_eq!(
            err.to_string(),
            "connector 'serverless' does not support catalog updates"
        );
    }
}
