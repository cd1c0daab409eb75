//! Messaging Error Types

use std::time::Duration;
use thiserror::Error;

/// Main messaging error type
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Broker unreachable or connection lost
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No correlated reply before the deadline
    #[error("Call to '{topic}' timed out after {timeout_ms}ms")]
    CallTimeout { topic: String, timeout_ms: u64 },

    /// Malformed frame or payload
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// The connection was closed while the operation was outstanding
    #[error("Connection closed")]
    Closed,
}

/// Result type alias for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn call_timeout(topic: impl Into<String>, timeout: Duration) -> Self {
        Self::CallTimeout {
            topic: topic.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }
}
