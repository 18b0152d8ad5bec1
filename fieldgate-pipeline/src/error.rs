//! Error types for the telemetry pipeline.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A worker was started while already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// Broker connection failed.
    #[error("Broker connection error: {0}")]
    Connect(String),

    /// Publish attempted without a broker connection.
    #[error("Not connected to broker")]
    NotConnected,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a publish error for `topic`.
    pub fn publish(topic: impl Into<String>, msg: impl ToString) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: msg.to_string(),
        }
    }
}

impl From<fieldgate_common::Error> for BridgeError {
    fn from(err: fieldgate_common::Error) -> Self {
        match err {
            fieldgate_common::Error::Config(msg) => Self::Config(msg),
            fieldgate_common::Error::Io(e) => Self::Io(e),
            other => Self::Serialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Failure to read from a [`Source`](crate::Source).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source as a whole cannot be read right now.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// A single field could not be read.
    #[error("Read failed: {0}")]
    Read(String),
}
