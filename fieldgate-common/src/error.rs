use thiserror::Error;

/// Common error type for fieldgate components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry packet requires a non-empty device name")]
    EmptyDeviceName,

    #[error("Malformed telemetry message: {0}")]
    MalformedMessage(String),
}

/// Result type alias using fieldgate's Error.
pub type Result<T> = std::result::Result<T, Error>;
