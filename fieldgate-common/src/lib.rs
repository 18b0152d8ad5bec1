//! fieldgate common library
//!
//! Shared types and utilities for the fieldgate telemetry bridge:
//!
//! - [`telemetry`] - The normalized [`TelemetryPacket`]
//! - [`serialization`] - Gateway wire format ([`WireFormat`], [`GatewayJson`])
//! - [`topics`] - Gateway topic names
//! - [`config`] - Broker and logging configuration
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod telemetry;
pub mod topics;

// Re-export commonly used types at the crate root
pub use config::{BrokerConfig, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use serialization::{GatewayJson, WireFormat, decode_fields};
pub use telemetry::{TelemetryPacket, current_timestamp_millis};
pub use topics::{CONNECT_TOPIC, DISCONNECT_TOPIC, GatewayTopics, TELEMETRY_TOPIC};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
