//! Field data sources polled by the [`Poller`](crate::Poller).

use async_trait::async_trait;

use crate::error::SourceError;

/// One raw value read from a field device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Owning device, used as the gateway device name.
    pub device: String,
    /// Field (channel/register) name.
    pub field: String,
    /// Stringified value, or why this field could not be read.
    pub value: Result<String, SourceError>,
}

impl Reading {
    pub fn ok(device: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            field: field.into(),
            value: Ok(value.into()),
        }
    }

    pub fn failed(device: impl Into<String>, field: impl Into<String>, error: SourceError) -> Self {
        Self {
            device: device.into(),
            field: field.into(),
            value: Err(error),
        }
    }
}

/// Provider of raw field readings.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the upstream dependencies needed to read are available.
    ///
    /// A source that is not ready is skipped for the current cycle.
    fn is_ready(&self) -> bool {
        true
    }

    /// Read the current value of every field.
    ///
    /// `Err` means the whole source is unavailable this cycle. Failures of
    /// individual fields are reported per [`Reading`].
    async fn read(&self) -> Result<Vec<Reading>, SourceError>;
}
