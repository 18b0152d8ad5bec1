use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Normalized unit of telemetry moving through the pipeline.
///
/// A packet always names the logical device it belongs to. The capture
/// timestamp is fixed at creation. Fields map a telemetry key to its
/// stringified value and can be accumulated before the packet is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPacket {
    device_name: String,
    timestamp_millis: i64,
    fields: BTreeMap<String, String>,
}

impl TelemetryPacket {
    /// Create an empty packet for `device_name`, stamped with the current time.
    pub fn new(device_name: impl Into<String>) -> Result<Self> {
        Self::with_timestamp(device_name, current_timestamp_millis())
    }

    /// Create an empty packet with an explicit capture timestamp.
    pub fn with_timestamp(device_name: impl Into<String>, timestamp_millis: i64) -> Result<Self> {
        let device_name = device_name.into();
        if device_name.is_empty() {
            return Err(Error::EmptyDeviceName);
        }

        Ok(Self {
            device_name,
            timestamp_millis,
            fields: BTreeMap::new(),
        })
    }

    /// Add a field, replacing any previous value under the same key.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_field(name, value);
        self
    }

    /// Add a field in place.
    pub fn insert_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Number of fields carried by this packet.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
