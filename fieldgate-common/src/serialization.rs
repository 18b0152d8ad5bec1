//! Gateway wire format.
//!
//! Telemetry for one packet is encoded as
//!
//! ```text
//! {"<device>":[{"ts":"<millis>","values":{"<field>":"<value>"}}]}
//! ```
//!
//! and device announce/retire messages as `{"device":"<device>"}`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::telemetry::TelemetryPacket;

/// Serialization step used by the forwarder.
///
/// Implementations must produce payloads the remote gateway accepts on
/// the telemetry and connect/disconnect topics.
pub trait WireFormat: Send + Sync + 'static {
    /// Encode one packet for the telemetry topic.
    fn encode_telemetry(&self, packet: &TelemetryPacket) -> Result<Vec<u8>>;

    /// Encode a device announce/retire control message.
    fn encode_device(&self, device_name: &str) -> Result<Vec<u8>>;
}

/// JSON encoding of the gateway telemetry API.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayJson;

#[derive(Serialize)]
struct TelemetryEntry<'a> {
    ts: String,
    values: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct DeviceMessage<'a> {
    device: &'a str,
}

impl WireFormat for GatewayJson {
    fn encode_telemetry(&self, packet: &TelemetryPacket) -> Result<Vec<u8>> {
        let entry = TelemetryEntry {
            ts: packet.timestamp_millis().to_string(),
            values: packet.fields(),
        };

        let mut root = BTreeMap::new();
        root.insert(packet.device_name(), [entry]);

        serde_json::to_vec(&root).map_err(Error::from)
    }

    fn encode_device(&self, device_name: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(&DeviceMessage {
            device: device_name,
        })
        .map_err(Error::from)
    }
}

/// Decode a flat JSON object into telemetry fields.
///
/// String values are taken verbatim; any other value keeps its JSON text
/// form (`22.5`, `true`, `null`, `{"a":1}`).
pub fn decode_fields(payload: &[u8]) -> Result<BTreeMap<String, String>> {
    let value: Value = serde_json::from_slice(payload)?;

    let Value::Object(object) = value else {
        return Err(Error::MalformedMessage(
            "expected a JSON object at the root".to_string(),
        ));
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}
