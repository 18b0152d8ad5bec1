//! Gateway MQTT topic names.
//!
//! The remote gateway API exposes three topics under a common root:
//!
//! ```text
//! v1/gateway/connect      - announce a device
//! v1/gateway/disconnect   - retire a device
//! v1/gateway/telemetry    - telemetry for announced devices
//! ```

use serde::{Deserialize, Serialize};

/// Default gateway topic root.
pub const GATEWAY_ROOT: &str = "v1/gateway";

/// Telemetry topic.
pub const TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";

/// Device announce topic.
pub const CONNECT_TOPIC: &str = "v1/gateway/connect";

/// Device retire topic.
pub const DISCONNECT_TOPIC: &str = "v1/gateway/disconnect";

/// Resolved set of topics the forwarder publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTopics {
    pub telemetry: String,
    pub connect: String,
    pub disconnect: String,
}

impl GatewayTopics {
    /// Build the topic set under a custom root (e.g. `"v2/gateway"`).
    pub fn with_root(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            telemetry: format!("{}/telemetry", root),
            connect: format!("{}/connect", root),
            disconnect: format!("{}/disconnect", root),
        }
    }
}

impl Default for GatewayTopics {
    fn default() -> Self {
        Self {
            telemetry: TELEMETRY_TOPIC.to_string(),
            connect: CONNECT_TOPIC.to_string(),
            disconnect: DISCONNECT_TOPIC.to_string(),
        }
    }
}
