use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topics::{GATEWAY_ROOT, GatewayTopics};

/// Connection settings for the remote gateway broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host. May carry a `tcp://` or `mqtt://` scheme and a `:port`.
    #[serde(default)]
    pub host: String,

    /// Broker port, used when `host` does not embed one.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Gateway device access token, sent as the MQTT username.
    #[serde(default)]
    pub access_token: String,

    /// MQTT client identifier.
    #[serde(default)]
    pub client_id: String,

    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker's CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// QoS level for published messages (0, 1 or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Root of the gateway topics.
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_qos() -> u8 {
    2
}

fn default_topic_root() -> String {
    GATEWAY_ROOT.to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_broker_port(),
            access_token: String::new(),
            client_id: String::new(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_ms: default_connect_timeout(),
            qos: default_qos(),
            topic_root: default_topic_root(),
        }
    }
}

impl BrokerConfig {
    /// Check that everything required to connect is present.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::Config(
                "Gateway access token is required".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("Broker host is required".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("MQTT client id is required".to_string()));
        }
        if self.qos > 2 {
            return Err(Error::Config(format!(
                "Invalid QoS level {} (expected 0, 1 or 2)",
                self.qos
            )));
        }
        Ok(())
    }

    /// Resolve the broker host and port, stripping any URL scheme.
    ///
    /// IPv6 literals are written `[::1]` or `[::1]:1883`; a bare literal such
    /// as `::1` is taken as a host without a port.
    pub fn endpoint(&self) -> Result<(String, u16)> {
        let trimmed = self.host.trim();
        let without_scheme = ["tcp://", "mqtt://"]
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        if without_scheme.is_empty() {
            return Err(Error::Config("Broker host is required".to_string()));
        }

        let (host, port) = if let Some(bracketed) = without_scheme.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
                Error::Config(format!("Unclosed '[' in broker host '{}'", self.host))
            })?;
            match rest {
                "" => (host, None),
                _ => match rest.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(Error::Config(format!(
                            "Unexpected '{}' after broker address",
                            rest
                        )));
                    }
                },
            }
        } else {
            match without_scheme.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && !host.contains(':') => {
                    (host, Some(port))
                }
                _ => (without_scheme, None),
            }
        };

        if host.is_empty() {
            return Err(Error::Config("Broker host is required".to_string()));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|e| {
                Error::Config(format!("Invalid broker port '{}': {}", port, e))
            })?,
            None => self.port,
        };

        Ok((host.to_string(), port))
    }

    /// Topics derived from `topic_root`.
    pub fn topics(&self) -> GatewayTopics {
        GatewayTopics::with_root(&self.topic_root)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
