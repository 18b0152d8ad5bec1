//! Mesh sensor-node telemetry received over a local MQTT broker.
//!
//! Sensor nodes publish one JSON object per reading on
//! `sensor_node_out/<device>/telemetry/`. Each message becomes one
//! multi-field packet pushed straight into the pipeline queue.

use std::sync::Arc;
use std::time::Duration;

use fieldgate_common::{Error, TelemetryPacket, decode_fields};
use fieldgate_pipeline::PacketQueue;
use once_cell::sync::Lazy;
use regex::Regex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Topic filter sensor nodes publish on.
pub const SENSOR_TOPIC: &str = "sensor_node_out/+/telemetry/";

static DEVICE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sensor_node_out/([^/]+)/telemetry/?$").unwrap());

/// Local sensor-node broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorNodeConfig {
    /// Broker host
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username, none when empty
    #[serde(default)]
    pub username: String,

    /// MQTT client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Delay before reconnecting after a broker error
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fieldgate-sensor-nodes".to_string()
}

fn default_retry_delay() -> u64 {
    5000
}

impl Default for SensorNodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: String::new(),
            client_id: default_client_id(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Extract the device name from a sensor-node telemetry topic.
pub fn device_from_topic(topic: &str) -> Option<&str> {
    DEVICE_NAME_REGEX
        .captures(topic)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Turn one sensor-node message into a packet.
///
/// Every top-level key of the JSON object becomes a field.
pub fn packet_from_message(topic: &str, payload: &[u8]) -> Result<TelemetryPacket, Error> {
    let device = device_from_topic(topic)
        .ok_or_else(|| Error::MalformedMessage(format!("unexpected topic '{}'", topic)))?;

    let fields = decode_fields(payload)?;
    if fields.is_empty() {
        return Err(Error::MalformedMessage("message has no fields".to_string()));
    }

    let mut packet = TelemetryPacket::new(device)?;
    for (name, value) in fields {
        packet.insert_field(name, value);
    }

    Ok(packet)
}

/// Second producer feeding sensor-node messages into the queue.
pub struct SensorNodeListener {
    config: SensorNodeConfig,
    queue: Arc<PacketQueue>,
}

impl SensorNodeListener {
    pub fn new(config: SensorNodeConfig, queue: Arc<PacketQueue>) -> Self {
        Self { config, queue }
    }

    /// Listen until `shutdown` turns true, reconnecting after broker errors.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = SENSOR_TOPIC,
            "Starting sensor node listener"
        );

        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.run_session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Sensor node broker error, reconnecting");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(retry_delay) => {}
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Sensor node listener stopped");
    }

    /// One broker session. `Ok` means shutdown was requested.
    async fn run_session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), rumqttc::ConnectionError> {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if !self.config.username.is_empty() {
            options.set_credentials(&self.config.username, "");
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if client.try_disconnect().is_ok()
                            && !flush_disconnect(&mut eventloop, Duration::from_secs(1)).await
                        {
                            debug!("Sensor node broker session closed without DISCONNECT");
                        }
                        return Ok(());
                    }
                }
                event = eventloop.poll() => {
                    match event? {
                        Event::Incoming(Packet::ConnAck(_)) => {
                            info!("Connected to sensor node broker");
                            if let Err(e) = client.try_subscribe(SENSOR_TOPIC, QoS::ExactlyOnce) {
                                warn!(error = %e, "Could not subscribe to sensor node topic");
                            }
                        }
                        Event::Incoming(Packet::SubAck(_)) => {
                            debug!(topic = SENSOR_TOPIC, "Subscription acknowledged");
                        }
                        Event::Incoming(Packet::Publish(publish)) => {
                            self.handle_message(&publish.topic, &publish.payload);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_message(&self, topic: &str, payload: &[u8]) {
        match packet_from_message(topic, payload) {
            Ok(packet) => {
                debug!(
                    device = %packet.device_name(),
                    fields = packet.len(),
                    "Sensor node telemetry"
                );
                self.queue.push(packet);
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping sensor node message");
            }
        }
    }
}

/// Poll `eventloop` until the queued DISCONNECT has been written.
///
/// Returns false on a connection error or when `timeout` elapses first.
async fn flush_disconnect(eventloop: &mut EventLoop, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const DISCONNECT: [u8; 2] = [0xE0, 0x00];

    #[test]
    fn test_device_from_topic() {
        assert_eq!(
            device_from_topic("sensor_node_out/node-17/telemetry/"),
            Some("node-17")
        );
        assert_eq!(
            device_from_topic("sensor_node_out/node-17/telemetry"),
            Some("node-17")
        );
        assert_eq!(device_from_topic("sensor_node_out//telemetry/"), None);
        assert_eq!(device_from_topic("sensor_node_out/a/b/telemetry/"), None);
        assert_eq!(device_from_topic("other/node-17/telemetry/"), None);
    }

    #[test]
    fn test_packet_from_message() {
        let packet = packet_from_message(
            "sensor_node_out/Sensor1/telemetry/",
            br#"{"Temp": 22.5, "Door": "open", "Alarm": false}"#,
        )
        .unwrap();

        assert_eq!(packet.device_name(), "Sensor1");
        assert_eq!(packet.len(), 3);
        assert_eq!(packet.fields()["Temp"], "22.5");
        assert_eq!(packet.fields()["Door"], "open");
        assert_eq!(packet.fields()["Alarm"], "false");
    }

    #[test]
    fn test_malformed_messages_rejected() {
        let topic = "sensor_node_out/Sensor1/telemetry/";

        assert!(matches!(
            packet_from_message(topic, b"not json"),
            Err(Error::Json(_)) | Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            packet_from_message(topic, b"[1, 2]"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            packet_from_message(topic, b"{}"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            packet_from_message("sensor_node_out/telemetry/", b"{\"a\":1}"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_handle_message_pushes_valid_only() {
        let queue = Arc::new(PacketQueue::new());
        let listener = SensorNodeListener::new(SensorNodeConfig::default(), queue.clone());

        listener.handle_message("sensor_node_out/n1/telemetry/", br#"{"rh": 41}"#);
        listener.handle_message("sensor_node_out/n1/telemetry/", b"garbage");

        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = SensorNodeConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            retry_delay_ms: 10,
            ..SensorNodeConfig::default()
        };
        let listener = SensorNodeListener::new(config, Arc::new(PacketQueue::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(listener.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_disconnect_to_broker() {
        let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = broker.local_addr().unwrap().port();

        let config = SensorNodeConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..SensorNodeConfig::default()
        };
        let listener = SensorNodeListener::new(config, Arc::new(PacketQueue::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(listener.run(shutdown_rx));

        let (mut socket, _) = tokio::time::timeout(Duration::from_secs(5), broker.accept())
            .await
            .expect("listener never connected")
            .unwrap();

        let mut buf = [0u8; 256];
        assert!(socket.read(&mut buf).await.unwrap() > 0);
        assert_eq!(buf[0], 0x10, "first packet should be CONNECT");
        socket.write_all(&CONNACK).await.unwrap();

        // SUBSCRIBE follows the CONNACK.
        assert!(socket.read(&mut buf).await.unwrap() > 0);
        assert_eq!(buf[0] & 0xF0, 0x80);

        shutdown_tx.send(true).unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut received))
            .await
            .expect("session was not closed")
            .unwrap();
        assert!(received.ends_with(&DISCONNECT));

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
