//! Publish/subscribe transport towards the gateway broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fieldgate_common::BrokerConfig;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};

/// Connect/publish/disconnect operations against a remote broker.
///
/// Implementations perform no retry or backoff of their own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session with the broker described by `config`.
    async fn connect(&self, config: &BrokerConfig) -> Result<()>;

    /// Publish `payload` on `topic`. Fails with [`BridgeError::NotConnected`]
    /// when no session is open.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()>;

    /// Close the session, if any.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Map a numeric QoS level to the MQTT enum.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::config(format!(
            "Invalid QoS level {} (expected 0, 1 or 2)",
            other
        ))),
    }
}

/// MQTT transport built on rumqttc.
///
/// `connect` drives the event loop until the broker acknowledges the
/// session, then hands the loop to a background task. Any event-loop
/// error marks the transport disconnected; reconnecting is left to the
/// caller.
#[derive(Debug)]
pub struct MqttTransport {
    session: Mutex<Option<MqttSession>>,
    connected: Arc<AtomicBool>,
    channel_capacity: usize,
}

#[derive(Debug)]
struct MqttSession {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MqttTransport {
    /// Create a transport whose client queues up to `channel_capacity`
    /// outgoing requests.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            channel_capacity,
        }
    }

    fn options(config: &BrokerConfig) -> Result<MqttOptions> {
        let (host, port) = config.endpoint()?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options.set_credentials(&config.access_token, "");

        Ok(options)
    }

    async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(BridgeError::Connect(format!(
                            "Broker refused connection: {:?}",
                            ack.code
                        )))
                    };
                }
                Ok(_) => continue,
                Err(e) => return Err(BridgeError::Connect(e.to_string())),
            }
        }
    }

    fn spawn_driver(mut eventloop: EventLoop, connected: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::warn!("Broker closed the MQTT session");
                        break;
                    }
                    Ok(event) => {
                        tracing::trace!(?event, "MQTT event");
                    }
                    Err(e) => {
                        if connected.load(Ordering::SeqCst) {
                            tracing::warn!(error = %e, "MQTT connection lost");
                        }
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, config: &BrokerConfig) -> Result<()> {
        config.validate()?;
        let options = Self::options(config)?;

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            self.connected.store(false, Ordering::SeqCst);
            let _ = previous.client.disconnect().await;
            previous.driver.abort();
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to gateway broker"
        );

        let (client, mut eventloop) = AsyncClient::new(options, self.channel_capacity);
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        tokio::time::timeout(timeout, Self::wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BridgeError::Connect("Timed out waiting for CONNACK".to_string()))??;

        self.connected.store(true, Ordering::SeqCst);
        let driver = Self::spawn_driver(eventloop, self.connected.clone());
        *session = Some(MqttSession { client, driver });

        tracing::info!("Connected to gateway broker");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let client = match self.session.lock().await.as_ref() {
            Some(session) => session.client.clone(),
            None => return Err(BridgeError::NotConnected),
        };

        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| BridgeError::publish(topic, e))
    }

    async fn disconnect(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            if let Err(e) = session.client.disconnect().await {
                tracing::warn!(error = %e, "Clean MQTT disconnect failed");
            }
            // Let the event loop flush the DISCONNECT packet.
            let _ = tokio::time::timeout(Duration::from_secs(1), &mut session.driver).await;
        }
        session.driver.abort();

        tracing::info!("Disconnected from gateway broker");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
