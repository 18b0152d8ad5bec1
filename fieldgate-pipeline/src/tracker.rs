//! Device announce/retire bookkeeping.
//!
//! The gateway only accepts telemetry for devices it has been told about.
//! The tracker publishes a connect message the first time a device is
//! seen and a disconnect message when the device is retired.
//!
//! # Topics
//!
//! - Announce: `<root>/connect` with `{"device":"<name>"}`
//! - Retire: `<root>/disconnect` with `{"device":"<name>"}`

use std::collections::HashSet;
use std::sync::Arc;

use fieldgate_common::{GatewayTopics, WireFormat};
use rumqttc::QoS;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::transport::Transport;

/// Tracks which devices have been announced to the gateway.
pub struct ConnectionTracker<T: Transport> {
    transport: Arc<T>,
    wire: Arc<dyn WireFormat>,
    topics: GatewayTopics,
    qos: QoS,
    /// Devices currently announced. Held across the publish so concurrent
    /// callers cannot announce the same device twice.
    announced: Mutex<HashSet<String>>,
}

impl<T: Transport> ConnectionTracker<T> {
    pub fn new(
        transport: Arc<T>,
        wire: Arc<dyn WireFormat>,
        topics: GatewayTopics,
        qos: QoS,
    ) -> Self {
        Self {
            transport,
            wire,
            topics,
            qos,
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// Announce `device` unless it already is.
    ///
    /// The device is recorded only once the transport accepted the
    /// announce message.
    pub async fn ensure_announced(&self, device: &str) -> Result<()> {
        let mut announced = self.announced.lock().await;
        if announced.contains(device) {
            return Ok(());
        }

        let payload = self.wire.encode_device(device)?;
        self.transport
            .publish(&self.topics.connect, payload, self.qos)
            .await?;

        announced.insert(device.to_string());
        tracing::info!(device = %device, "Device announced to gateway");

        Ok(())
    }

    /// Retire `device` if it is announced.
    ///
    /// The device is forgotten even when the disconnect message cannot be
    /// published; the error is still returned.
    pub async fn retire(&self, device: &str) -> Result<()> {
        let mut announced = self.announced.lock().await;
        if !announced.remove(device) {
            return Ok(());
        }

        self.publish_retire(device).await
    }

    /// Retire every announced device.
    ///
    /// Returns the number of devices retired. Publish failures are logged.
    pub async fn retire_all(&self) -> usize {
        let mut announced = self.announced.lock().await;
        let devices: Vec<String> = announced.drain().collect();

        for device in &devices {
            if let Err(e) = self.publish_retire(device).await {
                tracing::warn!(device = %device, error = %e, "Failed to retire device");
            }
        }

        if !devices.is_empty() {
            tracing::debug!(count = devices.len(), "All devices retired");
        }
        devices.len()
    }

    async fn publish_retire(&self, device: &str) -> Result<()> {
        let payload = self.wire.encode_device(device)?;
        self.transport
            .publish(&self.topics.disconnect, payload, self.qos)
            .await?;

        tracing::info!(device = %device, "Device retired from gateway");
        Ok(())
    }

    /// Check if a device is currently announced.
    pub async fn is_announced(&self, device: &str) -> bool {
        self.announced.lock().await.contains(device)
    }

    /// Devices currently announced, in no particular order.
    pub async fn announced_devices(&self) -> Vec<String> {
        self.announced.lock().await.iter().cloned().collect()
    }
}
