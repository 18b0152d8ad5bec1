//! Pipeline composition and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use fieldgate_common::{BrokerConfig, GatewayJson, WireFormat};
use tokio::signal;

use crate::error::Result;
use crate::forwarder::{Forwarder, ForwarderConfig};
use crate::poller::Poller;
use crate::queue::PacketQueue;
use crate::source::Source;
use crate::transport::Transport;

/// One telemetry pipeline: a poller feeding a forwarder through a queue.
///
/// Owns every component; nothing is shared through globals. Additional
/// producers can push into [`queue`](Self::queue).
///
/// # Example
///
/// ```ignore
/// use fieldgate_pipeline::{MqttTransport, Pipeline, wait_for_shutdown};
///
/// let pipeline = Pipeline::new(broker, interval, Arc::new(MqttTransport::default()), source)?;
/// pipeline.start().await?;
/// wait_for_shutdown().await;
/// pipeline.stop().await;
/// ```
pub struct Pipeline<T: Transport, S: Source> {
    queue: Arc<PacketQueue>,
    forwarder: Forwarder<T>,
    poller: Poller<S>,
}

impl<T: Transport, S: Source> Pipeline<T, S> {
    /// Build a pipeline publishing the gateway JSON format.
    pub fn new(
        broker: BrokerConfig,
        poll_interval: Duration,
        transport: Arc<T>,
        source: Arc<S>,
    ) -> Result<Self> {
        Self::with_wire_format(broker, poll_interval, transport, source, Arc::new(GatewayJson))
    }

    /// Build a pipeline with a custom wire format.
    pub fn with_wire_format(
        broker: BrokerConfig,
        poll_interval: Duration,
        transport: Arc<T>,
        source: Arc<S>,
        wire: Arc<dyn WireFormat>,
    ) -> Result<Self> {
        let config = ForwarderConfig::from_broker(broker)?;
        let queue = Arc::new(PacketQueue::new());
        let forwarder = Forwarder::new(config, transport, queue.clone(), wire);
        let poller = Poller::new(source, queue.clone(), poll_interval);

        Ok(Self {
            queue,
            forwarder,
            poller,
        })
    }

    /// Start the forwarder, then the poller.
    ///
    /// If the forwarder cannot start the poller is left untouched.
    pub async fn start(&self) -> Result<()> {
        self.forwarder.start().await?;

        if let Err(e) = self.poller.start() {
            self.forwarder.stop().await;
            return Err(e);
        }

        tracing::info!(source = %self.poller.source().name(), "Pipeline running");
        Ok(())
    }

    /// Stop the poller, then the forwarder.
    pub async fn stop(&self) {
        self.poller.stop().await;
        self.forwarder.stop().await;

        let stats = self.forwarder.stats();
        tracing::info!(
            forwarded = stats.success,
            dropped = stats.failed,
            pending = self.queue.len(),
            "Pipeline stopped"
        );
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    pub fn forwarder(&self) -> &Forwarder<T> {
        &self.forwarder
    }

    pub fn poller(&self) -> &Poller<S> {
        &self.poller
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
