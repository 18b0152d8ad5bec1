//! Consumer side of the pipeline: queue to gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use fieldgate_common::{BrokerConfig, GatewayTopics, TelemetryPacket, WireFormat};
use rumqttc::QoS;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::queue::PacketQueue;
use crate::tracker::ConnectionTracker;
use crate::transport::{Transport, qos_from_level};

/// Immutable forwarder settings.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Broker connection settings.
    pub broker: BrokerConfig,
    /// Topics for telemetry and device announce/retire.
    pub topics: GatewayTopics,
    /// QoS for every published message.
    pub qos: QoS,
}

impl ForwarderConfig {
    /// Derive topics and QoS from the broker settings.
    pub fn from_broker(broker: BrokerConfig) -> Result<Self> {
        let qos = qos_from_level(broker.qos)?;
        let topics = broker.topics();
        Ok(Self { broker, topics, qos })
    }
}

/// Lifecycle of the forwarder loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Stopped,
    Connecting,
    Running,
    Stopping,
}

/// Dequeues packets, announces their devices and publishes them.
///
/// Delivery is at-most-once: a packet that cannot be announced, encoded or
/// published is logged and dropped.
pub struct Forwarder<T: Transport> {
    shared: Arc<ForwarderShared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ForwarderShared<T: Transport> {
    config: ForwarderConfig,
    transport: Arc<T>,
    tracker: Arc<ConnectionTracker<T>>,
    queue: Arc<PacketQueue>,
    wire: Arc<dyn WireFormat>,
    state: watch::Sender<ForwarderState>,
    stats: ForwarderStats,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(
        config: ForwarderConfig,
        transport: Arc<T>,
        queue: Arc<PacketQueue>,
        wire: Arc<dyn WireFormat>,
    ) -> Self {
        let tracker = Arc::new(ConnectionTracker::new(
            transport.clone(),
            wire.clone(),
            config.topics.clone(),
            config.qos,
        ));
        let (state, _) = watch::channel(ForwarderState::Stopped);

        Self {
            shared: Arc::new(ForwarderShared {
                config,
                transport,
                tracker,
                queue,
                wire,
                state,
                stats: ForwarderStats::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Connect the transport and launch the consumer loop.
    ///
    /// Fails without side effects if the loop is already running or the
    /// broker settings are incomplete. A failed connect leaves the
    /// forwarder stopped.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(BridgeError::AlreadyRunning("Forwarder"));
        }

        let broker = &self.shared.config.broker;
        broker.validate()?;

        self.shared.set_state(ForwarderState::Connecting);
        if let Err(e) = self.shared.transport.connect(broker).await {
            error!(error = %e, "Could not connect to gateway broker");
            self.shared.set_state(ForwarderState::Stopped);
            return Err(e);
        }

        self.shared.queue.resume();
        self.shared.set_state(ForwarderState::Running);

        let shared = self.shared.clone();
        *worker = Some(tokio::spawn(async move { shared.run().await }));

        Ok(())
    }

    /// Stop the consumer loop and wait for it to disconnect.
    ///
    /// Packets still queued stay queued for the next [`start`](Self::start).
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            return;
        };

        if !handle.is_finished() {
            self.shared.set_state(ForwarderState::Stopping);
        }
        self.shared.queue.stop();

        if let Err(e) = handle.await {
            warn!(error = %e, "Forwarder task ended abnormally");
            self.shared.set_state(ForwarderState::Stopped);
        }
    }

    pub fn state(&self) -> ForwarderState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ForwarderState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ForwarderState::Running
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker<T>> {
        &self.shared.tracker
    }

    /// Delivery counters since creation.
    pub fn stats(&self) -> PublishStats {
        self.shared.stats.snapshot()
    }
}

impl<T: Transport> ForwarderShared<T> {
    fn set_state(&self, state: ForwarderState) {
        self.state.send_replace(state);
    }

    async fn run(&self) {
        info!(topic = %self.config.topics.telemetry, "Forwarder started");

        while let Some(packet) = self.queue.pop().await {
            self.forward(packet).await;
        }

        self.set_state(ForwarderState::Stopping);

        // The gateway forgets announced devices with the session; retire
        // them so a restart announces them again.
        let retired = self.tracker.retire_all().await;
        self.transport.disconnect().await;

        self.set_state(ForwarderState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            forwarded = stats.success,
            dropped = stats.failed,
            announce_failed = stats.announce_failed,
            retired,
            pending = self.queue.len(),
            "Forwarder stopped"
        );
    }

    async fn forward(&self, packet: TelemetryPacket) {
        let device = packet.device_name();

        if let Err(e) = self.tracker.ensure_announced(device).await {
            warn!(device = %device, error = %e, "Could not announce device, dropping packet");
            self.stats.record_announce_failure();
            return;
        }

        let payload = match self.wire.encode_telemetry(&packet) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(device = %device, error = %e, "Could not encode packet, dropping it");
                self.stats.record_failure();
                return;
            }
        };

        match self
            .transport
            .publish(&self.config.topics.telemetry, payload, self.config.qos)
            .await
        {
            Ok(()) => {
                self.stats.record_success();
                debug!(device = %device, fields = packet.len(), "Telemetry published");
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(device = %device, error = %e, "Failed to publish telemetry, dropping packet");
            }
        }
    }
}

/// Lock-free delivery counters.
#[derive(Debug, Default)]
struct ForwarderStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    announce_failed: AtomicU64,
}

impl ForwarderStats {
    fn record_success(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_announce_failure(&self) {
        self.announce_failed.fetch_add(1, Ordering::Relaxed);
        self.record_failure();
    }

    fn snapshot(&self) -> PublishStats {
        PublishStats {
            success: self.forwarded.load(Ordering::Relaxed),
            failed: self.dropped.load(Ordering::Relaxed),
            announce_failed: self.announce_failed.load(Ordering::Relaxed),
        }
    }
}

/// Statistics of forwarded packets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Packets published to the gateway.
    pub success: u64,
    /// Packets dropped, for any reason.
    pub failed: u64,
    /// Packets dropped because their device could not be announced.
    pub announce_failed: u64,
}

impl PublishStats {
    /// Total number of packets handled.
    pub fn total(&self) -> u64 {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
