//! Periodic reader turning field readings into telemetry packets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldgate_common::TelemetryPacket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{BridgeError, Result};
use crate::queue::PacketQueue;
use crate::source::Source;

/// Producer side of the pipeline.
///
/// Every `interval` the poller reads its [`Source`] and pushes one packet
/// per successfully read field. Read errors are confined to the field
/// that failed; an unavailable source skips the whole cycle.
pub struct Poller<S: Source> {
    shared: Arc<PollerShared<S>>,
    worker: Mutex<Option<Worker>>,
}

struct PollerShared<S> {
    source: Arc<S>,
    queue: Arc<PacketQueue>,
    interval: Duration,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<S: Source> Poller<S> {
    pub fn new(source: Arc<S>, queue: Arc<PacketQueue>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                source,
                queue,
                interval,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Launch the polling loop.
    ///
    /// Fails with [`BridgeError::AlreadyRunning`] and changes nothing if
    /// the loop is already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(BridgeError::AlreadyRunning("Poller"));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { shared.run(shutdown_rx).await });

        *worker = Some(Worker { shutdown, handle });
        Ok(())
    }

    /// Request the loop to stop and wait for it to exit.
    ///
    /// A read already in progress is allowed to finish.
    pub async fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Poller task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run a single read cycle, returning the number of packets enqueued.
    pub async fn poll_once(&self) -> usize {
        self.shared.poll_once().await
    }

    pub fn source(&self) -> &Arc<S> {
        &self.shared.source
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: Source> PollerShared<S> {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.source.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }

            let count = self.poll_once().await;
            debug!(source = %self.source.name(), count, "Poll cycle complete");
        }

        info!(source = %self.source.name(), "Poller stopped");
    }

    async fn poll_once(&self) -> usize {
        if !self.source.is_ready() {
            trace!(source = %self.source.name(), "Source not ready, skipping cycle");
            return 0;
        }

        let readings = match self.source.read().await {
            Ok(readings) => readings,
            Err(e) => {
                debug!(source = %self.source.name(), error = %e, "Skipping poll cycle");
                return 0;
            }
        };

        let mut count = 0;
        for reading in readings {
            let value = match reading.value {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        device = %reading.device,
                        field = %reading.field,
                        error = %e,
                        "Could not read field"
                    );
                    continue;
                }
            };

            debug!(device = %reading.device, field = %reading.field, value = %value, "Read");

            match TelemetryPacket::new(reading.device) {
                Ok(packet) => {
                    self.queue.push(packet.with_field(reading.field, value));
                    count += 1;
                }
                Err(e) => {
                    warn!(field = %reading.field, error = %e, "Dropping reading");
                }
            }
        }

        count
    }
}
