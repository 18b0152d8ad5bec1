//! Unbounded FIFO hand-off between producers and the forwarder.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use fieldgate_common::TelemetryPacket;
use tokio::sync::Notify;

/// Thread-safe, unbounded packet queue.
///
/// [`push`](Self::push) never blocks. [`pop`](Self::pop) suspends the
/// calling task until a packet arrives or the queue is stopped. While
/// stopped, `pop` returns `None` immediately and queued packets are kept
/// for the next consumer run.
#[derive(Debug, Default)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<TelemetryPacket>,
    stopped: bool,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet to the tail and wake one waiting consumer.
    pub fn push(&self, packet: TelemetryPacket) {
        self.lock().packets.push_back(packet);
        self.notify.notify_one();
    }

    /// Remove the head, waiting until one is available.
    ///
    /// Returns `None` once the queue has been stopped.
    pub async fn pop(&self) -> Option<TelemetryPacket> {
        loop {
            // Register interest before checking state so a push or stop
            // between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.stopped {
                    return None;
                }
                if let Some(packet) = state.packets.pop_front() {
                    return Some(packet);
                }
            }

            notified.await;
        }
    }

    /// Signal every waiting consumer to return `None`.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.notify.notify_waiters();
    }

    /// Clear a previous stop signal.
    pub fn resume(&self) {
        self.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State is a plain deque and a flag, still consistent after a panic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
