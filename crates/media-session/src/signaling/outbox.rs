//! Bounded outbox for data-channel envelopes.
//!
//! All outgoing envelopes pass through one worker task, so they leave in
//! order and one at a time. `send` waits for the worker's result;
//! `try_send` is best-effort and counts a drop when the outbox is full.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::SessionError;
use crate::observability::metrics;
use crate::signaling::messages::SignalMessage;
use crate::transport::RoomTransport;

/// Backpressure level of the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLevel {
    /// Below a quarter of capacity.
    Normal,
    /// Between a quarter and three quarters of capacity.
    Warning,
    /// Above three quarters of capacity.
    Critical,
}

/// Queue/backpressure status exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub peak_depth: usize,
    pub capacity: usize,
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub level: QueueLevel,
}

/// Depth and throughput counters for the outbox.
#[derive(Debug)]
pub struct QueueMonitor {
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl QueueMonitor {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn warning_threshold(&self) -> usize {
        (self.capacity / 4).max(1)
    }

    fn critical_threshold(&self) -> usize {
        (self.capacity * 3 / 4).max(1)
    }

    /// Record an envelope entering the outbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_signaling_queue_depth(new_depth);

        if new_depth == self.critical_threshold() {
            warn!(
                target: "ms.signaling",
                depth = new_depth,
                capacity = self.capacity,
                "Signaling outbox depth critical"
            );
        } else if new_depth == self.warning_threshold() {
            // Log once when crossing the warning threshold
            debug!(
                target: "ms.signaling",
                depth = new_depth,
                "Signaling outbox depth elevated"
            );
        }
    }

    /// Record an envelope leaving the outbox (handed to the transport).
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        metrics::set_signaling_queue_depth(previous.saturating_sub(1));
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope dropped because the outbox was full.
    pub fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_data_message("dropped");
        warn!(
            target: "ms.signaling",
            dropped,
            "Signaling envelope dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level_for_depth(&self, depth: usize) -> QueueLevel {
        if depth >= self.critical_threshold() {
            QueueLevel::Critical
        } else if depth >= self.warning_threshold() {
            QueueLevel::Warning
        } else {
            QueueLevel::Normal
        }
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let depth = self.current_depth();
        QueueStatus {
            depth,
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
            capacity: self.capacity,
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            level: self.level_for_depth(depth),
        }
    }
}

struct Envelope {
    message_type: &'static str,
    payload: Vec<u8>,
    destinations: Vec<String>,
    respond_to: Option<oneshot::Sender<Result<(), SessionError>>>,
}

/// Handle to the outbox worker of one session.
#[derive(Clone)]
pub struct SignalingOutbox {
    sender: mpsc::Sender<Envelope>,
    monitor: Arc<QueueMonitor>,
}

impl SignalingOutbox {
    /// Spawn the worker. It stops when `cancel_token` is cancelled;
    /// envelopes still queued then fail with `NotConnected`.
    pub fn spawn(
        transport: Arc<dyn RoomTransport>,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        let monitor = Arc::new(QueueMonitor::new(capacity));
        let (sender, receiver) = mpsc::channel(monitor.capacity);

        tokio::spawn(run_worker(
            transport,
            receiver,
            Arc::clone(&monitor),
            cancel_token,
        ));

        Self { sender, monitor }
    }

    /// Send and wait until the transport accepted the envelope.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the worker has stopped, `Transport` if the
    /// data-channel send failed.
    pub async fn send(
        &self,
        message: &SignalMessage,
        destinations: Vec<String>,
    ) -> Result<(), SessionError> {
        let payload = message
            .encode()
            .map_err(|e| SessionError::Internal(format!("Failed to encode envelope: {e}")))?;

        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| SessionError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        self.monitor.record_enqueue();
        permit.send(Envelope {
            message_type: message.message_type(),
            payload,
            destinations,
            respond_to: Some(tx),
        });

        rx.await.map_err(|_| SessionError::NotConnected)?
    }

    /// Best-effort send. Returns false when the envelope was not queued.
    pub fn try_send(&self, message: &SignalMessage, destinations: Vec<String>) -> bool {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: "ms.signaling", error = %e, "Failed to encode envelope");
                return false;
            }
        };

        let envelope = Envelope {
            message_type: message.message_type(),
            payload,
            destinations,
            respond_to: None,
        };

        match self.sender.try_reserve() {
            Ok(permit) => {
                self.monitor.record_enqueue();
                permit.send(envelope);
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                self.monitor.record_drop();
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                trace!(
                    target: "ms.signaling",
                    message_type = envelope.message_type,
                    "Outbox closed, envelope discarded"
                );
                false
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.monitor.status()
    }
}

async fn run_worker(
    transport: Arc<dyn RoomTransport>,
    mut receiver: mpsc::Receiver<Envelope>,
    monitor: Arc<QueueMonitor>,
    cancel_token: CancellationToken,
) {
    debug!(target: "ms.signaling", "Signaling outbox started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                break;
            }
            envelope = receiver.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                monitor.record_dequeue();

                let result = transport
                    .send_data(envelope.payload, &envelope.destinations)
                    .await
                    .map_err(SessionError::from);

                match &result {
                    Ok(()) => {
                        monitor.record_sent();
                        metrics::record_data_message("outbound");
                        trace!(
                            target: "ms.signaling",
                            message_type = envelope.message_type,
                            "Envelope sent"
                        );
                    }
                    Err(e) => {
                        monitor.record_failed();
                        warn!(
                            target: "ms.signaling",
                            message_type = envelope.message_type,
                            error = %e,
                            "Envelope send failed"
                        );
                    }
                }

                if let Some(respond_to) = envelope.respond_to {
                    let _ = respond_to.send(result);
                }
            }
        }
    }

    // Queued envelopes are dropped with the receiver; their senders see NotConnected.
    receiver.close();
    while receiver.try_recv().is_ok() {
        monitor.record_dequeue();
    }

    debug!(target: "ms.signaling", "Signaling outbox stopped");
}
