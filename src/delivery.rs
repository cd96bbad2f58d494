//! Per-client outbound delivery
//!
//! Each client gets an [`Outbox`]: a bounded queue drained by one worker
//! task that writes to the client's [`Transport`]. Enqueueing never waits,
//! so a slow reader can stall neither the hub nor other recipients, and a
//! single worker per client keeps that client's messages in order.
//!
//! Overflow policy is drop-new. A write that exceeds the send timeout is
//! abandoned; enough consecutive timeouts cut the recipient off.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

use crate::channel::Channel;
use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Default per-client queue depth
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Default timeout for one transport write
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of consecutive timed-out writes tolerated
pub const DEFAULT_MAX_STALLED_SENDS: u32 = 3;

/// Delivery tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Messages queued per client before new ones are dropped
    pub outbox_capacity: usize,
    /// Upper bound on a single transport write
    pub send_timeout: Duration,
    /// Consecutive timeouts after which the recipient is cut off
    pub max_stalled_sends: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_stalled_sends: DEFAULT_MAX_STALLED_SENDS,
        }
    }
}

/// Why an outbox stopped delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Disconnect or transport gone
    Normal,
    /// Client violated the wire protocol
    ProtocolError,
    /// Client stopped reading
    Stalled,
}

/// Write side of one client's connection
///
/// The worker abandons a `deliver` future that outlives the send timeout.
/// Sinks that buffer internally (a split WebSocket sink does) may already
/// hold the frame by then and flush it on the next write, so an abandoned
/// write is counted as timed out, not as lost.
pub trait Transport: Send + 'static {
    /// Write one message
    fn deliver(
        &mut self,
        message: &ServerMessage,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Flush and close the connection
    fn shutdown(&mut self, reason: CloseReason) -> impl Future<Output = ()> + Send;
}

/// In-process transport: hands messages to a local receiver
#[cfg(test)]
impl Transport for mpsc::Sender<ServerMessage> {
    async fn deliver(&mut self, message: &ServerMessage) -> Result<(), SendError> {
        self.send(message.clone())
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    async fn shutdown(&mut self, _reason: CloseReason) {}
}

/// Delivery counters for one outbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Messages written to the transport
    pub delivered: u64,
    /// Messages lost to overflow or encoding failures
    pub dropped: u64,
    /// Writes abandoned after the send timeout; may still reach the peer
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct Shared {
    close_reason: OnceLock<CloseReason>,
    closing: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
    timed_out: AtomicU64,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.close_reason.get().is_some()
    }

    /// Returns true if this call did the closing
    fn close(&self, reason: CloseReason) -> bool {
        if self.close_reason.set(reason).is_err() {
            return false;
        }
        self.closing.notify_one();
        true
    }

    fn reason(&self) -> CloseReason {
        self.close_reason.get().copied().unwrap_or(CloseReason::Normal)
    }
}

/// Bounded outbound queue for one client
///
/// Implements [`Channel`], so the registry can hold it directly.
#[derive(Debug)]
pub struct Outbox {
    client_id: ClientId,
    queue: mpsc::Sender<ServerMessage>,
    shared: Arc<Shared>,
}

impl Outbox {
    /// Create an outbox and start its delivery worker
    ///
    /// The worker's join handle resolves to the reason delivery stopped.
    pub fn spawn<T: Transport>(
        client_id: ClientId,
        transport: T,
        config: &DeliveryConfig,
    ) -> (Arc<Self>, JoinHandle<CloseReason>) {
        // tokio panics on a zero-capacity channel
        let (tx, rx) = mpsc::channel(config.outbox_capacity.max(1));
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            client_id: client_id.clone(),
            queue: rx,
            transport,
            shared: Arc::clone(&shared),
            send_timeout: config.send_timeout,
            max_stalled_sends: config.max_stalled_sends.max(1),
        };
        let handle = tokio::spawn(worker.run());

        let outbox = Arc::new(Self {
            client_id,
            queue: tx,
            shared,
        });
        (outbox, handle)
    }

    /// Stop delivering with an explicit reason; the first reason wins
    pub fn close_with(&self, reason: CloseReason) {
        if self.shared.close(reason) {
            debug!("Outbox for {} closing ({:?})", self.client_id, reason);
        }
    }

    /// Whether the outbox has stopped accepting messages
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Current delivery counters
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            timed_out: self.shared.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Channel for Outbox {
    fn send(&self, message: ServerMessage) {
        if self.shared.is_closed() {
            return;
        }

        match self.queue.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Outbox full for {}, dropping message {}",
                    self.client_id,
                    message.message_id()
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbox for {} already shut down", self.client_id);
            }
        }
    }

    fn close(&self) {
        self.close_with(CloseReason::Normal);
    }
}

struct Worker<T> {
    client_id: ClientId,
    queue: mpsc::Receiver<ServerMessage>,
    transport: T,
    shared: Arc<Shared>,
    send_timeout: Duration,
    max_stalled_sends: u32,
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) -> CloseReason {
        let mut stalled = 0;

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shared.closing.notified() => break,
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if self.shared.is_closed() {
                break;
            }

            match time::timeout(self.send_timeout, self.transport.deliver(&message)).await {
                Ok(Ok(())) => {
                    stalled = 0;
                    self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(SendError::Encode(e))) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    error!("Failed to serialize message for {}: {}", self.client_id, e);
                }
                Ok(Err(SendError::ChannelClosed)) => {
                    debug!("Transport for {} closed, ending delivery", self.client_id);
                    self.shared.close(CloseReason::Normal);
                    break;
                }
                Err(_) => {
                    stalled += 1;
                    self.shared.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Send to {} timed out after {:?} ({} in a row)",
                        self.client_id, self.send_timeout, stalled
                    );
                    if stalled >= self.max_stalled_sends {
                        warn!("Client {} stopped reading, cutting off", self.client_id);
                        self.shared.close(CloseReason::Stalled);
                        break;
                    }
                }
            }
        }

        self.queue.close();
        self.shared.close(CloseReason::Normal);
        let reason = self.shared.reason();

        if time::timeout(self.send_timeout, self.transport.shutdown(reason))
            .await
            .is_err()
        {
            debug!("Transport shutdown for {} timed out", self.client_id);
        }
        debug!("Delivery ended for {} ({:?})", self.client_id, reason);

        reason
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Transport that never finishes a write
    pub(crate) struct StuckTransport;

    impl Transport for StuckTransport {
        async fn deliver(&mut self, _message: &ServerMessage) -> Result<(), SendError> {
            std::future::pending().await
        }

        async fn shutdown(&mut self, _reason: CloseReason) {}
    }
}
